pub mod account;
pub mod event;
pub mod job;
pub mod listing;
