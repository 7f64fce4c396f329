pub mod accounts;
pub mod encryption;
pub mod events;
pub mod images;
pub mod processor;
pub mod queue;
pub mod vault;
pub mod worker;
