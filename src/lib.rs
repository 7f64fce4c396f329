//! Listing automation worker
//!
//! Claims queued listing jobs from a shared Postgres job table and publishes
//! each listing to the requested marketplaces by driving a shared browser
//! engine through per-platform publish flows, recording per-platform results,
//! progress and an audit trail of job events.

pub mod app_state;
pub mod browser;
pub mod config;
pub mod db;
pub mod models;
pub mod platforms;
pub mod routes;
pub mod services;
