// Library exports for Quill
// Request handlers and integration tests drive the counter engine through
// these modules.

pub mod commands;
pub mod config;
pub mod counters;
pub mod db;
pub mod error;
pub mod state;
pub mod unit_of_work;
