//! Database module for pulsewatch.
//!
//! Provides SQLite storage for targets and their check history.

mod models;
mod store;

pub use models::*;
pub use store::*;
