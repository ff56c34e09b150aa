//! Data layer module
//!
//! Handles all persistence:
//! - SQLite database operations (policies, resolutions, delivery attempts)
//! - Local actor key storage

pub mod database;
pub mod models;

pub use database::Database;
pub use models::*;

#[cfg(test)]
mod database_test;
