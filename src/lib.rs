//! Playfeed library crate
//!
//! Re-exports core modules for the service binary and integration tests.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod feed;
pub mod recommendation;
pub mod store;

// Re-export commonly used types
pub use config::Config;
pub use database::Database;
pub use error::{Error, Result};
pub use feed::FeedJobs;
pub use recommendation::RecommendationEngine;
pub use store::{DataSource, FeedSink, MemoryStore, PgStore};
