// Rating Engine - dynamic rating schema and query engine

// Core types and primitives
pub mod core;

// Infrastructure - SQLite store, schema DDL, settings, caches, hooks
pub mod infrastructure;

// Field catalog, collections and ratings
pub mod collections;
pub mod fields;
pub mod ratings;

// Wiring
pub mod engine;

// Common utilities
pub mod config;
pub mod error;

// Re-exports for convenience
pub use config::Config;
pub use engine::{EngineBuilder, RatingEngine};
pub use error::{AppError, AppResult};
