//! Repograph core library: turns a source repository into a typed,
//! versioned dependency graph.
//!
//! Files are classified and parsed with tree-sitter, symbols are extracted
//! and resolved into static relationships, and whatever static analysis
//! cannot settle is handed to an optional inference collaborator. Jobs run on
//! a bounded worker pool with retries, and every completed graph is stored as
//! an immutable version in SQLite behind an in-memory cache.

pub mod config;
pub mod errors;
pub mod events;
pub mod graph;
pub mod indexer;
pub mod inference;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod repository;
pub mod store;

#[cfg(test)]
mod test_support;

pub use config::EngineConfig;
pub use errors::{AnalysisError, AnalysisResult};
pub use orchestrator::{JobStatusView, Orchestrator};
