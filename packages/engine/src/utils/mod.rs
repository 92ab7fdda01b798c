// packages/engine/src/utils/mod.rs
//! Shared utilities: error taxonomy, configuration, identifiers

pub mod config;
pub mod errors;
pub mod ids;

pub use config::EngineConfig;
pub use errors::{EngineError, ErrorKind, Result};
pub use ids::random_hex;
