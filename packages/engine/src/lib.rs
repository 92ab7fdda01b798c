// packages/engine/src/lib.rs
//! Sandrun Execution Engine Library
//!
//! Runs untrusted source code in isolated, resource-capped containers and
//! returns the captured output, exit code and duration.
//!
//! # Architecture
//!
//! The engine is structured into several key modules:
//!
//! - **runtime**: Container runtime, warm pools, event watcher, runs and timeouts
//! - **admission**: Per-client throttling in front of the engine
//! - **api**: HTTP server, request validation, language registry
//! - **observability**: Tracing and metrics
//! - **utils**: Configuration, errors, identifiers

// Public module exports
pub mod admission;
pub mod api;
pub mod observability;
pub mod runtime;
pub mod utils;

// Re-export commonly used types
pub use runtime::engine::ExecutionEngine;
pub use runtime::pool_registry::PoolRegistry;
pub use runtime::run::{RunRequest, RunResult};
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");

/// Engine build information
pub struct BuildInfo {
    pub version: &'static str,
    pub git_hash: &'static str,
    pub build_timestamp: &'static str,
    pub rustc_version: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION,
            git_hash: GIT_HASH,
            build_timestamp: env!("BUILD_TIMESTAMP"),
            rustc_version: env!("RUSTC_VERSION"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_build_info() {
        let info = BuildInfo::current();
        assert!(!info.version.is_empty());
        assert!(!info.git_hash.is_empty());
    }
}
