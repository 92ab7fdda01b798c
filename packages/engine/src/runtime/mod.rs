// packages/engine/src/runtime/mod.rs
//! Container execution runtime
//!
//! This module provides the core execution environment, including:
//!
//! - **Container Runtime**: Trait over the container engine, with a Docker backend
//! - **Container Pool**: Warm, started standby containers per image
//! - **Pool Registry**: Image-keyed lookup of pools
//! - **Event Watcher**: Evicts pool members the runtime reports as dead
//! - **Run**: Lifecycle of one request, warm or cold
//! - **Timeout**: Deadline around a run's execute step
//! - **Sandbox / Resource Limiter**: Container specs and their caps
//!
//! # Architecture
//!
//! ```text
//!            request
//!               │
//!               ▼
//!     ┌───────────────────┐        ┌───────────────────────────┐
//!     │  ExecutionEngine  │──get──▶│  PoolRegistry             │
//!     │   (Run + Timeout) │        │  ┌────────┐  ┌────────┐   │
//!     └─────────┬─────────┘        │  │ python │  │ node   │.. │
//!               │                  │  └────────┘  └────────┘   │
//!        warm: exec                └─────▲──────────────▲──────┘
//!        cold: create/start/wait         │ fill         │ remove
//!               │                   monitor tick    EventWatcher
//!               ▼                        │              │
//!     ┌─────────────────────────────────────────────────────────┐
//!     │                  ContainerRuntime (Docker)              │
//!     └─────────────────────────────────────────────────────────┘
//! ```

pub mod container_pool;
pub mod container_runtime;
pub mod docker;
pub mod engine;
pub mod event_watcher;
pub mod pool_registry;
pub mod resource_limiter;
pub mod run;
pub mod sandbox;
pub mod timeout;
pub mod volume;

#[cfg(test)]
pub(crate) mod fake;

// Re-export commonly used types
pub use container_pool::{ContainerHandle, Pool, PoolConfig, PoolStats};
pub use container_runtime::{ensure_images, ContainerRuntime, ContainerSpec, LifecycleEvent};
pub use docker::DockerRuntime;
pub use engine::ExecutionEngine;
pub use event_watcher::EventWatcher;
pub use pool_registry::PoolRegistry;
pub use resource_limiter::{ResourceLimiter, ResourceLimits};
pub use run::{ExecutionPath, Run, RunContext, RunRequest, RunResult, RunState};
pub use sandbox::{Sandbox, SandboxConfig};
pub use timeout::TimeoutWrapper;
pub use volume::VolumeStore;
