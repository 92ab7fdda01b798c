// packages/engine/src/runtime/container_runtime.rs
//! Container runtime capability
//!
//! Everything the engine needs from the container runtime goes through
//! [`ContainerRuntime`]. Production uses [`DockerRuntime`](super::docker::DockerRuntime);
//! tests use an in-memory fake.

use crate::utils::errors::{EngineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::path::PathBuf;

/// Label carrying the internal 20-byte hex id of a container
pub const LABEL_ID: &str = "sandrun.id";

/// Label distinguishing pooled standby containers from per-run containers
pub const LABEL_ROLE: &str = "sandrun.role";

/// Role of a container created by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerRole {
    /// Idle pool member running a placeholder command
    Standby,
    /// Dedicated container for a single cold-path run
    Run,
}

impl ContainerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerRole::Standby => "standby",
            ContainerRole::Run => "run",
        }
    }
}

/// A host directory bind-mounted into the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub host_path: PathBuf,
    pub container_path: String,
}

impl BindMount {
    pub fn new(host_path: impl Into<PathBuf>, container_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
        }
    }

    /// `host:container` form understood by the runtime
    pub fn to_bind_string(&self) -> String {
        format!("{}:{}", self.host_path.display(), self.container_path)
    }
}

/// Everything needed to create one container
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: Option<String>,
    pub image: String,
    pub hostname: String,
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    pub labels: HashMap<String, String>,
    pub binds: Vec<BindMount>,
    pub working_dir: String,
    pub readonly_rootfs: bool,

    /// Memory limit in bytes
    pub memory_limit: i64,

    /// Memory + swap limit in bytes; equal to `memory_limit` disables swap
    pub memory_swap: i64,

    pub network_disabled: bool,
}

/// Container as reported by the runtime's listing
#[derive(Debug, Clone, Default)]
pub struct ContainerSummary {
    pub id: String,
    pub image: String,
    pub labels: HashMap<String, String>,
    pub running: bool,
}

/// Combined output and exit code of an exec session
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub output: Vec<u8>,
}

/// A container lifecycle event (`die`, `destroy`, `start`, ...)
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    pub action: String,
    pub container_id: String,
    pub time: Option<DateTime<Utc>>,
}

impl LifecycleEvent {
    pub fn new(action: impl Into<String>, container_id: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            container_id: container_id.into(),
            time: None,
        }
    }

    /// Whether the container is gone or no longer usable
    pub fn is_terminal(&self) -> bool {
        matches!(self.action.as_str(), "die" | "destroy")
    }
}

/// Container runtime operations consumed by the engine
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Whether `image` (as `repo:tag`) is known to the runtime
    async fn image_exists(&self, image: &str) -> Result<bool>;

    /// Pull `image` from its registry
    async fn pull_image(&self, image: &str) -> Result<()>;

    /// All containers, running or not
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>>;

    /// Create a container and return its runtime id
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start_container(&self, id: &str) -> Result<()>;

    /// Block until the container exits and return its exit code
    async fn wait_container(&self, id: &str) -> Result<i64>;

    /// Combined stdout + stderr of a container
    async fn logs(&self, id: &str) -> Result<Vec<u8>>;

    /// Run `cmd` in a running container with attached stdio
    ///
    /// `stdin` is streamed to the process, stdout and stderr are captured
    /// into a single buffer and the exit code is read back once it finishes.
    async fn exec(&self, id: &str, cmd: Vec<String>, env: Vec<String>, stdin: &[u8])
        -> Result<ExecOutput>;

    /// Force-remove a container along with its anonymous volumes
    async fn remove_container(&self, id: &str) -> Result<()>;

    /// Subscribe to container lifecycle events
    fn events(&self) -> BoxStream<'static, Result<LifecycleEvent>>;
}

/// Make sure every image is present, pulling missing ones when `fetch` is set
pub async fn ensure_images(runtime: &dyn ContainerRuntime, images: &[String], fetch: bool) -> Result<()> {
    for image in images {
        if runtime.image_exists(image).await? {
            continue;
        }

        if !fetch {
            return Err(EngineError::RuntimeUnavailable(format!(
                "image {} is not available",
                image
            )));
        }

        runtime.pull_image(image).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::fake::FakeRuntime;

    #[test]
    fn test_bind_string() {
        let bind = BindMount::new("/srv/shared/abc", "/code");
        assert_eq!(bind.to_bind_string(), "/srv/shared/abc:/code");
    }

    #[test]
    fn test_terminal_events() {
        assert!(LifecycleEvent::new("die", "c1").is_terminal());
        assert!(LifecycleEvent::new("destroy", "c1").is_terminal());
        assert!(!LifecycleEvent::new("start", "c1").is_terminal());
        assert!(!LifecycleEvent::new("exec_start: bash", "c1").is_terminal());
    }

    #[tokio::test]
    async fn test_ensure_images() {
        let runtime = FakeRuntime::with_images(&["alpine:latest"]);
        let images = vec!["alpine:latest".to_string(), "ruby:alpine".to_string()];

        let err = ensure_images(&runtime, &images, false).await.unwrap_err();
        assert!(matches!(err, EngineError::RuntimeUnavailable(_)));

        ensure_images(&runtime, &images, true).await.unwrap();
        assert!(runtime.image_exists("ruby:alpine").await.unwrap());
    }
}
