// packages/engine/src/runtime/run.rs
//! Lifecycle of a single execution request
//!
//! ```text
//! Created ──setup──▶ Setup ──execute──▶ Executing ──▶ Completed
//!    │                 │                    │
//!    └──── failure ────┴────────────────────┴───────▶ Failed
//!
//! destroy() is valid from every state and idempotent.
//! ```
//!
//! Setup prefers an idle pool container for the image (warm path, an exec
//! session in an already-running container) and falls back to creating a
//! dedicated container (cold path). An exhausted or missing pool is not an
//! error, only slower.

use crate::runtime::container_pool::ContainerHandle;
use crate::runtime::container_runtime::{ContainerRuntime, LABEL_ID};
use crate::runtime::pool_registry::PoolRegistry;
use crate::runtime::resource_limiter::ResourceLimits;
use crate::runtime::sandbox::Sandbox;
use crate::runtime::volume::VolumeStore;
use crate::utils::errors::{format_duration, EngineError, Result};
use crate::utils::ids::new_id;
use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A validated request, with image and command already resolved
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub filename: String,
    pub content: String,
    pub command: String,
    pub image: String,

    /// Streamed to the process's stdin on the warm path
    pub input: String,

    /// Requested memory limit in bytes
    pub memory_limit: Option<i64>,

    /// `KEY=VALUE` entries
    pub env: Vec<String>,

    /// Skip the warm pool and always use a fresh container
    pub clean: bool,
}

/// Outcome of a run; duration covers only the execute step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunResult {
    pub exit_code: i64,
    pub output: Vec<u8>,
    #[serde(skip)]
    pub duration: Duration,
}

impl RunResult {
    pub fn duration_string(&self) -> String {
        format_duration(self.duration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Created,
    Setup,
    Executing,
    Completed,
    Failed,
    Destroyed,
}

/// Which execution path setup selected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPath {
    /// Exec session inside an idle pool container
    Warm,
    /// Dedicated container created for this run
    Cold,
}

impl ExecutionPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionPath::Warm => "warm",
            ExecutionPath::Cold => "cold",
        }
    }
}

/// Collaborators shared by every run
#[derive(Clone)]
pub struct RunContext {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub pools: Arc<PoolRegistry>,
    pub volumes: VolumeStore,
    pub sandbox: Sandbox,
}

struct RunInner {
    state: RunState,
    path: Option<ExecutionPath>,

    /// Container created or acquired for this run, until destroyed
    container: Option<ContainerHandle>,

    /// A cold create was issued; the daemon may hold a container for this
    /// run even when no handle got recorded
    create_issued: bool,
}

/// One request's execution
pub struct Run {
    id: String,
    volume: PathBuf,
    request: RunRequest,
    limits: ResourceLimits,
    ctx: RunContext,
    inner: Mutex<RunInner>,
}

impl Run {
    pub fn new(ctx: RunContext, request: RunRequest, limits: ResourceLimits) -> Self {
        let id = new_id();
        let volume = ctx.volumes.path_for(&id);

        Self {
            id,
            volume,
            request,
            limits,
            ctx,
            inner: Mutex::new(RunInner {
                state: RunState::Created,
                path: None,
                container: None,
                create_issued: false,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn request(&self) -> &RunRequest {
        &self.request
    }

    /// The run's own volume directory
    pub fn volume(&self) -> &Path {
        &self.volume
    }

    pub fn state(&self) -> RunState {
        self.inner.lock().state
    }

    pub fn path(&self) -> Option<ExecutionPath> {
        self.inner.lock().path
    }

    /// Runtime id of the container currently owned by this run
    pub fn container_id(&self) -> Option<String> {
        self.inner.lock().container.as_ref().map(|c| c.id.clone())
    }

    /// Setup followed by execution of the selected path
    pub async fn perform(&self) -> Result<RunResult> {
        self.setup().await?;
        self.execute().await
    }

    /// Prepare the volume and pick a warm or cold container
    pub async fn setup(&self) -> Result<ExecutionPath> {
        self.transition(RunState::Created, RunState::Setup)?;

        let result = self.prepare().await;
        if result.is_err() {
            self.set_state(RunState::Failed);
        }
        result
    }

    async fn prepare(&self) -> Result<ExecutionPath> {
        let volumes = &self.ctx.volumes;

        volumes.create(&self.id).await?;
        volumes
            .write_file(&self.volume, &self.request.filename, self.request.content.as_bytes())
            .await?;

        if let Some(handle) = self.acquire_warm() {
            debug!(
                "Got warmed-up container {} for image {}",
                handle.id, self.request.image
            );
            // Hand ownership to the run before anything can fail
            let target = handle.volume.clone();
            self.record_container(handle, ExecutionPath::Warm);

            volumes
                .write_file(&target, &self.request.filename, self.request.content.as_bytes())
                .await?;
            return Ok(ExecutionPath::Warm);
        }

        debug!("Setting up container for image {}", self.request.image);
        let spec = self.ctx.sandbox.run_spec(
            &self.request.image,
            &self.id,
            &self.volume,
            &self.limits,
            &self.request.command,
            &self.request.env,
        );

        self.inner.lock().create_issued = true;
        let container_id = self
            .ctx
            .runtime
            .create_container(&spec)
            .await
            .map_err(|e| match e {
                EngineError::Validation(_) | EngineError::RuntimeUnavailable(_) => e,
                other => EngineError::setup(other),
            })?;

        self.record_container(
            ContainerHandle {
                id: container_id,
                internal_id: self.id.clone(),
                volume: self.volume.clone(),
                image: self.request.image.clone(),
                limits: self.limits,
            },
            ExecutionPath::Cold,
        );

        Ok(ExecutionPath::Cold)
    }

    /// Fallback policy: any failure to get a pool container means cold path
    fn acquire_warm(&self) -> Option<ContainerHandle> {
        if self.request.clean {
            return None;
        }

        match self.ctx.pools.acquire(&self.request.image) {
            Ok(handle) => Some(handle),
            Err(EngineError::PoolExhausted) => None,
            Err(e) => {
                debug!("Pool acquisition for {} failed: {}", self.request.image, e);
                None
            }
        }
    }

    fn record_container(&self, handle: ContainerHandle, path: ExecutionPath) {
        let mut inner = self.inner.lock();
        inner.container = Some(handle);
        inner.path = Some(path);
    }

    /// Run the path chosen by [`setup`](Self::setup)
    pub async fn execute(&self) -> Result<RunResult> {
        self.transition(RunState::Setup, RunState::Executing)?;

        let (path, container) = {
            let inner = self.inner.lock();
            (inner.path, inner.container.as_ref().map(|c| c.id.clone()))
        };

        let result = match (path, container) {
            (Some(ExecutionPath::Warm), Some(id)) => self.execute_warm(&id).await,
            (Some(ExecutionPath::Cold), Some(id)) => self.execute_cold(&id).await,
            _ => Err(EngineError::Internal("run has no container".into())),
        };

        match &result {
            Ok(_) => {
                self.set_state(RunState::Completed);
                if let Some(path) = path {
                    metrics::counter!("sandrun_runs_total", "path" => path.as_str())
                        .increment(1);
                }
            }
            Err(_) => self.set_state(RunState::Failed),
        }

        result
    }

    async fn execute_warm(&self, container_id: &str) -> Result<RunResult> {
        let cmd = self.ctx.sandbox.shell_command(&self.request.command);
        let started = Instant::now();

        let exec = self
            .ctx
            .runtime
            .exec(
                container_id,
                cmd,
                self.request.env.clone(),
                self.request.input.as_bytes(),
            )
            .await?;

        Ok(RunResult {
            exit_code: exec.exit_code,
            output: exec.output,
            duration: started.elapsed(),
        })
    }

    async fn execute_cold(&self, container_id: &str) -> Result<RunResult> {
        let runtime = &self.ctx.runtime;
        let started = Instant::now();

        runtime.start_container(container_id).await?;
        let exit_code = runtime.wait_container(container_id).await?;
        let output = runtime.logs(container_id).await?;

        Ok(RunResult {
            exit_code,
            output,
            duration: started.elapsed(),
        })
    }

    /// Release everything this run allocated
    ///
    /// Idempotent and valid in any state. Failures are logged, never returned.
    pub async fn destroy(&self) {
        let (container, create_issued) = {
            let mut inner = self.inner.lock();
            inner.state = RunState::Destroyed;
            let create_issued = std::mem::take(&mut inner.create_issued);
            (inner.container.take(), create_issued)
        };

        match container {
            Some(container) => {
                self.remove_container(&container.id).await;

                // Warm containers bring their own volume
                if container.volume != self.volume {
                    self.remove_volume(&container.volume).await;
                }
            }
            // Setup was cut short while the create call was in flight
            None if create_issued => self.remove_labelled_containers().await,
            None => {}
        }

        // Removing a directory that was never created is a no-op
        self.remove_volume(&self.volume).await;
    }

    async fn remove_container(&self, id: &str) {
        if let Err(e) = self.ctx.runtime.remove_container(id).await {
            warn!("Failed to remove container {}: {}", id, e);
            metrics::counter!("sandrun_cleanup_failures_total").increment(1);
        }
    }

    /// Remove any container carrying this run's id label
    async fn remove_labelled_containers(&self) {
        let containers = match self.ctx.runtime.list_containers().await {
            Ok(containers) => containers,
            Err(e) => {
                warn!("Failed to list containers for run {}: {}", self.id, e);
                metrics::counter!("sandrun_cleanup_failures_total").increment(1);
                return;
            }
        };

        for container in containers {
            if container.labels.get(LABEL_ID).map(String::as_str) == Some(self.id.as_str()) {
                debug!("Removing unrecorded container {} of run {}", container.id, self.id);
                self.remove_container(&container.id).await;
            }
        }
    }

    async fn remove_volume(&self, volume: &Path) {
        if let Err(e) = self.ctx.volumes.remove(volume).await {
            warn!("{}", e);
            metrics::counter!("sandrun_cleanup_failures_total").increment(1);
        }
    }

    fn transition(&self, from: RunState, to: RunState) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state != from {
            return Err(EngineError::Internal(format!(
                "run {} cannot move from {:?} to {:?}",
                self.id, inner.state, to
            )));
        }
        inner.state = to;
        Ok(())
    }

    fn set_state(&self, state: RunState) {
        let mut inner = self.inner.lock();
        // A concurrent destroy wins
        if inner.state != RunState::Destroyed {
            inner.state = state;
        }
    }
}
