// packages/engine/src/runtime/engine.rs
//! Execution engine: one call per admitted request

use crate::runtime::container_runtime::{ContainerRole, LABEL_ROLE};
use crate::runtime::pool_registry::PoolRegistry;
use crate::runtime::resource_limiter::ResourceLimiter;
use crate::runtime::run::{Run, RunContext, RunRequest, RunResult};
use crate::runtime::timeout::TimeoutWrapper;
use crate::utils::errors::{EngineError, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Turns requests into runs and guarantees their cleanup
pub struct ExecutionEngine {
    ctx: RunContext,
    limiter: ResourceLimiter,
    timeout: TimeoutWrapper,
}

impl ExecutionEngine {
    pub fn new(ctx: RunContext, limiter: ResourceLimiter, timeout: TimeoutWrapper) -> Self {
        Self {
            ctx,
            limiter,
            timeout,
        }
    }

    pub fn pools(&self) -> &Arc<PoolRegistry> {
        &self.ctx.pools
    }

    pub fn limiter(&self) -> &ResourceLimiter {
        &self.limiter
    }

    pub fn timeout(&self) -> &TimeoutWrapper {
        &self.timeout
    }

    /// Execute a request end to end
    ///
    /// The run is destroyed on every exit path, success or not. The run and
    /// its cleanup live on their own task, so dropping the returned future
    /// (a client hanging up) detaches the run instead of abandoning it.
    pub async fn execute(&self, request: RunRequest) -> Result<RunResult> {
        let limits = self.limiter.limits_for(request.memory_limit);
        let run = Arc::new(Run::new(self.ctx.clone(), request, limits));
        let id = run.id().to_string();

        let task = tokio::spawn(supervise(run, self.timeout));
        task.await
            .map_err(|e| EngineError::Internal(format!("run {} task failed: {}", id, e)))?
    }

    /// Remove run containers left behind by an earlier process
    ///
    /// Only meaningful at startup, before any request is admitted.
    pub async fn sweep_orphans(&self) -> Result<usize> {
        let runtime = &self.ctx.runtime;
        let mut removed = 0;

        for container in runtime.list_containers().await? {
            let is_run = container
                .labels
                .get(LABEL_ROLE)
                .map(|role| role == ContainerRole::Run.as_str())
                .unwrap_or(false);
            if !is_run {
                continue;
            }

            match runtime.remove_container(&container.id).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove orphaned container {}: {}", container.id, e),
            }
        }

        if removed > 0 {
            info!("Removed {} orphaned run containers", removed);
        }
        Ok(removed)
    }
}

/// Drive `run` under the deadline, then release it
async fn supervise(run: Arc<Run>, timeout: TimeoutWrapper) -> Result<RunResult> {
    debug!(
        "Run {} starting for image {} ({})",
        run.id(),
        run.request().image,
        run.request().command
    );

    let result = timeout.run(Arc::clone(&run)).await;
    run.destroy().await;

    match &result {
        Ok(r) => info!(
            "Run {} finished via {} path: exit {} in {}",
            run.id(),
            run.path().map(|p| p.as_str()).unwrap_or("unknown"),
            r.exit_code,
            r.duration_string()
        ),
        Err(e) => {
            warn!("Run {} failed: {}", run.id(), e);
            metrics::counter!("sandrun_run_failures_total", "kind" => e.kind().as_str())
                .increment(1);
        }
    }

    result
}
