// packages/engine/src/runtime/timeout.rs
//! Deadline around a run's execute step
//!
//! The work runs on its own task. When the deadline fires first the task is
//! aborted and the run destroyed right away, so a timed-out container does
//! not keep running until the caller gets around to cleaning up.

use crate::runtime::run::{Run, RunResult};
use crate::utils::errors::{format_duration, EngineError, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct TimeoutWrapper {
    limit: Duration,
}

impl TimeoutWrapper {
    pub fn new(limit: Duration) -> Self {
        Self { limit }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    /// Set up and execute `run`, bounded by the deadline
    pub async fn run(&self, run: Arc<Run>) -> Result<RunResult> {
        let mut worker = {
            let run = Arc::clone(&run);
            tokio::spawn(async move { run.perform().await })
        };

        match tokio::time::timeout(self.limit, &mut worker).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(EngineError::Internal(format!(
                "run {} task failed: {}",
                run.id(),
                e
            ))),
            Err(_) => {
                worker.abort();
                // Wait for the task to be dropped so it cannot record a
                // container after destroy has run
                let _ = worker.await;

                warn!(
                    "Run {} timed out after {}",
                    run.id(),
                    format_duration(self.limit)
                );
                metrics::counter!("sandrun_run_timeouts_total").increment(1);

                run.destroy().await;
                Err(EngineError::ExecutionTimeout(self.limit))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::fake::{FakeBehavior, FakeRuntime};
    use crate::runtime::pool_registry::PoolRegistry;
    use crate::runtime::resource_limiter::ResourceLimits;
    use crate::runtime::run::{RunContext, RunRequest, RunState};
    use crate::runtime::sandbox::Sandbox;
    use crate::runtime::volume::VolumeStore;
    use tokio::time::Instant;

    const IMAGE: &str = "alpine:latest";

    fn make_run(runtime: Arc<FakeRuntime>, root: &std::path::Path) -> Arc<Run> {
        let ctx = RunContext {
            runtime,
            pools: Arc::new(PoolRegistry::empty()),
            volumes: VolumeStore::new(root),
            sandbox: Sandbox::default(),
        };
        let request = RunRequest {
            filename: "main.sh".into(),
            content: "sleep 20".into(),
            command: "sh main.sh".into(),
            image: IMAGE.into(),
            ..Default::default()
        };
        Arc::new(Run::new(ctx, request, ResourceLimits::default()))
    }

    #[tokio::test]
    async fn test_completes_within_deadline() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::with_images(&[IMAGE]));
        runtime.set_behavior(FakeBehavior {
            output: b"ok\n".to_vec(),
            ..Default::default()
        });

        let run = make_run(runtime, root.path());
        let result = TimeoutWrapper::new(Duration::from_secs(5))
            .run(Arc::clone(&run))
            .await
            .unwrap();

        assert_eq!(result.output, b"ok\n");
        assert_eq!(run.state(), RunState::Completed);
        run.destroy().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_run_times_out_promptly() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::with_images(&[IMAGE]));
        runtime.set_behavior(FakeBehavior {
            delay: Duration::from_secs(20),
            ..Default::default()
        });

        let run = make_run(runtime.clone(), root.path());
        let started = Instant::now();
        let err = TimeoutWrapper::new(Duration::from_secs(1))
            .run(Arc::clone(&run))
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, EngineError::ExecutionTimeout(d) if d == Duration::from_secs(1)));
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_secs(2), "took {:?}", elapsed);

        // The container it was waiting on is gone, and so is the volume
        assert_eq!(runtime.created_count(), 1);
        assert_eq!(runtime.live_containers(), 0);
        assert_eq!(run.state(), RunState::Destroyed);
        assert!(!run.volume().exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_during_create_removes_container() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::with_images(&[IMAGE]));
        runtime.set_behavior(FakeBehavior {
            create_delay: Duration::from_secs(3),
            ..Default::default()
        });

        let run = make_run(runtime.clone(), root.path());
        let err = TimeoutWrapper::new(Duration::from_secs(1))
            .run(Arc::clone(&run))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::ExecutionTimeout(_)));
        assert!(run.container_id().is_none());
        assert_eq!(runtime.created_count(), 1);
        assert_eq!(runtime.live_containers(), 0);
        assert!(!run.volume().exists());
    }
}
