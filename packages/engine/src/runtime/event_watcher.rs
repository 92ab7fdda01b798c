// packages/engine/src/runtime/event_watcher.rs
//! Pool reconciliation from runtime lifecycle events
//!
//! A pooled container can die outside the pool's control (OOM, standby
//! sleep expiring, manual `docker rm`). The watcher consumes the runtime's
//! event stream on a single task and evicts such containers from whichever
//! pool holds them; the monitor loop then replaces them.

use crate::runtime::container_runtime::{ContainerRuntime, LifecycleEvent};
use crate::runtime::pool_registry::PoolRegistry;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pause before resubscribing when the event stream ends
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

pub struct EventWatcher {
    runtime: Arc<dyn ContainerRuntime>,
    registry: Arc<PoolRegistry>,
}

impl EventWatcher {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, registry: Arc<PoolRegistry>) -> Self {
        Self { runtime, registry }
    }

    /// Apply one event; returns whether a pool member was evicted
    ///
    /// Duplicate events, events without an id and events for containers no
    /// pool owns are all ignored.
    pub fn handle_event(&self, event: &LifecycleEvent) -> bool {
        if event.container_id.is_empty() || !event.is_terminal() {
            return false;
        }

        match self.registry.owner_of(&event.container_id) {
            Some(pool) => {
                info!(
                    "Pool container {} got {} ({})",
                    event.container_id,
                    event.action,
                    pool.image()
                );
                pool.remove(&event.container_id)
            }
            None => false,
        }
    }

    /// Consume events until shutdown
    pub async fn run(self, shutdown: CancellationToken) {
        loop {
            let mut events = self.runtime.events();
            debug!("Subscribed to container events");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    next = events.next() => match next {
                        Some(Ok(event)) => {
                            self.handle_event(&event);
                        }
                        Some(Err(e)) => {
                            warn!("Unreadable container event: {}", e);
                        }
                        None => break,
                    }
                }
            }

            warn!("Container event stream ended, resubscribing");
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => {}
            }
        }
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
