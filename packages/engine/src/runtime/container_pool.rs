// packages/engine/src/runtime/container_pool.rs
//! Warm container pool for a single image
//!
//! Instead of creating a container per request, each configured image keeps
//! a small set of started "standby" containers idling on a long sleep. A run
//! takes one out with [`Pool::get`] and executes inside it; the reconciliation
//! loop ([`Pool::monitor`]) tops the pool back up.
//!
//! # Architecture
//!
//! ```text
//! Pool (python:3-alpine, capacity 4)
//! ├─ Idle: {c1, c2, c3}          (mutex-guarded map, id → handle)
//! ├─ Get()     → removes one idle handle, ownership moves to the run
//! ├─ Remove()  → event watcher evicts a dead member, destroyed async
//! └─ Monitor() → every 3s: deficit = capacity - len, Add() × deficit
//! ```
//!
//! # Consistency
//!
//! `fill` snapshots the size without holding the lock across the adds, so a
//! concurrent `get` or event-driven `remove` may leave the pool briefly over
//! or under capacity. The next tick corrects it; capacity is a target, not a
//! ceiling.

use crate::runtime::container_runtime::{ContainerRole, ContainerRuntime, LABEL_ID, LABEL_ROLE};
use crate::runtime::resource_limiter::ResourceLimits;
use crate::runtime::sandbox::Sandbox;
use crate::runtime::volume::VolumeStore;
use crate::utils::errors::{EngineError, Result};
use crate::utils::ids::new_id;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Standby durations below this are replaced by [`DEFAULT_STANDBY`]
pub const MIN_STANDBY: Duration = Duration::from_secs(60);

/// Standby containers are meant to idle until they are used
pub const DEFAULT_STANDBY: Duration = Duration::from_secs(24 * 60 * 60);

/// Reconciliation tick
pub const DEFAULT_REFILL_INTERVAL: Duration = Duration::from_secs(3);

/// Configuration for one image pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Image every member runs
    pub image: String,

    /// Target number of idle containers
    pub capacity: usize,

    /// How long a standby container sleeps before exiting on its own
    pub standby: Duration,

    /// Interval between `fill` passes
    pub refill_interval: Duration,

    /// Limits applied to every member
    pub limits: ResourceLimits,
}

impl PoolConfig {
    pub fn new(image: impl Into<String>, capacity: usize) -> Self {
        Self {
            image: image.into(),
            capacity,
            standby: DEFAULT_STANDBY,
            refill_interval: DEFAULT_REFILL_INTERVAL,
            limits: ResourceLimits::default(),
        }
    }

    pub fn with_standby(mut self, standby: Duration) -> Self {
        self.standby = standby;
        self
    }

    pub fn with_refill_interval(mut self, interval: Duration) -> Self {
        self.refill_interval = interval;
        self
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }
}

/// A container owned either by a pool (idle) or by a run (acquired)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    /// Runtime-assigned container id
    pub id: String,

    /// 20-byte hex id, also the `sandrun.id` label and the volume name
    pub internal_id: String,

    /// Host directory bound at `/code` and `/tmp`
    pub volume: PathBuf,

    pub image: String,
    pub limits: ResourceLimits,
}

/// Pool of started standby containers for one image
pub struct Pool {
    config: PoolConfig,
    runtime: Arc<dyn ContainerRuntime>,
    volumes: VolumeStore,
    sandbox: Sandbox,

    /// Idle, unassigned members keyed by runtime id
    containers: Mutex<HashMap<String, ContainerHandle>>,
}

impl Pool {
    /// Create a pool, failing when the image is unknown to the runtime
    pub async fn new(
        mut config: PoolConfig,
        runtime: Arc<dyn ContainerRuntime>,
        volumes: VolumeStore,
        sandbox: Sandbox,
    ) -> Result<Self> {
        if !runtime.image_exists(&config.image).await? {
            return Err(EngineError::RuntimeUnavailable(format!(
                "invalid image: {}",
                config.image
            )));
        }

        if config.standby < MIN_STANDBY {
            debug!(
                "Standby {:?} for {} is too short, using {:?}",
                config.standby, config.image, DEFAULT_STANDBY
            );
            config.standby = DEFAULT_STANDBY;
        }

        info!(
            "Initializing pool for {} with capacity {}",
            config.image, config.capacity
        );

        Ok(Self {
            config,
            runtime,
            volumes,
            sandbox,
            containers: Mutex::new(HashMap::new()),
        })
    }

    pub fn image(&self) -> &str {
        &self.config.image
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Number of idle members
    pub fn len(&self) -> usize {
        self.containers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn exists(&self, id: &str) -> bool {
        self.containers.lock().contains_key(id)
    }

    /// Adopt running standby containers left behind by a previous process
    ///
    /// Safe to call repeatedly; already-known members are overwritten with
    /// identical handles.
    pub async fn load(&self) -> Result<usize> {
        let listed = self.runtime.list_containers().await?;

        let adopted: Vec<ContainerHandle> = listed
            .into_iter()
            .filter(|c| c.image == self.config.image)
            .filter(|c| {
                c.labels.get(LABEL_ROLE).map(String::as_str)
                    == Some(ContainerRole::Standby.as_str())
            })
            .filter_map(|c| {
                let internal_id = c.labels.get(LABEL_ID).filter(|id| !id.is_empty())?.clone();
                if !c.running {
                    debug!("Skipping stopped standby container {}", c.id);
                    return None;
                }
                Some(ContainerHandle {
                    volume: self.volumes.path_for(&internal_id),
                    id: c.id,
                    internal_id,
                    image: self.config.image.clone(),
                    limits: self.config.limits,
                })
            })
            .collect();

        let count = adopted.len();
        {
            let mut containers = self.containers.lock();
            for handle in adopted {
                containers.insert(handle.id.clone(), handle);
            }
        }

        if count > 0 {
            info!("Adopted {} existing containers into {} pool", count, self.config.image);
        }
        self.record_size();

        Ok(count)
    }

    /// Create, start and register one standby container
    pub async fn add(&self) -> Result<String> {
        let internal_id = new_id();
        let volume = self.volumes.create(&internal_id).await?;

        let spec = self.sandbox.standby_spec(
            &self.config.image,
            &internal_id,
            &volume,
            &self.config.limits,
            self.config.standby,
        );

        let id = match self.runtime.create_container(&spec).await {
            Ok(id) => id,
            Err(e) => {
                self.discard_volume(&volume).await;
                return Err(e);
            }
        };

        if let Err(e) = self.runtime.start_container(&id).await {
            discard(
                self.runtime.as_ref(),
                &self.volumes,
                &ContainerHandle {
                    id: id.clone(),
                    internal_id,
                    volume,
                    image: self.config.image.clone(),
                    limits: self.config.limits,
                },
            )
            .await;
            return Err(e);
        }

        let handle = ContainerHandle {
            id: id.clone(),
            internal_id,
            volume,
            image: self.config.image.clone(),
            limits: self.config.limits,
        };

        self.containers.lock().insert(id.clone(), handle);
        self.record_size();

        debug!("Added standby container {} to {} pool", id, self.config.image);
        Ok(id)
    }

    /// Top the pool up to capacity, returning how many containers were added
    ///
    /// Each failing `add` is logged and the remaining ones still run; there
    /// is no backoff, the next tick simply tries again.
    pub async fn fill(&self) -> usize {
        let deficit = self.config.capacity.saturating_sub(self.len());
        if deficit == 0 {
            return 0;
        }

        info!("Adding {} containers to {} pool", deficit, self.config.image);

        let mut added = 0;
        for _ in 0..deficit {
            match self.add().await {
                Ok(_) => added += 1,
                Err(e) => {
                    warn!("Error while adding to {} pool: {}", self.config.image, e);
                    metrics::counter!(
                        "sandrun_pool_add_failures_total",
                        "image" => self.config.image.clone()
                    )
                    .increment(1);
                }
            }
        }

        added
    }

    /// Reconciliation loop: `fill` every refill interval until shutdown
    pub async fn monitor(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.refill_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Pool monitor for {} stopped", self.config.image);
                    break;
                }
                _ = ticker.tick() => {
                    self.fill().await;
                }
            }
        }
    }

    pub fn spawn_monitor(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).monitor(shutdown))
    }

    /// Take one arbitrary idle container out of the pool
    ///
    /// Never blocks; an empty pool yields [`EngineError::PoolExhausted`].
    pub fn get(&self) -> Result<ContainerHandle> {
        let handle = {
            let mut containers = self.containers.lock();
            let id = containers
                .keys()
                .next()
                .cloned()
                .ok_or(EngineError::PoolExhausted)?;
            containers.remove(&id).ok_or(EngineError::PoolExhausted)?
        };

        self.record_size();
        debug!("Acquired container {} from {} pool", handle.id, self.config.image);
        Ok(handle)
    }

    /// Evict a member and destroy it in the background
    ///
    /// Unknown ids are ignored. Returns whether the id was a member.
    pub fn remove(&self, id: &str) -> bool {
        let handle = self.containers.lock().remove(id);

        match handle {
            Some(handle) => {
                let runtime = Arc::clone(&self.runtime);
                let volumes = self.volumes.clone();
                tokio::spawn(async move {
                    discard(runtime.as_ref(), &volumes, &handle).await;
                });
                self.record_size();
                true
            }
            None => false,
        }
    }

    /// Snapshot of the pool
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            image: self.config.image.clone(),
            capacity: self.config.capacity,
            idle: self.len(),
        }
    }

    async fn discard_volume(&self, volume: &std::path::Path) {
        if let Err(e) = self.volumes.remove(volume).await {
            warn!("{}", e);
        }
    }

    fn record_size(&self) {
        metrics::gauge!("sandrun_pool_idle", "image" => self.config.image.clone())
            .set(self.len() as f64);
    }
}

/// Force-remove a container and its volume, logging failures
pub(crate) async fn discard(
    runtime: &dyn ContainerRuntime,
    volumes: &VolumeStore,
    handle: &ContainerHandle,
) {
    if let Err(e) = runtime.remove_container(&handle.id).await {
        warn!("Failed to remove container {}: {}", handle.id, e);
        metrics::counter!("sandrun_cleanup_failures_total").increment(1);
    }
    if let Err(e) = volumes.remove(&handle.volume).await {
        warn!("{}", e);
        metrics::counter!("sandrun_cleanup_failures_total").increment(1);
    }
}

/// Pool statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub image: String,
    pub capacity: usize,
    pub idle: usize,
}
