// packages/engine/src/runtime/pool_registry.rs
//! Registry of warm pools, one per image
//!
//! Built once at startup and shared by reference with the execution engine,
//! the event watcher and the monitor tasks. Membership is fixed after
//! construction; only each pool's contents change.

use crate::runtime::container_pool::{ContainerHandle, Pool, PoolConfig, PoolStats};
use crate::runtime::container_runtime::ContainerRuntime;
use crate::runtime::resource_limiter::ResourceLimits;
use crate::runtime::sandbox::Sandbox;
use crate::runtime::volume::VolumeStore;
use crate::utils::config::PoolSettings;
use crate::utils::errors::{EngineError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Default)]
pub struct PoolRegistry {
    pools: HashMap<String, Arc<Pool>>,
}

impl PoolRegistry {
    /// Registry with no pools; every run takes the cold path
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create and load a pool for each configured image
    ///
    /// Any pool failing to initialize aborts the whole build.
    pub async fn from_settings(
        settings: &[PoolSettings],
        runtime: Arc<dyn ContainerRuntime>,
        volumes: VolumeStore,
        sandbox: Sandbox,
        limits: ResourceLimits,
        refill_interval: Duration,
    ) -> Result<Self> {
        let mut registry = Self::empty();

        for entry in settings {
            info!("Initializing pool for: {}", entry.image);

            let config = PoolConfig::new(&entry.image, entry.capacity)
                .with_standby(Duration::from_secs(entry.standby_secs))
                .with_refill_interval(refill_interval)
                .with_limits(limits);

            let pool = Pool::new(
                config,
                Arc::clone(&runtime),
                volumes.clone(),
                sandbox.clone(),
            )
            .await?;
            pool.load().await?;

            registry.insert(Arc::new(pool))?;
        }

        Ok(registry)
    }

    /// Register a pool; one pool per image
    pub fn insert(&mut self, pool: Arc<Pool>) -> Result<()> {
        let image = pool.image().to_string();
        if self.pools.contains_key(&image) {
            return Err(EngineError::Internal(format!(
                "duplicate pool for image {}",
                image
            )));
        }
        self.pools.insert(image, pool);
        Ok(())
    }

    pub fn get(&self, image: &str) -> Option<&Arc<Pool>> {
        self.pools.get(image)
    }

    /// Take an idle container for `image`
    ///
    /// A missing pool and an empty pool both yield [`EngineError::PoolExhausted`].
    pub fn acquire(&self, image: &str) -> Result<ContainerHandle> {
        self.pools
            .get(image)
            .ok_or(EngineError::PoolExhausted)?
            .get()
    }

    /// Pool currently holding `container_id` as an idle member
    pub fn owner_of(&self, container_id: &str) -> Option<&Arc<Pool>> {
        self.pools.values().find(|pool| pool.exists(container_id))
    }

    /// Start one reconciliation loop per pool
    pub fn spawn_monitors(&self, shutdown: &CancellationToken) -> Vec<JoinHandle<()>> {
        self.pools
            .values()
            .map(|pool| pool.spawn_monitor(shutdown.child_token()))
            .collect()
    }

    pub fn pools(&self) -> impl Iterator<Item = &Arc<Pool>> {
        self.pools.values()
    }

    pub fn images(&self) -> impl Iterator<Item = &str> {
        self.pools.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    pub fn stats(&self) -> Vec<PoolStats> {
        self.pools.values().map(|pool| pool.stats()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::fake::FakeRuntime;

    const PY: &str = "python:3-alpine";
    const RB: &str = "ruby:3-alpine";

    fn settings(image: &str, capacity: usize) -> PoolSettings {
        PoolSettings {
            image: image.to_string(),
            capacity,
            standby_secs: 0,
        }
    }

    async fn registry(runtime: Arc<FakeRuntime>, root: &std::path::Path) -> Result<PoolRegistry> {
        PoolRegistry::from_settings(
            &[settings(PY, 2), settings(RB, 1)],
            runtime,
            VolumeStore::new(root),
            Sandbox::default(),
            ResourceLimits::default(),
            Duration::from_secs(3),
        )
        .await
    }

    #[tokio::test]
    async fn test_from_settings() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::with_images(&[PY, RB]));
        let registry = registry(runtime, root.path()).await.unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(PY).unwrap().capacity(), 2);
        assert!(registry.get("node:20").is_none());
    }

    #[tokio::test]
    async fn test_missing_image_is_fatal() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::with_images(&[PY]));
        assert!(matches!(
            registry(runtime, root.path()).await,
            Err(EngineError::RuntimeUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_acquire_and_owner_lookup() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::with_images(&[PY, RB]));
        let registry = registry(runtime, root.path()).await.unwrap();

        assert!(matches!(registry.acquire(PY), Err(EngineError::PoolExhausted)));
        assert!(matches!(registry.acquire("node:20"), Err(EngineError::PoolExhausted)));

        let id = registry.get(RB).unwrap().add().await.unwrap();
        assert_eq!(registry.owner_of(&id).unwrap().image(), RB);
        assert!(registry.owner_of("unknown").is_none());

        let handle = registry.acquire(RB).unwrap();
        assert_eq!(handle.id, id);
        assert!(registry.owner_of(&id).is_none());
    }

    #[tokio::test]
    async fn test_duplicate_pool_rejected() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::with_images(&[PY]));
        let result = PoolRegistry::from_settings(
            &[settings(PY, 1), settings(PY, 2)],
            runtime,
            VolumeStore::new(root.path()),
            Sandbox::default(),
            ResourceLimits::default(),
            Duration::from_secs(3),
        )
        .await;
        assert!(result.is_err());
    }
}
