// packages/engine/src/main.rs
//! Sandrun code execution service
//!
//! Runs submitted source files in throwaway containers, keeping a warm pool
//! of standby containers per image to cut start-up latency.

use anyhow::{Context, Result};
use sandrun_engine::admission::Throttler;
use sandrun_engine::api::{ApiServer, LanguageRegistry, RequestParser};
use sandrun_engine::observability::{init_metrics, init_tracing, LogFormat};
use sandrun_engine::runtime::{
    ensure_images, ContainerRuntime, DockerRuntime, EventWatcher, ExecutionEngine, PoolRegistry,
    ResourceLimiter, RunContext, Sandbox, TimeoutWrapper, VolumeStore,
};
use sandrun_engine::utils::config::EngineConfig;
use sandrun_engine::BuildInfo;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = EngineConfig::load().context("Failed to load configuration")?;

    // Initialize observability (tracing, metrics)
    init_tracing(LogFormat::parse(&config.log_format)?)?;
    if config.metrics.enabled {
        init_metrics(config.metrics.listen)?;
        info!("Metrics available on {}", config.metrics.listen);
    }

    let build = BuildInfo::current();
    info!(
        "Starting sandrun v{} ({}, built {})",
        build.version, build.git_hash, build.build_timestamp
    );

    // Container runtime
    let docker = DockerRuntime::connect(config.docker.host.as_deref())?;
    docker
        .ping()
        .await
        .context("Container runtime is not reachable")?;
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(docker);

    // Languages and their images
    let languages = Arc::new(LanguageRegistry::load_or_builtin(
        config.languages_path.as_deref(),
    )?);
    info!("Loaded {} languages", languages.len());

    let mut images = languages.images();
    images.extend(config.pools.iter().map(|p| p.image.clone()));
    images.sort();
    images.dedup();
    ensure_images(runtime.as_ref(), &images, config.fetch_images)
        .await
        .context("Required images are missing")?;

    let volumes = VolumeStore::new(&config.shared_path);
    tokio::fs::create_dir_all(volumes.root())
        .await
        .with_context(|| format!("Failed to create {}", volumes.root().display()))?;

    let sandbox = Sandbox::default();
    let limiter = ResourceLimiter::from_config(&config.run);

    // Warm pools, fatal if any configured pool cannot start
    let pools = Arc::new(
        PoolRegistry::from_settings(
            &config.pools,
            Arc::clone(&runtime),
            volumes.clone(),
            sandbox.clone(),
            *limiter.default_limits(),
            config.pool_refill_interval(),
        )
        .await
        .context("Failed to initialize pools")?,
    );

    let shutdown = CancellationToken::new();
    let mut tasks = pools.spawn_monitors(&shutdown);
    tasks.push(
        EventWatcher::new(Arc::clone(&runtime), Arc::clone(&pools)).spawn(shutdown.child_token()),
    );

    let throttler = Arc::new(Throttler::from_config(&config.throttle));
    tasks.push(throttler.spawn_flush(config.throttle.flush_interval(), shutdown.child_token()));

    let engine = ExecutionEngine::new(
        RunContext {
            runtime,
            pools,
            volumes,
            sandbox,
        },
        limiter,
        TimeoutWrapper::new(config.run.timeout()),
    );
    if let Err(e) = engine.sweep_orphans().await {
        warn!("Failed to sweep orphaned containers: {}", e);
    }

    let parser = RequestParser::new(languages)?;
    let server = Arc::new(ApiServer::new(
        &config.server,
        Arc::new(engine),
        parser,
        throttler,
    ));
    let mut server_task = tokio::spawn(server.run(shutdown.child_token()));

    // Graceful shutdown handler
    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to install CTRL+C signal handler")?;
            info!("Received shutdown signal, cleaning up...");
            Ok(())
        }
        finished = &mut server_task => {
            match finished {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => {
                    error!("Server error: {}", e);
                    Err(e.into())
                }
                Err(e) => Err(anyhow::anyhow!("Server task failed: {}", e)),
            }
        }
    };

    shutdown.cancel();
    for task in tasks {
        let _ = task.await;
    }
    if !server_task.is_finished() {
        let _ = server_task.await;
    }

    info!("Server stopped");
    outcome
}
