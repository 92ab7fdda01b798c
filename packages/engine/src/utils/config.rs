// packages/engine/src/utils/config.rs
//! Engine configuration
//!
//! Sources, lowest precedence first:
//! 1. Built-in defaults
//! 2. File named by `SANDRUN_CONFIG`, else `sandrun.toml` in the working directory
//! 3. Environment variables prefixed with `SANDRUN_` (nested keys use `__`)
//!
//! `DOCKER_HOST` and `SHARED_PATH` are honoured when the corresponding keys
//! are not set anywhere else.

use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "sandrun.toml";

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub server: ServerConfig,
    pub docker: DockerConfig,

    /// Host directory under which every run / standby volume is created
    pub shared_path: PathBuf,

    /// JSON language registry; built-ins are used when unset
    pub languages_path: Option<PathBuf>,

    /// Pull images that are missing at startup instead of failing
    pub fetch_images: bool,

    pub run: RunConfig,
    pub throttle: ThrottleConfig,
    pub pools: Vec<PoolSettings>,

    /// Seconds between pool reconciliation ticks
    pub pool_refill_interval_secs: u64,

    pub metrics: MetricsConfig,

    /// `pretty` or `json`
    pub log_format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub api_token: Option<String>,
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 5000)),
            api_token: None,
            max_body_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// `unix:///var/run/docker.sock`, `tcp://host:2375` or `http://host:2375`
    pub host: Option<String>,
}

/// Limits applied to every run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub timeout_secs: u64,

    /// Default memory limit in bytes
    pub memory_limit: i64,

    pub network_disabled: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            memory_limit: 64 * 1024 * 1024,
            network_disabled: true,
        }
    }
}

impl RunConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub quota: usize,
    pub concurrency: usize,
    pub flush_interval_secs: u64,
    pub reset_concurrency_on_flush: bool,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            quota: 5,
            concurrency: 1,
            flush_interval_secs: 5,
            reset_concurrency_on_flush: true,
        }
    }
}

impl ThrottleConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }
}

/// One warm pool per image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    pub image: String,
    pub capacity: usize,

    /// Standby lifetime in seconds; short values are coerced by the pool
    #[serde(default)]
    pub standby_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: SocketAddr::from(([0, 0, 0, 0], 9100)),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            docker: DockerConfig::default(),
            shared_path: PathBuf::new(),
            languages_path: None,
            fetch_images: false,
            run: RunConfig::default(),
            throttle: ThrottleConfig::default(),
            pools: Vec::new(),
            pool_refill_interval_secs: 3,
            metrics: MetricsConfig::default(),
            log_format: "pretty".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from all sources
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();

        builder = match env::var("SANDRUN_CONFIG") {
            Ok(path) if !path.is_empty() => builder.add_source(config::File::with_name(&path)),
            _ => builder.add_source(config::File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };

        builder = builder.add_source(
            config::Environment::with_prefix("SANDRUN")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: EngineConfig = builder.build()?.try_deserialize()?;
        config.apply_env_fallbacks();
        config.validate()?;

        Ok(config)
    }

    fn apply_env_fallbacks(&mut self) {
        if self.docker.host.is_none() {
            self.docker.host = env::var("DOCKER_HOST").ok().filter(|h| !h.is_empty());
        }

        if self.shared_path.as_os_str().is_empty() {
            if let Ok(path) = env::var("SHARED_PATH") {
                self.shared_path = PathBuf::from(path);
            }
        }

        self.shared_path = expand_home(&self.shared_path);
    }

    /// Reject settings the engine cannot start with
    pub fn validate(&self) -> Result<()> {
        if self.shared_path.as_os_str().is_empty() {
            return Err(EngineError::Internal(
                "shared_path is not set (use SANDRUN_SHARED_PATH or SHARED_PATH)".into(),
            ));
        }
        if self.run.timeout_secs == 0 {
            return Err(EngineError::Internal("run.timeout_secs must be positive".into()));
        }
        if self.throttle.quota == 0 || self.throttle.concurrency == 0 {
            return Err(EngineError::Internal(
                "throttle.quota and throttle.concurrency must be positive".into(),
            ));
        }
        if self.pool_refill_interval_secs == 0 {
            return Err(EngineError::Internal(
                "pool_refill_interval_secs must be positive".into(),
            ));
        }
        for pool in &self.pools {
            if pool.capacity == 0 {
                return Err(EngineError::Internal(format!(
                    "pool for {} has zero capacity",
                    pool.image
                )));
            }
        }
        Ok(())
    }

    pub fn pool_refill_interval(&self) -> Duration {
        Duration::from_secs(self.pool_refill_interval_secs)
    }
}

/// Replace a leading `~` with `$HOME`
fn expand_home(path: &PathBuf) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match env::var("HOME") {
            Ok(home) => PathBuf::from(home).join(rest),
            Err(_) => path.clone(),
        },
        Err(_) => path.clone(),
    }
}
