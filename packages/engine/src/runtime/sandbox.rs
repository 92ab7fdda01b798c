// packages/engine/src/runtime/sandbox.rs
//! Container specs for isolated execution
//!
//! Every container the engine creates gets:
//! - Its private volume bind-mounted at `/code` and `/tmp`
//! - A read-only root filesystem
//! - Memory limit with swap disabled
//! - Optional network isolation
//! - `sandrun.id` / `sandrun.role` labels

use crate::runtime::container_runtime::{
    BindMount, ContainerRole, ContainerSpec, LABEL_ID, LABEL_ROLE,
};
use crate::runtime::resource_limiter::ResourceLimits;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Working directory inside every container
pub const WORK_DIR: &str = "/code";

/// Scratch directory, backed by the same volume
pub const TMP_DIR: &str = "/tmp";

/// Sandbox configuration
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Hostname seen by submitted code
    pub hostname: String,

    /// Mount the root filesystem read-only
    pub readonly_rootfs: bool,

    /// Shell used to run commands
    pub shell: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            hostname: "sandrun".to_string(),
            readonly_rootfs: true,
            shell: vec!["sh".to_string(), "-c".to_string()],
        }
    }
}

/// Builds container specs for standby and run containers
#[derive(Debug, Clone, Default)]
pub struct Sandbox {
    config: SandboxConfig,
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Wrap a command line for the configured shell
    pub fn shell_command(&self, command: &str) -> Vec<String> {
        let mut cmd = self.config.shell.clone();
        cmd.push(command.to_string());
        cmd
    }

    /// Spec for a pool member idling on a long sleep
    pub fn standby_spec(
        &self,
        image: &str,
        id: &str,
        volume: &Path,
        limits: &ResourceLimits,
        standby: Duration,
    ) -> ContainerSpec {
        let cmd = vec!["sleep".to_string(), standby.as_secs().to_string()];
        let mut spec = self.base_spec(image, id, ContainerRole::Standby, volume, limits, cmd);
        spec.name = Some(format!("sandrun-standby-{}", &id[..12.min(id.len())]));
        spec
    }

    /// Spec for a dedicated cold-path container running `command`
    pub fn run_spec(
        &self,
        image: &str,
        id: &str,
        volume: &Path,
        limits: &ResourceLimits,
        command: &str,
        env: &[String],
    ) -> ContainerSpec {
        let cmd = self.shell_command(command);
        let mut spec = self.base_spec(image, id, ContainerRole::Run, volume, limits, cmd);
        spec.name = Some(format!("sandrun-run-{}", &id[..12.min(id.len())]));
        spec.env = env.to_vec();
        spec
    }

    fn base_spec(
        &self,
        image: &str,
        id: &str,
        role: ContainerRole,
        volume: &Path,
        limits: &ResourceLimits,
        cmd: Vec<String>,
    ) -> ContainerSpec {
        let mut labels = HashMap::new();
        labels.insert(LABEL_ID.to_string(), id.to_string());
        labels.insert(LABEL_ROLE.to_string(), role.as_str().to_string());

        ContainerSpec {
            name: None,
            image: image.to_string(),
            hostname: self.config.hostname.clone(),
            cmd,
            env: Vec::new(),
            labels,
            binds: vec![
                BindMount::new(volume, WORK_DIR),
                BindMount::new(volume, TMP_DIR),
            ],
            working_dir: WORK_DIR.to_string(),
            readonly_rootfs: self.config.readonly_rootfs,
            memory_limit: limits.memory_limit,
            memory_swap: limits.memory_swap(),
            network_disabled: limits.network_disabled,
        }
    }
}
