// packages/engine/src/runtime/docker.rs
//! Docker Engine API implementation of [`ContainerRuntime`]

use crate::runtime::container_runtime::{
    BindMount, ContainerRuntime, ContainerSpec, ContainerSummary, ExecOutput, LifecycleEvent,
};
use crate::utils::errors::{EngineError, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::{CreateImageOptions, ListImagesOptions};
use bollard::models::{EventMessage, HostConfig};
use bollard::system::EventsOptions;
use bollard::{Docker, API_DEFAULT_VERSION};
use chrono::DateTime;
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Client-side request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Docker-backed container runtime
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to `host`, or to the local defaults when `None`
    ///
    /// Accepts `unix://`, `tcp://` and `http://` addresses.
    pub fn connect(host: Option<&str>) -> Result<Self> {
        let docker = match host {
            Some(addr) if addr.starts_with("unix://") => {
                Docker::connect_with_unix(addr, REQUEST_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            Some(addr) => Docker::connect_with_http(addr, REQUEST_TIMEOUT_SECS, API_DEFAULT_VERSION),
            None => Docker::connect_with_local_defaults(),
        }
        .map_err(|e| EngineError::RuntimeUnavailable(format!("cannot connect to docker: {}", e)))?;

        info!("Connected to docker at {}", host.unwrap_or("local defaults"));
        Ok(Self { docker })
    }

    /// Round-trip to the daemon to make sure it is reachable
    pub async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map_err(|e| EngineError::RuntimeUnavailable(format!("docker ping failed: {}", e)))?;
        Ok(())
    }
}

/// Split `repo[:tag]`, leaving registry ports alone
fn split_image(image: &str) -> (String, String) {
    match image.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo.to_string(), tag.to_string()),
        _ => (image.to_string(), "latest".to_string()),
    }
}

fn lifecycle_event(message: EventMessage) -> LifecycleEvent {
    LifecycleEvent {
        action: message.action.unwrap_or_default(),
        container_id: message.actor.and_then(|actor| actor.id).unwrap_or_default(),
        time: message.time.and_then(|secs| DateTime::from_timestamp(secs, 0)),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn image_exists(&self, image: &str) -> Result<bool> {
        let options = ListImagesOptions::<String> {
            all: false,
            ..Default::default()
        };

        let images = self.docker.list_images(Some(options)).await?;
        Ok(images
            .iter()
            .any(|summary| summary.repo_tags.iter().any(|tag| tag == image)))
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        let (repo, tag) = split_image(image);
        info!("Pulling image {}:{}", repo, tag);

        let options = CreateImageOptions::<String> {
            from_image: repo,
            tag,
            ..Default::default()
        };

        let mut progress = self.docker.create_image(Some(options), None, None);
        while let Some(step) = progress.next().await {
            let step = step.map_err(|e| {
                EngineError::RuntimeUnavailable(format!("failed to pull {}: {}", image, e))
            })?;
            if let Some(status) = step.status {
                debug!("pull {}: {}", image, status);
            }
        }

        Ok(())
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        let options = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };

        let containers = self.docker.list_containers(Some(options)).await?;
        Ok(containers
            .into_iter()
            .filter_map(|c| {
                Some(ContainerSummary {
                    id: c.id?,
                    image: c.image.unwrap_or_default(),
                    labels: c.labels.unwrap_or_default(),
                    running: c.state.as_deref() == Some("running"),
                })
            })
            .collect())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let host_config = HostConfig {
            binds: Some(spec.binds.iter().map(BindMount::to_bind_string).collect()),
            readonly_rootfs: Some(spec.readonly_rootfs),
            memory: Some(spec.memory_limit),
            memory_swap: Some(spec.memory_swap),
            ..Default::default()
        };

        let config = Config {
            hostname: Some(spec.hostname.clone()),
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            env: Some(spec.env.clone()),
            labels: Some(spec.labels.clone()),
            working_dir: Some(spec.working_dir.clone()),
            network_disabled: Some(spec.network_disabled),
            attach_stdin: Some(false),
            attach_stdout: Some(false),
            attach_stderr: Some(false),
            tty: Some(false),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = spec.name.as_ref().map(|name| CreateContainerOptions {
            name: name.clone(),
            platform: None,
        });

        let response = self.docker.create_container(options, config).await?;
        for warning in &response.warnings {
            warn!("docker create {}: {}", response.id, warning);
        }

        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn wait_container(&self, id: &str) -> Result<i64> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };

        let mut stream = self.docker.wait_container(id, Some(options));
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports non-zero exits as an error carrying the code
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(e.into()),
            None => Err(EngineError::ExecutionFailed(format!(
                "wait for {} ended without a status",
                id
            ))),
        }
    }

    async fn logs(&self, id: &str) -> Result<Vec<u8>> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            ..Default::default()
        };

        let mut buffer = Vec::new();
        let mut stream = self.docker.logs(id, Some(options));
        while let Some(chunk) = stream.next().await {
            buffer.extend_from_slice(&chunk?.into_bytes());
        }

        Ok(buffer)
    }

    async fn exec(
        &self,
        id: &str,
        cmd: Vec<String>,
        env: Vec<String>,
        stdin: &[u8],
    ) -> Result<ExecOutput> {
        let options = CreateExecOptions::<String> {
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            cmd: Some(cmd),
            env: if env.is_empty() { None } else { Some(env) },
            ..Default::default()
        };

        let exec = self.docker.create_exec(id, options).await?;

        let output = match self.docker.start_exec(&exec.id, None).await? {
            StartExecResults::Attached { mut output, mut input } => {
                let writer = async {
                    if !stdin.is_empty() {
                        input.write_all(stdin).await?;
                    }
                    input.shutdown().await
                };

                let reader = async {
                    let mut buffer = Vec::new();
                    while let Some(chunk) = output.next().await {
                        buffer.extend_from_slice(&chunk?.into_bytes());
                    }
                    Ok::<_, EngineError>(buffer)
                };

                let (written, read) = tokio::join!(writer, reader);
                if let Err(e) = written {
                    // The process may exit without consuming its input
                    debug!("exec {}: stdin not fully delivered: {}", exec.id, e);
                }
                read?
            }
            StartExecResults::Detached => {
                return Err(EngineError::ExecutionFailed(format!(
                    "exec {} started detached",
                    exec.id
                )));
            }
        };

        let inspect = self.docker.inspect_exec(&exec.id).await?;
        let exit_code = match inspect.exit_code {
            Some(code) => code,
            None => {
                warn!("exec {} finished without an exit code", exec.id);
                -1
            }
        };

        Ok(ExecOutput { exit_code, output })
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        self.docker.remove_container(id, Some(options)).await?;
        Ok(())
    }

    fn events(&self) -> BoxStream<'static, Result<LifecycleEvent>> {
        let mut filters = HashMap::new();
        filters.insert("type".to_string(), vec!["container".to_string()]);

        let options = EventsOptions::<String> {
            filters,
            ..Default::default()
        };

        self.docker
            .events(Some(options))
            .map(|message| message.map(lifecycle_event).map_err(EngineError::from))
            .boxed()
    }
}
