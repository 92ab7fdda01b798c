// packages/engine/src/runtime/fake.rs
//! In-memory container runtime for tests

use crate::runtime::container_runtime::{
    ContainerRuntime, ContainerSpec, ContainerSummary, ExecOutput, LifecycleEvent,
};
use crate::utils::errors::{EngineError, Result};
use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::stream::{BoxStream, StreamExt};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

#[derive(Debug, Clone)]
pub(crate) struct FakeContainer {
    pub spec: ContainerSpec,
    pub running: bool,
}

/// Knobs controlling what the fake returns
#[derive(Debug, Clone)]
pub(crate) struct FakeBehavior {
    pub output: Vec<u8>,
    pub exit_code: i64,
    /// How long `exec` and `wait_container` block
    pub delay: Duration,
    /// How long `create_container` blocks after the container exists
    pub create_delay: Duration,
    pub fail_create: bool,
    pub fail_start: bool,
    pub fail_remove: bool,
}

impl Default for FakeBehavior {
    fn default() -> Self {
        Self {
            output: Vec::new(),
            exit_code: 0,
            delay: Duration::ZERO,
            create_delay: Duration::ZERO,
            fail_create: false,
            fail_start: false,
            fail_remove: false,
        }
    }
}

#[derive(Default)]
struct FakeState {
    containers: HashMap<String, FakeContainer>,
    next_id: u64,
    created: usize,
    removed: Vec<String>,
    execs: Vec<(String, Vec<String>, Vec<u8>)>,
}

#[derive(Default)]
pub(crate) struct FakeRuntime {
    images: Mutex<HashSet<String>>,
    state: Mutex<FakeState>,
    behavior: Mutex<FakeBehavior>,
    events: Mutex<Vec<UnboundedSender<Result<LifecycleEvent>>>>,
}

impl FakeRuntime {
    pub fn with_images(images: &[&str]) -> Self {
        let runtime = Self::default();
        runtime
            .images
            .lock()
            .extend(images.iter().map(|i| i.to_string()));
        runtime
    }

    pub fn set_behavior(&self, behavior: FakeBehavior) {
        *self.behavior.lock() = behavior;
    }

    pub fn update_behavior(&self, f: impl FnOnce(&mut FakeBehavior)) {
        f(&mut self.behavior.lock());
    }

    /// Seed a container as if it had been created by an earlier process
    pub fn insert_container(&self, spec: ContainerSpec, running: bool) -> String {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = format!("seeded{:04}", state.next_id);
        state
            .containers
            .insert(id.clone(), FakeContainer { spec, running });
        id
    }

    pub fn container(&self, id: &str) -> Option<FakeContainer> {
        self.state.lock().containers.get(id).cloned()
    }

    pub fn live_containers(&self) -> usize {
        self.state.lock().containers.len()
    }

    pub fn created_count(&self) -> usize {
        self.state.lock().created
    }

    pub fn removed(&self) -> Vec<String> {
        self.state.lock().removed.clone()
    }

    pub fn exec_count(&self) -> usize {
        self.state.lock().execs.len()
    }

    pub fn last_exec(&self) -> Option<(String, Vec<String>, Vec<u8>)> {
        self.state.lock().execs.last().cloned()
    }

    /// Push an event to every subscriber
    pub fn emit(&self, event: LifecycleEvent) {
        self.events
            .lock()
            .retain(|tx| tx.unbounded_send(Ok(event.clone())).is_ok());
    }

    /// Push a stream error to every subscriber
    pub fn emit_error(&self, message: &str) {
        self.events.lock().retain(|tx| {
            tx.unbounded_send(Err(EngineError::Internal(message.to_string())))
                .is_ok()
        });
    }

    /// Drop every subscriber, ending their streams
    pub fn close_events(&self) {
        self.events.lock().clear();
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn image_exists(&self, image: &str) -> Result<bool> {
        Ok(self.images.lock().contains(image))
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        self.images.lock().insert(image.to_string());
        Ok(())
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        Ok(self
            .state
            .lock()
            .containers
            .iter()
            .map(|(id, c)| ContainerSummary {
                id: id.clone(),
                image: c.spec.image.clone(),
                labels: c.spec.labels.clone(),
                running: c.running,
            })
            .collect())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        if self.behavior.lock().fail_create {
            return Err(EngineError::SetupFailed("injected create failure".into()));
        }
        if !self.images.lock().contains(&spec.image) {
            return Err(EngineError::RuntimeUnavailable(format!(
                "no such image: {}",
                spec.image
            )));
        }

        let id = {
            let mut state = self.state.lock();
            state.next_id += 1;
            state.created += 1;
            let id = format!("fake{:04}", state.next_id);
            state.containers.insert(
                id.clone(),
                FakeContainer {
                    spec: spec.clone(),
                    running: false,
                },
            );
            id
        };

        let create_delay = self.behavior.lock().create_delay;
        if !create_delay.is_zero() {
            tokio::time::sleep(create_delay).await;
        }
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        if self.behavior.lock().fail_start {
            return Err(EngineError::ExecutionFailed("injected start failure".into()));
        }
        match self.state.lock().containers.get_mut(id) {
            Some(c) => {
                c.running = true;
                Ok(())
            }
            None => Err(EngineError::ExecutionFailed(format!("no such container: {}", id))),
        }
    }

    async fn wait_container(&self, id: &str) -> Result<i64> {
        let behavior = self.behavior.lock().clone();
        tokio::time::sleep(behavior.delay).await;

        match self.state.lock().containers.get_mut(id) {
            Some(c) => {
                c.running = false;
                Ok(behavior.exit_code)
            }
            None => Err(EngineError::ExecutionFailed(format!("no such container: {}", id))),
        }
    }

    async fn logs(&self, id: &str) -> Result<Vec<u8>> {
        if !self.state.lock().containers.contains_key(id) {
            return Err(EngineError::ExecutionFailed(format!("no such container: {}", id)));
        }
        Ok(self.behavior.lock().output.clone())
    }

    async fn exec(
        &self,
        id: &str,
        cmd: Vec<String>,
        _env: Vec<String>,
        stdin: &[u8],
    ) -> Result<ExecOutput> {
        let behavior = self.behavior.lock().clone();
        {
            let mut state = self.state.lock();
            match state.containers.get(id) {
                Some(c) if c.running => {}
                _ => {
                    return Err(EngineError::ExecutionFailed(format!(
                        "container {} is not running",
                        id
                    )))
                }
            }
            state.execs.push((id.to_string(), cmd, stdin.to_vec()));
        }

        tokio::time::sleep(behavior.delay).await;

        Ok(ExecOutput {
            exit_code: behavior.exit_code,
            output: behavior.output,
        })
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        if self.behavior.lock().fail_remove {
            return Err(EngineError::CleanupFailed("injected remove failure".into()));
        }
        let mut state = self.state.lock();
        match state.containers.remove(id) {
            Some(_) => {
                state.removed.push(id.to_string());
                Ok(())
            }
            None => Err(EngineError::CleanupFailed(format!("no such container: {}", id))),
        }
    }

    fn events(&self) -> BoxStream<'static, Result<LifecycleEvent>> {
        let (tx, rx) = unbounded();
        self.events.lock().push(tx);
        rx.boxed()
    }
}
