//! In-process container runtime.
//!
//! Behaves like a single runtime endpoint: images must be pulled before
//! containers can be created from them, container names are unique, and
//! every call is appended to a log. Faults can be injected per operation.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::debug;

use crate::client::{ContainerConfig, ContainerInfo, HostConfig, ImageReference, RuntimeClient};
use crate::error::{RuntimeError, RuntimeResult};

/// Runtime operations, used to target injected faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Start,
    Kill,
    Remove,
    Inspect,
    Pull,
    List,
}

/// One recorded call against the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Create { name: String, image: String },
    Start { id: String, publish_all_ports: bool },
    Kill { id: String },
    Remove { id: String },
    Inspect { id_or_name: String },
    Pull { image: String, tag: String },
    List,
}

impl RuntimeCall {
    pub fn operation(&self) -> Operation {
        match self {
            RuntimeCall::Create { .. } => Operation::Create,
            RuntimeCall::Start { .. } => Operation::Start,
            RuntimeCall::Kill { .. } => Operation::Kill,
            RuntimeCall::Remove { .. } => Operation::Remove,
            RuntimeCall::Inspect { .. } => Operation::Inspect,
            RuntimeCall::Pull { .. } => Operation::Pull,
            RuntimeCall::List => Operation::List,
        }
    }
}

#[derive(Debug, Clone)]
struct MemContainer {
    name: String,
    image: String,
    running: bool,
}

#[derive(Default)]
struct Inner {
    images: HashSet<String>,
    containers: HashMap<String, MemContainer>,
    faults: HashMap<Operation, RuntimeError>,
    delays: HashMap<Operation, Duration>,
    calls: Vec<RuntimeCall>,
    seq: u64,
}

impl Inner {
    fn record(&mut self, call: RuntimeCall) -> RuntimeResult<()> {
        let op = call.operation();
        self.calls.push(call);
        match self.faults.get(&op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn resolve(&self, id_or_name: &str) -> Option<String> {
        if self.containers.contains_key(id_or_name) {
            return Some(id_or_name.to_string());
        }
        self.containers
            .iter()
            .find(|(_, c)| c.name == id_or_name)
            .map(|(id, _)| id.clone())
    }

    fn next_id(&mut self, name: &str) -> String {
        self.seq += 1;
        let digest = Sha256::digest(format!("{name}:{}", self.seq).as_bytes());
        hex::encode(digest)
    }
}

/// A container runtime that lives entirely in memory.
#[derive(Default)]
pub struct MemoryRuntime {
    inner: Mutex<Inner>,
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate the local image cache.
    pub fn with_image(mut self, image: &str) -> Self {
        self.inner
            .get_mut()
            .images
            .insert(ImageReference::parse(image).canonical());
        self
    }

    /// Make every future call of `op` fail with `err`.
    pub async fn fail(&self, op: Operation, err: RuntimeError) {
        self.inner.lock().await.faults.insert(op, err);
    }

    /// Make every future call of `op` wait `delay` before it runs. The
    /// runtime is not locked while waiting, so other calls proceed.
    pub async fn delay(&self, op: Operation, delay: Duration) {
        self.inner.lock().await.delays.insert(op, delay);
    }

    async fn pause(&self, op: Operation) {
        let delay = self.inner.lock().await.delays.get(&op).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    pub async fn clear_fault(&self, op: Operation) {
        self.inner.lock().await.faults.remove(&op);
    }

    /// Every call made so far, in order.
    pub async fn calls(&self) -> Vec<RuntimeCall> {
        self.inner.lock().await.calls.clone()
    }

    pub async fn call_count(&self, op: Operation) -> usize {
        self.inner
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| c.operation() == op)
            .count()
    }

    pub async fn has_image(&self, image: &str) -> bool {
        let key = ImageReference::parse(image).canonical();
        self.inner.lock().await.images.contains(&key)
    }

    /// Number of containers the runtime holds, running or not.
    pub async fn container_count(&self) -> usize {
        self.inner.lock().await.containers.len()
    }

    /// Drop a container without going through the API, as if it died
    /// and was garbage-collected out from under the scheduler.
    pub async fn forget(&self, id_or_name: &str) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.resolve(id_or_name) {
            Some(id) => inner.containers.remove(&id).is_some(),
            None => false,
        }
    }
}

#[async_trait]
impl RuntimeClient for MemoryRuntime {
    async fn create_container(&self, config: &ContainerConfig) -> RuntimeResult<String> {
        self.pause(Operation::Create).await;
        let mut inner = self.inner.lock().await;
        inner.record(RuntimeCall::Create {
            name: config.name.clone(),
            image: config.image.clone(),
        })?;

        let image = ImageReference::parse(&config.image).canonical();
        if !inner.images.contains(&image) {
            return Err(RuntimeError::NotFound(format!("image {image}")));
        }
        if !config.name.is_empty() && inner.resolve(&config.name).is_some() {
            return Err(RuntimeError::Conflict(format!(
                "container name {} already in use",
                config.name
            )));
        }

        let id = inner.next_id(&config.name);
        inner.containers.insert(
            id.clone(),
            MemContainer {
                name: config.name.clone(),
                image,
                running: false,
            },
        );
        debug!(id = %&id[..12], name = %config.name, "memory runtime: container created");
        Ok(id)
    }

    async fn start_container(&self, id: &str, host: &HostConfig) -> RuntimeResult<()> {
        self.pause(Operation::Start).await;
        let mut inner = self.inner.lock().await;
        inner.record(RuntimeCall::Start {
            id: id.to_string(),
            publish_all_ports: host.publish_all_ports,
        })?;
        match inner.containers.get_mut(id) {
            Some(c) => {
                c.running = true;
                Ok(())
            }
            None => Err(RuntimeError::NotFound(format!("container {id}"))),
        }
    }

    async fn kill_container(&self, id: &str) -> RuntimeResult<()> {
        self.pause(Operation::Kill).await;
        let mut inner = self.inner.lock().await;
        inner.record(RuntimeCall::Kill { id: id.to_string() })?;
        let resolved = inner
            .resolve(id)
            .ok_or_else(|| RuntimeError::NotFound(format!("container {id}")))?;
        if let Some(c) = inner.containers.get_mut(&resolved) {
            c.running = false;
        }
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> RuntimeResult<()> {
        self.pause(Operation::Remove).await;
        let mut inner = self.inner.lock().await;
        inner.record(RuntimeCall::Remove { id: id.to_string() })?;
        let resolved = inner
            .resolve(id)
            .ok_or_else(|| RuntimeError::NotFound(format!("container {id}")))?;
        inner.containers.remove(&resolved);
        Ok(())
    }

    async fn inspect_container(&self, id_or_name: &str) -> RuntimeResult<ContainerInfo> {
        self.pause(Operation::Inspect).await;
        let mut inner = self.inner.lock().await;
        inner.record(RuntimeCall::Inspect {
            id_or_name: id_or_name.to_string(),
        })?;
        let id = inner
            .resolve(id_or_name)
            .ok_or_else(|| RuntimeError::NotFound(format!("container {id_or_name}")))?;
        let c = &inner.containers[&id];
        Ok(ContainerInfo {
            id: id.clone(),
            name: c.name.clone(),
            image: c.image.clone(),
            running: c.running,
        })
    }

    async fn pull_image(&self, image: &str, tag: &str) -> RuntimeResult<()> {
        self.pause(Operation::Pull).await;
        let mut inner = self.inner.lock().await;
        inner.record(RuntimeCall::Pull {
            image: image.to_string(),
            tag: tag.to_string(),
        })?;
        let reference = ImageReference {
            repository: ImageReference::parse(image).repository,
            tag: tag.to_string(),
        };
        inner.images.insert(reference.canonical());
        Ok(())
    }

    async fn list_containers(&self) -> RuntimeResult<Vec<ContainerInfo>> {
        self.pause(Operation::List).await;
        let mut inner = self.inner.lock().await;
        inner.record(RuntimeCall::List)?;
        let mut all: Vec<ContainerInfo> = inner
            .containers
            .iter()
            .map(|(id, c)| ContainerInfo {
                id: id.clone(),
                name: c.name.clone(),
                image: c.image.clone(),
                running: c.running,
            })
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }
}
