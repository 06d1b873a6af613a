//! Host-side guard — admission and execution next to one runtime.
//!
//! The cluster manager's view of an engine can be stale; the slave owns
//! the authoritative ledger for its host and re-runs admission under its
//! own lock before touching the runtime.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info};

use drydock_core::{AdmissionError, Container, EngineInfo, Resources};
use drydock_runtime::{ImageReference, RuntimeClient};

use crate::engine::Engine;
use crate::error::{ClusterError, ClusterResult};
use crate::transaction::{PlacementTransaction, short_id};

const LOCAL_ADDR: &str = "local";

pub struct Slave {
    engine: Arc<Engine>,
}

impl Slave {
    pub fn new(id: impl Into<String>, capacity: Resources, client: Arc<dyn RuntimeClient>) -> Self {
        let info = EngineInfo {
            id: id.into(),
            addr: LOCAL_ADDR.to_string(),
            cpus: capacity.cpus,
            memory: capacity.memory,
            labels: BTreeSet::new(),
        };
        Self {
            engine: Arc::new(Engine::new(info, client)),
        }
    }

    /// A slave sized to this host's CPU count and `memory_mb` of memory.
    pub fn detect(id: impl Into<String>, memory_mb: f64, client: Arc<dyn RuntimeClient>) -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let slave = Self::new(id, Resources::new(cpus as f64, memory_mb), client);
        debug!(slave = %slave.id(), cpus, memory_mb, "host capacity detected");
        slave
    }

    pub fn id(&self) -> &str {
        self.engine.id()
    }

    pub fn capacity(&self) -> Resources {
        self.engine.capacity()
    }

    pub async fn reserved(&self) -> Resources {
        self.engine.reserved().await
    }

    pub async fn containers(&self) -> Vec<Container> {
        self.engine.containers().await
    }

    pub async fn can_admit(&self, container: &Container) -> Result<(), AdmissionError> {
        self.engine.can_admit(container).await
    }

    /// Admit, create, and start `container` on this host.
    ///
    /// On success `container.id` and `container.engine_id` are set. On
    /// failure nothing is tracked and `container` is left untouched.
    pub async fn execute(&self, container: &mut Container) -> ClusterResult<()> {
        let mut txn = PlacementTransaction::new(self.engine.clone(), container.clone());
        let placement = txn.commit().await?;
        *container = placement.container;
        Ok(())
    }

    /// Pull `image`, using its tag or `latest`.
    pub async fn pull_image(&self, image: &str) -> ClusterResult<()> {
        let reference = ImageReference::parse(image);
        self.engine
            .client()
            .pull_image(&reference.repository, &reference.tag)
            .await
            .map_err(|source| ClusterError::Pull {
                engine: self.id().to_string(),
                image: reference.canonical(),
                source,
            })?;
        info!(slave = %self.id(), image = %reference.canonical(), "image pulled");
        Ok(())
    }

    /// Remove a container from the runtime, then stop tracking it.
    ///
    /// A container the runtime no longer has is treated as removed. Any
    /// other runtime failure leaves it tracked.
    pub async fn remove_container(&self, id: &str) -> ClusterResult<()> {
        match self.engine.client().remove_container(id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(slave = %self.id(), id = short_id(id), "container already gone from runtime");
            }
            Err(source) => {
                return Err(ClusterError::Remove {
                    engine: self.id().to_string(),
                    container: id.to_string(),
                    source,
                });
            }
        }

        if let Some(c) = self.engine.evict(id).await {
            info!(slave = %self.id(), container = %c.name, id = short_id(id), "container removed");
        }
        Ok(())
    }
}

impl std::fmt::Debug for Slave {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slave").field("engine", &self.engine).finish()
    }
}
