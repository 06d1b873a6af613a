//! Engine handle — one container-runtime endpoint and its live accounting.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use drydock_core::{
    AdmissionError, Container, ContainerId, EngineInfo, EngineSnapshot, Ledger, ReservationId,
    Resources,
};
use drydock_runtime::RuntimeClient;
use drydock_scheduler::{SchedulerError, Strategy};

use crate::error::{ClusterError, ClusterResult};

/// A runtime endpoint known to the cluster.
///
/// The ledger is the cluster-side view of what runs here. Admission
/// checks take its read lock; reserve/confirm/release/evict take the
/// write lock. No lock is held across a runtime call.
pub struct Engine {
    info: EngineInfo,
    client: Arc<dyn RuntimeClient>,
    ledger: RwLock<Ledger>,
}

impl Engine {
    pub fn new(info: EngineInfo, client: Arc<dyn RuntimeClient>) -> Self {
        Self {
            info,
            client,
            ledger: RwLock::new(Ledger::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn addr(&self) -> &str {
        &self.info.addr
    }

    pub fn info(&self) -> &EngineInfo {
        &self.info
    }

    pub fn capacity(&self) -> Resources {
        self.info.capacity()
    }

    pub fn client(&self) -> &Arc<dyn RuntimeClient> {
        &self.client
    }

    /// Consistent point-in-time view for scheduler strategies.
    ///
    /// Pending reservations count as reserved and their names as hosted.
    pub async fn snapshot(&self) -> EngineSnapshot {
        self.snapshot_of(&*self.ledger.read().await)
    }

    fn snapshot_of(&self, ledger: &Ledger) -> EngineSnapshot {
        EngineSnapshot {
            id: self.info.id.clone(),
            labels: self.info.labels.clone(),
            capacity: self.capacity(),
            reserved: ledger.reserved(),
            container_names: ledger.container_names(),
        }
    }

    /// Check admission without reserving anything.
    pub async fn can_admit(&self, container: &Container) -> Result<(), AdmissionError> {
        self.ledger.read().await.can_admit(&self.capacity(), container)
    }

    pub async fn reserved(&self) -> Resources {
        self.ledger.read().await.reserved()
    }

    pub async fn containers(&self) -> Vec<Container> {
        self.ledger.read().await.containers()
    }

    /// Tracked container matching `query` by runtime ID or name.
    pub async fn find(&self, query: &Container) -> Option<(ContainerId, Container)> {
        self.ledger
            .read()
            .await
            .find(query)
            .map(|(id, c)| (id.clone(), c.clone()))
    }

    /// Admit `container` and hold its resources.
    ///
    /// With a `strategy`, the placement decision is checked again against
    /// the ledger under the same write lock, so a decision made on a stale
    /// snapshot cannot land.
    pub(crate) async fn reserve(
        self: &Arc<Self>,
        container: &Container,
        strategy: Option<&dyn Strategy>,
    ) -> ClusterResult<Reservation> {
        let mut ledger = self.ledger.write().await;

        if let Some(strategy) = strategy {
            if !strategy.accepts(container, &self.snapshot_of(&ledger)) {
                debug!(
                    engine = %self.info.id,
                    container = %container.name,
                    strategy = strategy.name(),
                    "placement no longer accepted"
                );
                return Err(SchedulerError::NoEligibleEngine {
                    container: container.name.clone(),
                    considered: 1,
                }
                .into());
            }
        }

        let ticket = ledger
            .reserve(&self.capacity(), container)
            .map_err(|source| ClusterError::Admission {
                engine: self.info.id.clone(),
                container: container.name.clone(),
                source,
            })?;
        Ok(Reservation {
            engine: self.clone(),
            ticket: Some(ticket),
        })
    }

    /// Record a started container, assigning its identity in the same
    /// critical section that makes it count against capacity.
    pub(crate) async fn confirm(&self, ticket: ReservationId, id: &str, container: &mut Container) {
        let mut ledger = self.ledger.write().await;
        container.id = Some(id.to_string());
        container.engine_id = Some(self.info.id.clone());
        ledger.confirm(ticket, id.to_string(), container.clone());
    }

    pub(crate) async fn release(&self, ticket: ReservationId) {
        self.ledger.write().await.release(ticket);
    }

    /// Release without waiting; false if the ledger lock is contended.
    fn try_release(&self, ticket: ReservationId) -> bool {
        match self.ledger.try_write() {
            Ok(mut ledger) => {
                ledger.release(ticket);
                true
            }
            Err(_) => false,
        }
    }

    pub(crate) async fn evict(&self, id: &str) -> Option<Container> {
        self.ledger.write().await.evict(id)
    }

    /// Drop tracked containers the runtime no longer reports.
    ///
    /// Only containers tracked before the runtime listing started are
    /// candidates, so a placement confirmed mid-refresh is never evicted.
    pub async fn refresh(&self) -> ClusterResult<Vec<Container>> {
        let tracked: HashSet<ContainerId> = self.ledger.read().await.ids();
        if tracked.is_empty() {
            return Ok(Vec::new());
        }

        let live: HashSet<ContainerId> = self
            .client
            .list_containers()
            .await
            .map_err(|source| ClusterError::List {
                engine: self.info.id.clone(),
                source,
            })?
            .into_iter()
            .map(|info| info.id)
            .collect();

        let mut ledger = self.ledger.write().await;
        let evicted: Vec<Container> = tracked
            .difference(&live)
            .filter_map(|id| ledger.evict(id))
            .collect();
        drop(ledger);

        for c in &evicted {
            info!(engine = %self.info.id, container = %c.name, "container gone from runtime, evicted");
        }
        debug!(engine = %self.info.id, evicted = evicted.len(), "engine refreshed");
        Ok(evicted)
    }
}

/// Capacity held on an engine for one placement.
///
/// Consumed by [`Reservation::confirm`] or [`Reservation::release`]. A
/// reservation dropped while still held, for example because the task
/// driving it was cancelled, is released on drop.
pub(crate) struct Reservation {
    engine: Arc<Engine>,
    ticket: Option<ReservationId>,
}

impl Reservation {
    /// Turn the reservation into a tracked container. The ticket stays
    /// held until the ledger has recorded it.
    pub(crate) async fn confirm(mut self, id: &str, container: &mut Container) {
        if let Some(ticket) = self.ticket {
            self.engine.confirm(ticket, id, container).await;
            self.ticket = None;
        }
    }

    pub(crate) async fn release(mut self) {
        if let Some(ticket) = self.ticket {
            self.engine.release(ticket).await;
            self.ticket = None;
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let Some(ticket) = self.ticket.take() else {
            return;
        };
        if self.engine.try_release(ticket) {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let engine = self.engine.clone();
                handle.spawn(async move { engine.release(ticket).await });
            }
            Err(_) => {
                warn!(engine = %self.engine.id(), ticket, "reservation dropped outside a runtime, capacity stays held");
            }
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("id", &self.info.id)
            .field("addr", &self.info.addr)
            .finish_non_exhaustive()
    }
}
