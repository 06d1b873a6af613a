//! Cluster manager — the entry point for placing and removing containers.
//!
//! Holds the engine registry and the named strategy registry. A placement
//! resolves the strategy, snapshots every engine, lets the strategy pick
//! one, and hands the decision to a [`PlacementTransaction`].
//!
//! Transactions run on their own task. A caller that stops waiting does
//! not cancel one halfway through, and [`ClusterManager::close`] still
//! waits for it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::{Notify, RwLock};
use tracing::{debug, info, warn};

use drydock_core::{
    AdmissionError, ClusterConfig, Container, EngineId, EngineInfo, EngineSnapshot, Placement,
};
use drydock_runtime::RuntimeClient;
use drydock_scheduler::{SchedulerError, Strategy, from_kinds};

use crate::engine::Engine;
use crate::error::{ClusterError, ClusterResult};
use crate::transaction::{PlacementTransaction, short_id};

/// Decisions made for one placement before giving up. A decision is
/// retried only when its engine changed between snapshot and reservation.
const MAX_DECISIONS: usize = 3;

/// Orchestrates placements across a fleet of engines.
///
/// Shared by `Arc`; every method takes `&self`.
pub struct ClusterManager {
    /// Registered engines, keyed and iterated by ID.
    engines: RwLock<BTreeMap<EngineId, Arc<Engine>>>,
    /// Named strategies: scheduler name → strategy.
    schedulers: RwLock<HashMap<String, Arc<dyn Strategy>>>,
    gate: Arc<Gate>,
}

/// Shutdown state, shared with spawned transactions.
#[derive(Default)]
struct Gate {
    closed: AtomicBool,
    in_flight: AtomicUsize,
    idle: Notify,
}

/// Counts one in-flight operation for the lifetime of the guard.
struct InFlight {
    gate: Arc<Gate>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.gate.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.gate.idle.notify_waiters();
        }
    }
}

impl ClusterManager {
    /// Create a manager over `engines` with no schedulers registered.
    pub fn new(engines: impl IntoIterator<Item = Engine>) -> ClusterResult<Self> {
        let mut registry = BTreeMap::new();
        for engine in engines {
            let id = engine.id().to_string();
            if registry.contains_key(&id) {
                return Err(ClusterError::DuplicateEngine(id));
            }
            registry.insert(id, Arc::new(engine));
        }

        Ok(Self {
            engines: RwLock::new(registry),
            schedulers: RwLock::new(HashMap::new()),
            gate: Arc::new(Gate::default()),
        })
    }

    /// Build a manager from configuration.
    ///
    /// `connect` produces the runtime client for each configured engine.
    /// Every `[[schedulers]]` entry is registered under its name.
    pub fn from_config<F>(config: &ClusterConfig, connect: F) -> ClusterResult<Self>
    where
        F: Fn(&EngineInfo) -> Arc<dyn RuntimeClient>,
    {
        config.validate()?;

        let engines = config
            .engines
            .iter()
            .map(|info| Engine::new(info.clone(), connect(info)));
        let mut manager = Self::new(engines)?;

        let schedulers = manager.schedulers.get_mut();
        for scheduler in &config.schedulers {
            schedulers.insert(scheduler.name.clone(), from_kinds(&scheduler.strategies));
        }

        info!(
            engines = config.engines.len(),
            schedulers = config.schedulers.len(),
            "cluster manager configured"
        );
        Ok(manager)
    }

    // ── Registry ─────────────────────────────────────────────────

    /// Register another engine.
    pub async fn add_engine(&self, engine: Engine) -> ClusterResult<Arc<Engine>> {
        let mut engines = self.engines.write().await;
        let id = engine.id().to_string();
        if engines.contains_key(&id) {
            return Err(ClusterError::DuplicateEngine(id));
        }
        let engine = Arc::new(engine);
        engines.insert(id.clone(), engine.clone());
        info!(engine = %id, addr = %engine.addr(), "engine registered");
        Ok(engine)
    }

    /// Register `strategy` under `name`, replacing any previous one.
    pub async fn register_scheduler(&self, name: impl Into<String>, strategy: Arc<dyn Strategy>) {
        let name = name.into();
        let previous = self
            .schedulers
            .write()
            .await
            .insert(name.clone(), strategy.clone());
        debug!(
            scheduler = %name,
            strategy = strategy.name(),
            replaced = previous.is_some(),
            "scheduler registered"
        );
    }

    /// Registered scheduler names, sorted.
    pub async fn scheduler_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.schedulers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn engine(&self, id: &str) -> Option<Arc<Engine>> {
        self.engines.read().await.get(id).cloned()
    }

    /// Point-in-time view of every engine, ordered by ID.
    pub async fn engines(&self) -> Vec<EngineSnapshot> {
        let engines = self.engine_handles().await;
        let mut snapshots = Vec::with_capacity(engines.len());
        for engine in &engines {
            snapshots.push(engine.snapshot().await);
        }
        snapshots
    }

    /// Every tracked container, grouped by engine in ID order.
    pub async fn list_containers(&self) -> Vec<Container> {
        let mut all = Vec::new();
        for engine in self.engine_handles().await {
            all.extend(engine.containers().await);
        }
        all
    }

    async fn engine_handles(&self) -> Vec<Arc<Engine>> {
        self.engines.read().await.values().cloned().collect()
    }

    // ── Placement ────────────────────────────────────────────────

    /// Place `container` using the scheduler registered as `scheduler`.
    ///
    /// If the chosen engine stops satisfying the strategy or runs out of
    /// room before the reservation is taken, the decision is made again
    /// against fresh snapshots.
    pub async fn schedule_container(
        &self,
        scheduler: &str,
        container: Container,
    ) -> ClusterResult<Placement> {
        let _guard = self.enter()?;

        let strategy = self
            .schedulers
            .read()
            .await
            .get(scheduler)
            .cloned()
            .ok_or_else(|| ClusterError::UnknownScheduler(scheduler.to_string()))?;

        let mut attempt = 1;
        loop {
            let engine = self.decide(scheduler, strategy.as_ref(), &container).await?;
            let txn = PlacementTransaction::new(engine, container.clone())
                .with_strategy(strategy.clone());

            match self.spawn_commit(txn).await {
                Err(e) if attempt < MAX_DECISIONS && is_stale_decision(&e) => {
                    debug!(%scheduler, container = %container.name, attempt, error = %e, "decision went stale, rescheduling");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn decide(
        &self,
        scheduler: &str,
        strategy: &dyn Strategy,
        container: &Container,
    ) -> ClusterResult<Arc<Engine>> {
        let engines = self.engine_handles().await;
        let mut snapshots = Vec::with_capacity(engines.len());
        for engine in &engines {
            snapshots.push(engine.snapshot().await);
        }

        let chosen = strategy.schedule(container, &snapshots)?;
        debug!(
            %scheduler,
            container = %container.name,
            engine = %chosen,
            "placement decided"
        );
        engines
            .into_iter()
            .find(|e| e.id() == chosen)
            .ok_or(ClusterError::EngineNotFound(chosen))
    }

    /// Commit `txn` on its own task, counted as in flight until it ends.
    async fn spawn_commit(&self, mut txn: PlacementTransaction) -> ClusterResult<Placement> {
        let guard = self.track();
        let task = tokio::spawn(async move {
            let _guard = guard;
            txn.commit().await
        });
        match task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(ClusterError::Closed),
        }
    }

    // ── Removal ──────────────────────────────────────────────────

    /// Kill and remove `container` wherever it runs.
    ///
    /// Engines are searched in ID order, first by their tracked
    /// containers, then by asking each runtime. A container no engine
    /// knows about is already gone, so that is not an error.
    pub async fn remove_container(&self, container: &Container) -> ClusterResult<()> {
        let _guard = self.track();
        let engines = self.engine_handles().await;

        for engine in &engines {
            if let Some((id, tracked)) = engine.find(container).await {
                return remove_on(engine, &id, &tracked.name).await;
            }
        }

        let query = match container.id.as_deref() {
            Some(id) => id,
            None if container.name.is_empty() => return Ok(()),
            None => container.name.as_str(),
        };

        for engine in &engines {
            match engine.client().inspect_container(query).await {
                Ok(found) => return remove_on(engine, &found.id, &found.name).await,
                Err(e) if e.is_not_found() => continue,
                Err(source) => {
                    return Err(ClusterError::Inspect {
                        engine: engine.id().to_string(),
                        container: query.to_string(),
                        source,
                    });
                }
            }
        }

        debug!(container = %query, "container not found on any engine");
        Ok(())
    }

    // ── Maintenance ──────────────────────────────────────────────

    /// Reconcile every engine's tracked containers with its runtime.
    ///
    /// All engines are visited even if one fails; the first failure is
    /// returned. On success, returns how many containers were evicted.
    pub async fn refresh(&self) -> ClusterResult<usize> {
        let mut evicted = 0;
        let mut first_error = None;

        for engine in self.engine_handles().await {
            match engine.refresh().await {
                Ok(gone) => evicted += gone.len(),
                Err(e) => {
                    warn!(engine = %engine.id(), error = %e, "engine refresh failed");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(evicted),
        }
    }

    /// Stop accepting placements and wait for in-flight work to finish.
    pub async fn close(&self) {
        if !self.gate.closed.swap(true, Ordering::SeqCst) {
            info!("cluster manager closing");
        }
        loop {
            let idle = self.gate.idle.notified();
            if self.gate.in_flight.load(Ordering::SeqCst) == 0 {
                break;
            }
            idle.await;
        }
        info!("cluster manager closed");
    }

    pub fn is_closed(&self) -> bool {
        self.gate.closed.load(Ordering::SeqCst)
    }

    /// Operations currently running, including transactions whose caller
    /// has gone away.
    pub fn in_flight(&self) -> usize {
        self.gate.in_flight.load(Ordering::SeqCst)
    }

    fn track(&self) -> InFlight {
        self.gate.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlight {
            gate: self.gate.clone(),
        }
    }

    fn enter(&self) -> ClusterResult<InFlight> {
        let guard = self.track();
        if self.is_closed() {
            return Err(ClusterError::Closed);
        }
        Ok(guard)
    }
}

/// The chosen engine no longer takes the container: the strategy refused
/// it under the reservation lock, or the capacity went to someone else.
fn is_stale_decision(err: &ClusterError) -> bool {
    matches!(
        err,
        ClusterError::Scheduling(SchedulerError::NoEligibleEngine { .. })
    ) || matches!(
        err.admission(),
        Some(AdmissionError::NotEnoughResources { .. })
    )
}

/// Kill then remove `id` on `engine`, evicting it once the runtime no
/// longer has it.
async fn remove_on(engine: &Engine, id: &str, name: &str) -> ClusterResult<()> {
    let client = engine.client();

    match client.kill_container(id).await {
        Ok(()) => {}
        Err(e) if e.is_not_found() => return evict_gone(engine, id, name).await,
        Err(source) => {
            return Err(ClusterError::Kill {
                engine: engine.id().to_string(),
                container: name.to_string(),
                source,
            });
        }
    }

    match client.remove_container(id).await {
        Ok(()) => {}
        Err(e) if e.is_not_found() => return evict_gone(engine, id, name).await,
        Err(source) => {
            return Err(ClusterError::Remove {
                engine: engine.id().to_string(),
                container: name.to_string(),
                source,
            });
        }
    }

    engine.evict(id).await;
    info!(engine = %engine.id(), container = %name, id = short_id(id), "container removed");
    Ok(())
}

async fn evict_gone(engine: &Engine, id: &str, name: &str) -> ClusterResult<()> {
    engine.evict(id).await;
    debug!(engine = %engine.id(), container = %name, id = short_id(id), "container already gone from runtime");
    Ok(())
}

impl std::fmt::Debug for ClusterManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterManager")
            .field("closed", &self.is_closed())
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}
