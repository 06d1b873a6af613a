//! Placement transaction — binds a scheduling decision to runtime execution.
//!
//! ```text
//! Pending ──reserve──▶ (reserved) ──create──▶ Created ──start──▶ Started ──confirm──▶ Confirmed
//!    │                     │                     │
//!    └──────────────── any failure: release reservation ──────────────▶ Failed
//! ```
//!
//! The engine's ledger holds a reservation for the container while the
//! runtime calls run, so concurrent transactions see the capacity as
//! taken. The reservation becomes a tracked container only once the
//! container is running; on failure it is released and nothing is tracked.

use std::sync::Arc;

use tracing::{debug, info, warn};

use drydock_core::{Container, Placement, Resources};
use drydock_runtime::{ContainerConfig, HostConfig, ImageReference, RuntimeClient};
use drydock_scheduler::Strategy;

use crate::engine::Engine;
use crate::error::{ClusterError, ClusterResult};

/// CPU shares corresponding to one whole engine.
const CPU_SHARES_PER_ENGINE: f64 = 1024.0;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Pending,
    Created,
    Started,
    Confirmed,
    Failed,
}

/// One attempt to run one container on one engine.
///
/// Dropping an uncommitted or half-committed transaction releases its
/// reservation; runtime calls already issued are not undone.
pub struct PlacementTransaction {
    engine: Arc<Engine>,
    container: Container,
    strategy: Option<Arc<dyn Strategy>>,
    state: TransactionState,
}

impl PlacementTransaction {
    pub fn new(engine: Arc<Engine>, container: Container) -> Self {
        Self {
            engine,
            container,
            strategy: None,
            state: TransactionState::Pending,
        }
    }

    /// Re-check the decision with `strategy` when reserving, against the
    /// engine's current ledger.
    pub fn with_strategy(mut self, strategy: Arc<dyn Strategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    /// Run the transaction to completion.
    ///
    /// Can only be called once; a finished transaction returns
    /// [`ClusterError::TransactionFinished`].
    pub async fn commit(&mut self) -> ClusterResult<Placement> {
        if self.state != TransactionState::Pending {
            return Err(ClusterError::TransactionFinished(self.state));
        }

        let reservation = match self
            .engine
            .reserve(&self.container, self.strategy.as_deref())
            .await
        {
            Ok(reservation) => reservation,
            Err(e) => {
                self.state = TransactionState::Failed;
                return Err(e);
            }
        };

        match self.drive().await {
            Ok(id) => {
                reservation.confirm(&id, &mut self.container).await;
                self.state = TransactionState::Confirmed;
                info!(
                    engine = %self.engine.id(),
                    container = %self.container.name,
                    id = short_id(&id),
                    "container launched"
                );
                Ok(Placement {
                    container: self.container.clone(),
                    engine: self.engine.info().clone(),
                })
            }
            Err(e) => {
                reservation.release().await;
                self.state = TransactionState::Failed;
                Err(e)
            }
        }
    }

    /// Create and start the container. Returns the runtime ID.
    async fn drive(&mut self) -> ClusterResult<String> {
        let engine_id = self.engine.id().to_string();
        let config = container_config(&self.engine.capacity(), &self.container);
        let client = self.engine.client();

        let id = create_with_pull(client.as_ref(), &engine_id, &config).await?;
        self.state = TransactionState::Created;
        debug!(engine = %engine_id, container = %config.name, id = short_id(&id), "container created");

        let host = HostConfig {
            publish_all_ports: true,
        };
        start_or_cleanup(client.as_ref(), &engine_id, &config.name, &id, &host).await?;
        self.state = TransactionState::Started;
        Ok(id)
    }
}

/// Translate a container request into runtime units.
///
/// Memory goes from megabytes to bytes. CPU shares are the requested
/// fraction of `capacity.cpus`, scaled so a whole engine is 1024.
pub fn container_config(capacity: &Resources, container: &Container) -> ContainerConfig {
    let cpu_shares = if container.cpus > 0.0 && capacity.cpus > 0.0 {
        (container.cpus / capacity.cpus * CPU_SHARES_PER_ENGINE).round() as u64
    } else {
        0
    };

    ContainerConfig {
        name: container.name.clone(),
        image: container.image.clone(),
        hostname: container.hostname.clone(),
        domainname: container.domainname.clone(),
        env: container.env_pairs(),
        memory_bytes: (container.memory * BYTES_PER_MB).round() as u64,
        cpu_shares,
    }
}

/// Create a container, pulling its image and retrying once if the
/// runtime does not have it.
pub(crate) async fn create_with_pull(
    client: &dyn RuntimeClient,
    engine: &str,
    config: &ContainerConfig,
) -> ClusterResult<String> {
    let create_err = |source| ClusterError::Create {
        engine: engine.to_string(),
        container: config.name.clone(),
        source,
    };

    match client.create_container(config).await {
        Ok(id) => Ok(id),
        Err(e) if e.is_not_found() => {
            let image = ImageReference::parse(&config.image);
            warn!(%engine, image = %image.canonical(), "image not found, pulling");
            client
                .pull_image(&image.repository, &image.tag)
                .await
                .map_err(|source| ClusterError::Pull {
                    engine: engine.to_string(),
                    image: image.canonical(),
                    source,
                })?;
            client.create_container(config).await.map_err(create_err)
        }
        Err(e) => Err(create_err(e)),
    }
}

/// Start a created container. If the start fails the container is
/// removed so its name is free for a later attempt; a failed removal is
/// logged and the start error is returned.
pub(crate) async fn start_or_cleanup(
    client: &dyn RuntimeClient,
    engine: &str,
    name: &str,
    id: &str,
    host: &HostConfig,
) -> ClusterResult<()> {
    if let Err(source) = client.start_container(id, host).await {
        if let Err(cleanup) = client.remove_container(id).await {
            warn!(%engine, container = %name, id = short_id(id), error = %cleanup, "failed to remove container after start failure");
        }
        return Err(ClusterError::Start {
            engine: engine.to_string(),
            container: name.to_string(),
            source,
        });
    }
    Ok(())
}

/// First 12 characters of a runtime ID, for logs.
pub(crate) fn short_id(id: &str) -> &str {
    id.char_indices().nth(12).map_or(id, |(i, _)| &id[..i])
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use drydock_core::{AdmissionError, EngineInfo};
    use drydock_runtime::{MemoryRuntime, Operation, RuntimeCall, RuntimeError};

    fn engine_with(runtime: Arc<MemoryRuntime>) -> Arc<Engine> {
        let info = EngineInfo {
            id: "e1".to_string(),
            addr: "tcp://10.0.0.1:2375".to_string(),
            cpus: 4.0,
            memory: 8192.0,
            labels: BTreeSet::new(),
        };
        Arc::new(Engine::new(info, runtime))
    }

    #[test]
    fn config_converts_units() {
        let c = Container::new("web", "nginx:1.25")
            .with_resources(1.0, 256.0)
            .with_env("B", "2")
            .with_env("A", "1");
        let config = container_config(&Resources::new(4.0, 8192.0), &c);
        assert_eq!(config.cpu_shares, 256);
        assert_eq!(config.memory_bytes, 256 * 1024 * 1024);
        assert_eq!(config.env, vec!["A=1", "B=2"]);
        assert_eq!(config.image, "nginx:1.25");
    }

    #[test]
    fn zero_cpu_request_leaves_shares_unset() {
        let c = Container::new("web", "nginx");
        let config = container_config(&Resources::new(4.0, 8192.0), &c);
        assert_eq!(config.cpu_shares, 0);
        assert_eq!(config.memory_bytes, 0);
    }

    #[tokio::test]
    async fn successful_commit_confirms_and_tracks() {
        let runtime = Arc::new(MemoryRuntime::new().with_image("nginx"));
        let engine = engine_with(runtime.clone());

        let mut txn = PlacementTransaction::new(engine.clone(), Container::new("web", "nginx"));
        let placement = txn.commit().await.unwrap();

        assert_eq!(txn.state(), TransactionState::Confirmed);
        assert_eq!(placement.engine.id, "e1");
        let id = placement.container.id.clone().unwrap();
        assert_eq!(placement.container.engine_id.as_deref(), Some("e1"));
        assert!(runtime.inspect_container(&id).await.unwrap().running);
        assert_eq!(engine.containers().await.len(), 1);

        assert!(runtime.calls().await.contains(&RuntimeCall::Start {
            id,
            publish_all_ports: true
        }));
    }

    #[tokio::test]
    async fn missing_image_is_pulled_once_then_created_once_more() {
        let runtime = Arc::new(MemoryRuntime::new());
        let engine = engine_with(runtime.clone());

        let mut txn = PlacementTransaction::new(engine, Container::new("web", "nginx"));
        txn.commit().await.unwrap();

        let ops: Vec<Operation> = runtime.calls().await.iter().map(RuntimeCall::operation).collect();
        assert_eq!(
            ops,
            vec![Operation::Create, Operation::Pull, Operation::Create, Operation::Start]
        );
        assert!(runtime.calls().await.contains(&RuntimeCall::Pull {
            image: "nginx".to_string(),
            tag: "latest".to_string()
        }));
    }

    #[tokio::test]
    async fn retry_after_pull_is_not_repeated() {
        let runtime = Arc::new(MemoryRuntime::new());
        runtime
            .fail(Operation::Create, RuntimeError::NotFound("image nginx:latest".to_string()))
            .await;
        let engine = engine_with(runtime.clone());

        let mut txn = PlacementTransaction::new(engine.clone(), Container::new("web", "nginx"));
        let err = txn.commit().await.unwrap_err();

        assert!(matches!(err, ClusterError::Create { .. }));
        assert_eq!(runtime.call_count(Operation::Pull).await, 1);
        assert_eq!(runtime.call_count(Operation::Create).await, 2);
        assert_eq!(txn.state(), TransactionState::Failed);
        assert_eq!(engine.reserved().await, Resources::ZERO);
    }

    #[tokio::test]
    async fn pull_failure_is_fatal() {
        let runtime = Arc::new(MemoryRuntime::new());
        runtime
            .fail(Operation::Pull, RuntimeError::Unavailable("registry down".to_string()))
            .await;
        let engine = engine_with(runtime.clone());

        let mut txn = PlacementTransaction::new(engine, Container::new("web", "nginx:2"));
        let err = txn.commit().await.unwrap_err();
        assert!(matches!(err, ClusterError::Pull { ref image, .. } if image == "nginx:2"));
        assert_eq!(runtime.call_count(Operation::Create).await, 1);
    }

    #[tokio::test]
    async fn other_create_errors_do_not_pull() {
        let runtime = Arc::new(MemoryRuntime::new().with_image("nginx"));
        runtime
            .fail(Operation::Create, RuntimeError::Conflict("name in use".to_string()))
            .await;
        let engine = engine_with(runtime.clone());

        let mut txn = PlacementTransaction::new(engine, Container::new("web", "nginx"));
        assert!(txn.commit().await.is_err());
        assert_eq!(runtime.call_count(Operation::Pull).await, 0);
    }

    #[tokio::test]
    async fn start_failure_leaves_nothing_tracked() {
        let runtime = Arc::new(MemoryRuntime::new().with_image("nginx"));
        runtime
            .fail(Operation::Start, RuntimeError::Failed("exec format error".to_string()))
            .await;
        let engine = engine_with(runtime.clone());

        let c = Container::new("web", "nginx").with_resources(1.0, 512.0);
        let mut txn = PlacementTransaction::new(engine.clone(), c);
        let err = txn.commit().await.unwrap_err();

        assert!(matches!(err, ClusterError::Start { .. }));
        assert_eq!(txn.state(), TransactionState::Failed);
        assert!(engine.containers().await.is_empty());
        assert_eq!(engine.reserved().await, Resources::ZERO);
        // The created container was cleaned up on the runtime as well.
        assert_eq!(runtime.container_count().await, 0);
        assert_eq!(runtime.call_count(Operation::Start).await, 1);
    }

    #[tokio::test]
    async fn admission_failure_makes_no_runtime_calls() {
        let runtime = Arc::new(MemoryRuntime::new().with_image("nginx"));
        let engine = engine_with(runtime.clone());

        let mut c = Container::new("db", "postgres");
        c.volumes.push("/data".to_string());
        let mut txn = PlacementTransaction::new(engine, c);
        let err = txn.commit().await.unwrap_err();

        assert_eq!(err.admission(), Some(&AdmissionError::VolumesNotSupported));
        assert!(runtime.calls().await.is_empty());
    }

    #[tokio::test]
    async fn commit_twice_is_rejected() {
        let runtime = Arc::new(MemoryRuntime::new().with_image("nginx"));
        let engine = engine_with(runtime.clone());

        let mut txn = PlacementTransaction::new(engine, Container::new("web", "nginx"));
        txn.commit().await.unwrap();
        assert!(matches!(
            txn.commit().await,
            Err(ClusterError::TransactionFinished(TransactionState::Confirmed))
        ));
        assert_eq!(runtime.call_count(Operation::Create).await, 1);
    }

    #[tokio::test]
    async fn abandoned_commit_releases_reservation() {
        let runtime = Arc::new(MemoryRuntime::new().with_image("nginx"));
        runtime
            .delay(Operation::Create, std::time::Duration::from_millis(500))
            .await;
        let engine = engine_with(runtime.clone());

        let c = Container::new("web", "nginx").with_resources(1.0, 512.0);
        let mut txn = PlacementTransaction::new(engine.clone(), c);
        let outcome =
            tokio::time::timeout(std::time::Duration::from_millis(50), txn.commit()).await;
        assert!(outcome.is_err());

        assert_eq!(engine.reserved().await, Resources::ZERO);
        assert!(engine.containers().await.is_empty());
    }

    #[tokio::test]
    async fn strategy_refusal_fails_before_runtime_calls() {
        let runtime = Arc::new(MemoryRuntime::new().with_image("nginx"));
        let engine = engine_with(runtime.clone());

        let unique: Arc<dyn Strategy> = Arc::new(drydock_scheduler::UniqueStrategy);
        PlacementTransaction::new(engine.clone(), Container::new("web", "nginx"))
            .with_strategy(unique.clone())
            .commit()
            .await
            .unwrap();

        let mut second = PlacementTransaction::new(engine.clone(), Container::new("web", "nginx"))
            .with_strategy(unique);
        let err = second.commit().await.unwrap_err();
        assert!(matches!(
            err,
            ClusterError::Scheduling(drydock_scheduler::SchedulerError::NoEligibleEngine { .. })
        ));
        assert_eq!(second.state(), TransactionState::Failed);
        assert_eq!(runtime.call_count(Operation::Create).await, 1);
    }

    #[test]
    fn short_id_counts_characters() {
        assert_eq!(short_id("0123456789abcdef"), "0123456789ab");
        assert_eq!(short_id("abc"), "abc");
        assert_eq!(short_id("ééééééééééééééé"), "éééééééééééé");
        assert_eq!(short_id("容器容器容器容器容器容器容器"), "容器容器容器容器容器容器");
    }
}
