//! drydock-cluster — the scheduling and resource-accounting engine.
//!
//! # Architecture
//!
//! ```text
//! ClusterManager
//!   ├── engine registry (id → Engine)
//!   │   └── Engine
//!   │       ├── RuntimeClient (create/start/kill/remove/inspect/pull/list)
//!   │       └── RwLock<Ledger> (live containers + pending reservations)
//!   ├── strategy registry (name → Arc<dyn Strategy>)
//!   └── schedule_container()
//!       ├── snapshot engines → Strategy::schedule()
//!       └── PlacementTransaction
//!           Pending → Created → Started → Confirmed | Failed
//!
//! Slave (co-located with one runtime)
//!   └── re-validates admission under its own lock before executing
//! ```

pub mod engine;
pub mod error;
pub mod manager;
pub mod slave;
pub mod transaction;

pub use engine::Engine;
pub use error::{ClusterError, ClusterResult, ErrorKind};
pub use manager::ClusterManager;
pub use slave::Slave;
pub use transaction::{PlacementTransaction, TransactionState, container_config};
