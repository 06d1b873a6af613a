//! drydock-core — types shared by every Drydock crate.
//!
//! - [`types`] — containers, engines, resource pairs, snapshots
//! - [`admission`] — the resource accountant and per-host ledger
//! - [`config`] — `drydock.toml` cluster configuration

pub mod admission;
pub mod config;
pub mod types;

pub use admission::{AdmissionError, Ledger, ReservationId, admit};
pub use config::{ClusterConfig, ConfigError, SchedulerConfig, StrategyKind};
pub use types::*;
