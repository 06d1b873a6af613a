//! drydock-scheduler — placement decisions.
//!
//! A [`Strategy`] looks at a container and a snapshot of the fleet and
//! names one engine, or fails with [`SchedulerError::NoEligibleEngine`].
//! Strategies hold no container state; everything they need arrives in
//! the [`EngineSnapshot`](drydock_core::EngineSnapshot) slice, so the same
//! inputs always produce the same answer.
//!
//! # Components
//!
//! - **`strategy`** — the `Strategy` trait and config-driven construction
//! - **`label`** — engines must carry every label the container asks for
//! - **`unique`** — at most one container of a given name per engine
//! - **`multi`** — ordered composition; every member must accept
//! - **`ranking`** — free-capacity scoring used to pick among eligible engines

pub mod error;
pub mod label;
pub mod multi;
pub mod ranking;
pub mod strategy;
pub mod unique;

pub use error::{SchedulerError, SchedulerResult};
pub use label::LabelStrategy;
pub use multi::MultiStrategy;
pub use ranking::{EngineScore, rank_engines, score_engine};
pub use strategy::{Strategy, from_kinds};
pub use unique::UniqueStrategy;
