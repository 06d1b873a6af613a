//! drydock-runtime — the container runtime as seen by the scheduler.
//!
//! The core never talks a wire protocol. It drives engines through the
//! [`RuntimeClient`] capability; whatever implements it owns transport,
//! credentials, and encoding.
//!
//! [`MemoryRuntime`] is an in-process implementation with fault
//! injection and a call log, used by the `drydockd simulate` mode and by
//! tests across the workspace.

pub mod client;
pub mod error;
pub mod memory;

pub use client::{ContainerConfig, ContainerInfo, HostConfig, ImageReference, RuntimeClient};
pub use error::{RuntimeError, RuntimeResult};
pub use memory::{MemoryRuntime, Operation, RuntimeCall};
