//! At-most-one-instance-per-engine placement.

use drydock_core::{Container, EngineSnapshot};

use crate::strategy::Strategy;

/// Refuses engines that already host a container with the same name.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniqueStrategy;

impl Strategy for UniqueStrategy {
    fn name(&self) -> &str {
        "unique"
    }

    fn accepts(&self, container: &Container, engine: &EngineSnapshot) -> bool {
        !engine.hosts(&container.name)
    }
}
