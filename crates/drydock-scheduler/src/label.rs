//! Label-constrained placement.

use drydock_core::{Container, EngineSnapshot};

use crate::strategy::Strategy;

/// Places a container only on engines carrying every label it lists.
///
/// A container with no labels may go anywhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct LabelStrategy;

impl Strategy for LabelStrategy {
    fn name(&self) -> &str {
        "label"
    }

    fn accepts(&self, container: &Container, engine: &EngineSnapshot) -> bool {
        container.labels.is_subset(&engine.labels)
    }
}
