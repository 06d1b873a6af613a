//! Strategy composition.

use std::sync::Arc;

use drydock_core::{Container, EngineSnapshot};

use crate::strategy::Strategy;

/// Chains strategies; an engine is eligible only if every member accepts it.
///
/// Members are consulted in order and evaluation stops at the first
/// refusal. With no members every engine is eligible.
#[derive(Clone, Default)]
pub struct MultiStrategy {
    members: Vec<Arc<dyn Strategy>>,
}

impl MultiStrategy {
    pub fn new(members: Vec<Arc<dyn Strategy>>) -> Self {
        Self { members }
    }

    pub fn push(&mut self, member: Arc<dyn Strategy>) {
        self.members.push(member);
    }

    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|m| m.name())
    }
}

impl Strategy for MultiStrategy {
    fn name(&self) -> &str {
        "multi"
    }

    fn accepts(&self, container: &Container, engine: &EngineSnapshot) -> bool {
        self.members.iter().all(|m| m.accepts(container, engine))
    }
}
