//! The placement strategy capability.

use std::sync::Arc;

use tracing::debug;

use drydock_core::{Container, EngineId, EngineSnapshot, StrategyKind};

use crate::error::{SchedulerError, SchedulerResult};
use crate::label::LabelStrategy;
use crate::multi::MultiStrategy;
use crate::ranking::rank_engines;
use crate::unique::UniqueStrategy;

/// A placement policy.
///
/// Implementors only decide eligibility; picking among eligible engines
/// is shared free-capacity ranking. Strategies must be pure: the same
/// container and snapshot always produce the same decision.
pub trait Strategy: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Would this strategy place `container` on `engine`?
    fn accepts(&self, container: &Container, engine: &EngineSnapshot) -> bool;

    /// Engines this strategy accepts, in input order.
    fn eligible<'a>(
        &self,
        container: &Container,
        engines: &'a [EngineSnapshot],
    ) -> Vec<&'a EngineSnapshot> {
        engines
            .iter()
            .filter(|e| self.accepts(container, e))
            .collect()
    }

    /// Pick the engine `container` should run on.
    fn schedule(
        &self,
        container: &Container,
        engines: &[EngineSnapshot],
    ) -> SchedulerResult<EngineId> {
        let eligible = self.eligible(container, engines);
        let ranked = rank_engines(eligible, container);

        match ranked.into_iter().next() {
            Some(best) => {
                debug!(
                    strategy = self.name(),
                    container = %container.name,
                    engine = %best.engine_id,
                    fits = best.fits,
                    score = best.score,
                    "engine selected"
                );
                Ok(best.engine_id)
            }
            None => Err(SchedulerError::NoEligibleEngine {
                container: container.name.clone(),
                considered: engines.len(),
            }),
        }
    }
}

/// Build a strategy from configured kinds.
///
/// A single kind yields that strategy directly; several are chained in a
/// [`MultiStrategy`] in the given order.
pub fn from_kinds(kinds: &[StrategyKind]) -> Arc<dyn Strategy> {
    let mut members: Vec<Arc<dyn Strategy>> = kinds
        .iter()
        .map(|kind| -> Arc<dyn Strategy> {
            match kind {
                StrategyKind::Label => Arc::new(LabelStrategy),
                StrategyKind::Unique => Arc::new(UniqueStrategy),
            }
        })
        .collect();

    if members.len() == 1 {
        members.remove(0)
    } else {
        Arc::new(MultiStrategy::new(members))
    }
}
