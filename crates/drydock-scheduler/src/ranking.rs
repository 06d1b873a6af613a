//! Free-capacity ranking for placement decisions.
//!
//! Spreads load by preferring engines that would have the most headroom
//! left after the container lands:
//! - **Fit**: engines that pass admission always outrank ones that don't
//! - **Headroom**: mean of free CPU and free memory fractions after placement
//! - **Tie-break**: ascending engine ID, so rankings are deterministic

use std::cmp::Ordering;

use drydock_core::{Container, EngineId, EngineSnapshot, admit};

/// Scored candidate for a single engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineScore {
    pub engine_id: EngineId,
    /// Whether admission would accept the container on this engine.
    pub fits: bool,
    /// Composite headroom score (higher = more room). Range: 0.0..=100.0.
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}

/// Individual score components for debugging.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreBreakdown {
    /// Percent of CPU capacity still free after placement.
    pub cpu_free: f64,
    /// Percent of memory capacity still free after placement.
    pub memory_free: f64,
}

fn free_percent(free_after: f64, capacity: f64) -> f64 {
    if capacity > 0.0 {
        (free_after / capacity).clamp(0.0, 1.0) * 100.0
    } else {
        0.0
    }
}

/// Score a single engine for `container`.
pub fn score_engine(engine: &EngineSnapshot, container: &Container) -> EngineScore {
    let free_after = engine.free() - container.requested();
    let cpu_free = free_percent(free_after.cpus, engine.capacity.cpus);
    let memory_free = free_percent(free_after.memory, engine.capacity.memory);

    EngineScore {
        engine_id: engine.id.clone(),
        fits: admit(&engine.capacity, &engine.reserved, container).is_ok(),
        score: (cpu_free + memory_free) / 2.0,
        breakdown: ScoreBreakdown {
            cpu_free,
            memory_free,
        },
    }
}

/// Score every engine and return them best first.
pub fn rank_engines<'a, I>(engines: I, container: &Container) -> Vec<EngineScore>
where
    I: IntoIterator<Item = &'a EngineSnapshot>,
{
    let mut scores: Vec<EngineScore> = engines
        .into_iter()
        .map(|e| score_engine(e, container))
        .collect();

    scores.sort_by(|a, b| {
        b.fits
            .cmp(&a.fits)
            .then_with(|| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal))
            .then_with(|| a.engine_id.cmp(&b.engine_id))
    });
    scores
}
