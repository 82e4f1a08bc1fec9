//! Coordinator event fan-out (spec §9: "progress and completion events are
//! multiple-producer/multiple-consumer fan-out"). Backed by a `tokio`
//! broadcast channel: slow subscribers may miss `ProgressChanged` events
//! (acceptable per spec) but never block a worker.

use crate::request::{OptimiseOutcome, Progress};

#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    ProgressChanged(Progress),
    RequestCompleted(OptimiseOutcome),
    RequestFailed(OptimiseOutcome),
}
