//! peerscout -- latency-ranked public peer selection for overlay networks.
//!
//! This crate discovers candidate peers, probes each with the system `ping`
//! under a fixed concurrency ceiling, and selects the fastest subset, with an
//! optional cap on how many picks may share a locality.

pub mod config;
pub mod overlay;
pub mod peers;
pub mod probes;
pub mod scheduler;
pub mod selection;

use anyhow::Result;
use tracing::info;

use config::Settings;
use peers::Candidate;
use scheduler::{ProbeBatch, ProbeScheduler};

/// Probe `candidates` with `scheduler` and select the best according to `settings`.
pub async fn select_from(
    scheduler: &ProbeScheduler,
    settings: &Settings,
    candidates: &[Candidate],
) -> Result<(ProbeBatch, Vec<Candidate>)> {
    let batch = scheduler.run(candidates).await?;
    info!(successful = batch.successes(), "probing complete");

    let best = selection::select_best(&batch.statistics, settings.best, settings.locality_cap());
    info!(selected = best.len(), "selected best peers");
    Ok((batch, best))
}
