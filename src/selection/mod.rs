//! Rank probed candidates and pick the best, optionally capped per locality.

use std::cmp::Ordering;
use std::collections::HashMap;

use tracing::debug;

use crate::peers::Candidate;
use crate::probes::ProbeStatistics;

/// Latency order: ascending average round-trip time.
pub fn by_rtt_avg(a: &ProbeStatistics, b: &ProbeStatistics) -> Ordering {
    a.rtt_avg().total_cmp(&b.rtt_avg())
}

/// Successful records, fastest first. Equal averages keep their input order.
pub fn rank(statistics: &[ProbeStatistics]) -> Vec<&ProbeStatistics> {
    let mut ranked: Vec<&ProbeStatistics> = statistics.iter().filter(|s| s.is_success()).collect();
    ranked.sort_by(|a, b| by_rtt_avg(a, b));
    ranked
}

/// Pick up to `best` candidates, fastest first.
///
/// With `max_per_locality` set (and non-zero), candidates whose locality
/// already holds that many picks are skipped without using up a slot.
pub fn select_best(
    statistics: &[ProbeStatistics],
    best: usize,
    max_per_locality: Option<usize>,
) -> Vec<Candidate> {
    let ranked = rank(statistics);
    debug!(successes = ranked.len(), best, ?max_per_locality, "selecting peers");

    let picked: Vec<&ProbeStatistics> = match max_per_locality.filter(|&cap| cap > 0) {
        None => ranked.into_iter().take(best).collect(),
        Some(cap) => {
            let mut per_locality: HashMap<&str, usize> = HashMap::new();
            let mut picked = Vec::with_capacity(best.min(ranked.len()));
            for stat in ranked {
                if picked.len() >= best {
                    break;
                }
                let count = per_locality.entry(stat.candidate().locality()).or_insert(0);
                if *count >= cap {
                    continue;
                }
                *count += 1;
                picked.push(stat);
            }
            picked
        }
    };

    for stat in &picked {
        debug!("  {}", stat);
    }
    picked.into_iter().map(|s| s.candidate().clone()).collect()
}
