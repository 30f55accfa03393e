use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::process::Child;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::{ProbeBatch, ProbeError, Progress};
use crate::config::{ConfigError, Settings};
use crate::peers::Candidate;
use crate::probes::icmp::PingProbe;
use crate::probes::{LatencyProbe, PingSummary, ProbeFailure, ProbeState, ProbeStatistics};

type Outcome = Result<PingSummary, ProbeFailure>;

/// Runs one probe per candidate with at most `parallel` child processes alive.
///
/// Candidates are launched in list order (FIFO). A single control loop owns
/// every statistics record; probe tasks only hand back `(index, outcome)`.
pub struct ProbeScheduler {
    probe: Arc<dyn LatencyProbe>,
    parallel: NonZeroUsize,
    deadline: Duration,
    progress: watch::Sender<Progress>,
}

impl ProbeScheduler {
    pub fn new(probe: impl LatencyProbe + 'static, parallel: NonZeroUsize, deadline: Duration) -> Self {
        let (progress, _) = watch::channel(Progress::default());
        Self {
            probe: Arc::new(probe),
            parallel,
            deadline,
            progress,
        }
    }

    /// A `ping`-backed scheduler configured from validated settings.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        settings.validate()?;
        let parallel = NonZeroUsize::new(settings.parallel).ok_or(ConfigError::ZeroParallel)?;
        Ok(Self::new(
            PingProbe::from_settings(settings),
            parallel,
            settings.probe_deadline(),
        ))
    }

    /// Watch batch progress. Observing never affects scheduling.
    pub fn subscribe(&self) -> watch::Receiver<Progress> {
        self.progress.subscribe()
    }

    /// Probe every candidate and return one record each, in input order.
    ///
    /// Individual probe failures are recorded per candidate. The batch only
    /// fails if a probe process cannot be started at all; probes already in
    /// flight are killed in that case.
    pub async fn run(&self, candidates: &[Candidate]) -> Result<ProbeBatch, ProbeError> {
        let total = candidates.len();
        let started_at = Utc::now();
        let clock = Instant::now();

        let mut statistics: Vec<ProbeStatistics> =
            candidates.iter().cloned().map(ProbeStatistics::pending).collect();
        let mut waiting: VecDeque<usize> = (0..total).collect();
        let mut active: JoinSet<(usize, Outcome)> = JoinSet::new();
        let mut completed = 0;
        let mut peak_in_flight = 0;

        info!(total, parallel = self.parallel.get(), "probing candidates");
        self.publish(completed, total, 0);

        while !waiting.is_empty() || !active.is_empty() {
            while active.len() < self.parallel.get() {
                let Some(index) = waiting.pop_front() else {
                    break;
                };
                let candidate = statistics[index].candidate();
                let child = self.launch(candidate.address())?;
                debug!(peer = %candidate, "probe started");

                let probe = Arc::clone(&self.probe);
                let deadline = self.deadline;
                active.spawn(async move { (index, reap(child, probe.as_ref(), deadline).await) });
                peak_in_flight = peak_in_flight.max(active.len());
            }
            self.publish(completed, total, active.len());

            let Some(joined) = active.join_next().await else {
                break;
            };
            let (index, outcome) = joined?;
            let record = &mut statistics[index];
            record.settle(outcome);
            completed += 1;

            match record.state() {
                ProbeState::Failed(failure) => {
                    debug!(peer = %record.candidate(), code = failure.code(), "probe failed: {}", failure)
                }
                _ => debug!("probe completed: {}", record),
            }
            self.publish(completed, total, active.len());
        }

        let batch = ProbeBatch {
            statistics,
            peak_in_flight,
            started_at,
            elapsed: clock.elapsed(),
        };
        info!(
            total,
            succeeded = batch.successes(),
            elapsed_ms = batch.elapsed.as_millis() as u64,
            "probing finished"
        );
        Ok(batch)
    }

    fn launch(&self, address: &str) -> Result<Child, ProbeError> {
        self.probe
            .command(address)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProbeError::Launch {
                program: self.probe.program().to_string(),
                address: address.to_string(),
                source,
            })
    }

    fn publish(&self, completed: usize, total: usize, in_flight: usize) {
        self.progress.send_replace(Progress {
            completed,
            total,
            in_flight,
        });
    }
}

/// Wait for one probe process and classify how it ended.
/// On deadline expiry the child is dropped, which kills it.
async fn reap(child: Child, probe: &dyn LatencyProbe, deadline: Duration) -> Outcome {
    let output = match tokio::time::timeout(deadline, child.wait_with_output()).await {
        Err(_) => return Err(ProbeFailure::TimedOut),
        Ok(Err(e)) => {
            warn!(error = %e, "lost track of probe process");
            return Err(ProbeFailure::Terminated);
        }
        Ok(Ok(output)) => output,
    };

    if !output.status.success() {
        return Err(match output.status.code() {
            Some(code) => ProbeFailure::Exit(code),
            None => ProbeFailure::Terminated,
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    probe.parse(&stdout).map_err(|e| {
        debug!(error = %e, output = %stdout, "can't parse probe output");
        ProbeFailure::Unparsable
    })
}
