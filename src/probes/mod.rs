//! Latency probes: the measurement primitive seam and per-candidate statistics.

pub mod icmp;
pub mod parser;

use serde::ser::SerializeStruct;
use serde::Serialize;
use thiserror::Error;

use crate::peers::Candidate;
pub use parser::ParseError;

/// Statistics recovered from one successful probe run (milliseconds).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PingSummary {
    pub packet_loss_percent: u8,
    pub rtt_min: f64,
    pub rtt_avg: f64,
    pub rtt_max: f64,
    pub rtt_jitter: f64,
}

/// Why a probe produced no usable statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProbeFailure {
    #[error("probe output could not be parsed")]
    Unparsable,

    #[error("probe exceeded its deadline and was killed")]
    TimedOut,

    #[error("probe process was terminated without an exit code")]
    Terminated,

    #[error("probe process exited with code {0}")]
    Exit(i32),
}

impl ProbeFailure {
    /// Numeric failure code: the exit status, or a negative sentinel.
    pub fn code(&self) -> i32 {
        match self {
            ProbeFailure::Unparsable => -1,
            ProbeFailure::TimedOut => -2,
            ProbeFailure::Terminated => -3,
            ProbeFailure::Exit(code) => *code,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProbeState {
    Pending,
    Completed(PingSummary),
    Failed(ProbeFailure),
}

/// The measurement state of one candidate.
///
/// Starts `Pending` and is settled exactly once by the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeStatistics {
    candidate: Candidate,
    state: ProbeState,
}

impl ProbeStatistics {
    pub fn pending(candidate: Candidate) -> Self {
        Self {
            candidate,
            state: ProbeState::Pending,
        }
    }

    pub fn completed(candidate: Candidate, summary: PingSummary) -> Self {
        Self {
            candidate,
            state: ProbeState::Completed(summary),
        }
    }

    pub fn failed(candidate: Candidate, failure: ProbeFailure) -> Self {
        Self {
            candidate,
            state: ProbeState::Failed(failure),
        }
    }

    /// Settle a pending record. Already settled records are left untouched.
    pub(crate) fn settle(&mut self, outcome: Result<PingSummary, ProbeFailure>) {
        if self.state != ProbeState::Pending {
            tracing::warn!(peer = %self.candidate, "ignoring second probe outcome");
            return;
        }
        self.state = match outcome {
            Ok(summary) => ProbeState::Completed(summary),
            Err(failure) => ProbeState::Failed(failure),
        };
    }

    pub fn candidate(&self) -> &Candidate {
        &self.candidate
    }

    pub fn into_candidate(self) -> Candidate {
        self.candidate
    }

    pub fn state(&self) -> &ProbeState {
        &self.state
    }

    pub fn summary(&self) -> Option<&PingSummary> {
        match &self.state {
            ProbeState::Completed(summary) => Some(summary),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.summary().is_some()
    }

    /// Loss percentage, or -1 while unmeasured.
    pub fn packet_loss_percent(&self) -> i32 {
        self.summary().map_or(-1, |s| i32::from(s.packet_loss_percent))
    }

    pub fn rtt_min(&self) -> f64 {
        self.summary().map_or(0.0, |s| s.rtt_min)
    }

    pub fn rtt_avg(&self) -> f64 {
        self.summary().map_or(0.0, |s| s.rtt_avg)
    }

    pub fn rtt_max(&self) -> f64 {
        self.summary().map_or(0.0, |s| s.rtt_max)
    }

    pub fn rtt_jitter(&self) -> f64 {
        self.summary().map_or(0.0, |s| s.rtt_jitter)
    }

    /// 0 when pending or successful, otherwise [`ProbeFailure::code`].
    pub fn failure_code(&self) -> i32 {
        match &self.state {
            ProbeState::Failed(failure) => failure.code(),
            _ => 0,
        }
    }

    pub fn status(&self) -> &'static str {
        match self.state {
            ProbeState::Pending => "pending",
            ProbeState::Completed(_) => "completed",
            ProbeState::Failed(_) => "failed",
        }
    }
}

impl Serialize for ProbeStatistics {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("ProbeStatistics", 8)?;
        s.serialize_field("peer", &self.candidate)?;
        s.serialize_field("status", self.status())?;
        s.serialize_field("packet_loss_percent", &self.packet_loss_percent())?;
        s.serialize_field("rtt_min", &self.rtt_min())?;
        s.serialize_field("rtt_avg", &self.rtt_avg())?;
        s.serialize_field("rtt_max", &self.rtt_max())?;
        s.serialize_field("rtt_jitter", &self.rtt_jitter())?;
        s.serialize_field("failure_code", &self.failure_code())?;
        s.end()
    }
}

impl std::fmt::Display for ProbeStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.candidate)?;
        match &self.state {
            ProbeState::Pending => Ok(()),
            ProbeState::Completed(s) => write!(
                f,
                " loss={}% min={} avg={} max={} mdev={}",
                s.packet_loss_percent, s.rtt_min, s.rtt_avg, s.rtt_max, s.rtt_jitter
            ),
            ProbeState::Failed(failure) => write!(f, " failed: {}", failure),
        }
    }
}

/// An external latency-measurement command.
///
/// The scheduler owns process handling (stdio, deadlines, reaping); an
/// implementation only says what to run and how to read its stdout.
pub trait LatencyProbe: Send + Sync {
    /// Program name, for diagnostics.
    fn program(&self) -> &str;

    /// Command measuring `address`.
    fn command(&self, address: &str) -> tokio::process::Command;

    /// Interpret the stdout of a run that exited with status 0.
    fn parse(&self, stdout: &str) -> Result<PingSummary, ParseError>;
}
