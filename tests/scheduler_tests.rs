//! Scheduler behaviour against a scripted probe primitive (`sh -c`).

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use peerscout::peers::Candidate;
use peerscout::probes::{parser, LatencyProbe, ParseError, PingSummary, ProbeFailure, ProbeState};
use peerscout::scheduler::{ProbeError, ProbeScheduler, Progress};

/// Runs a shell script chosen by the probed address.
struct ScriptProbe {
    program: String,
    scripts: HashMap<String, String>,
}

impl ScriptProbe {
    fn new(scripts: &[(&str, String)]) -> Self {
        Self {
            program: "sh".to_string(),
            scripts: scripts
                .iter()
                .map(|(addr, script)| (addr.to_string(), script.clone()))
                .collect(),
        }
    }
}

impl LatencyProbe for ScriptProbe {
    fn program(&self) -> &str {
        &self.program
    }

    fn command(&self, address: &str) -> tokio::process::Command {
        let script = self.scripts.get(address).map_or("exit 97", String::as_str);
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.arg("-c").arg(script);
        cmd
    }

    fn parse(&self, stdout: &str) -> Result<PingSummary, ParseError> {
        parser::parse_ping_output(stdout)
    }
}

fn reply(avg: f64) -> String {
    format!(
        "printf '5 packets transmitted, 5 received, 0%% packet loss, time 4ms\\nrtt min/avg/max/mdev = 1.000/{avg:.3}/90.000/0.500 ms\\n'"
    )
}

fn candidate(addr: &str, locality: &str) -> Candidate {
    Candidate::new(addr, format!("tls://{addr}:443"), "europe", locality).unwrap()
}

fn scheduler(probe: ScriptProbe, parallel: usize, deadline: Duration) -> ProbeScheduler {
    ProbeScheduler::new(probe, NonZeroUsize::new(parallel).unwrap(), deadline)
}

const LONG: Duration = Duration::from_secs(30);

#[tokio::test]
async fn test_every_candidate_gets_exactly_one_outcome() {
    let probe = ScriptProbe::new(&[
        ("10.0.0.1", reply(20.0)),
        ("10.0.0.2", "exit 2".to_string()),
        ("10.0.0.3", "echo 'garbage output'".to_string()),
        ("10.0.0.4", reply(5.5)),
        ("10.0.0.5", "kill -9 $$".to_string()),
        ("10.0.0.6", "printf '5 packets transmitted, 0 received, 100%% packet loss\\n'".to_string()),
    ]);
    let candidates: Vec<_> = (1..=6).map(|i| candidate(&format!("10.0.0.{i}"), "de")).collect();

    let batch = scheduler(probe, 3, LONG).run(&candidates).await.unwrap();

    assert_eq!(batch.statistics.len(), candidates.len());
    for (stat, cand) in batch.statistics.iter().zip(&candidates) {
        assert_eq!(stat.candidate(), cand);
        assert_ne!(*stat.state(), ProbeState::Pending);
    }

    let s = &batch.statistics;
    assert!(s[0].is_success());
    assert_eq!(s[0].rtt_avg(), 20.0);
    assert_eq!(s[0].packet_loss_percent(), 0);
    assert_eq!(*s[1].state(), ProbeState::Failed(ProbeFailure::Exit(2)));
    assert_eq!(s[1].failure_code(), 2);
    assert_eq!(*s[2].state(), ProbeState::Failed(ProbeFailure::Unparsable));
    assert_eq!(s[2].packet_loss_percent(), -1);
    assert_eq!(s[3].rtt_avg(), 5.5);
    assert_eq!(*s[4].state(), ProbeState::Failed(ProbeFailure::Terminated));
    assert_eq!(s[5].failure_code(), ProbeFailure::Unparsable.code());
    assert_eq!(batch.successes(), 2);
}

#[tokio::test]
async fn test_never_exceeds_parallel_ceiling() {
    let slow = format!("sleep 0.2; {}", reply(1.0));
    let addrs: Vec<String> = (1..=12).map(|i| format!("10.0.1.{i}")).collect();
    let scripts: Vec<(&str, String)> = addrs.iter().map(|a| (a.as_str(), slow.clone())).collect();
    let candidates: Vec<_> = addrs.iter().map(|a| candidate(a, "de")).collect();

    let sched = scheduler(ScriptProbe::new(&scripts), 3, LONG);
    let mut rx = sched.subscribe();
    let observer = tokio::spawn(async move {
        let mut seen: Vec<Progress> = Vec::new();
        while rx.changed().await.is_ok() {
            seen.push(*rx.borrow_and_update());
        }
        seen
    });

    let batch = sched.run(&candidates).await.unwrap();
    drop(sched);
    let seen = observer.await.unwrap();

    assert_eq!(batch.statistics.len(), 12);
    assert_eq!(batch.successes(), 12);
    assert_eq!(batch.peak_in_flight, 3);

    assert!(seen.iter().all(|p| p.in_flight <= 3 && p.total == 12));
    assert!(seen.windows(2).all(|w| w[0].completed <= w[1].completed));
    assert_eq!(seen.last().map(|p| (p.completed, p.in_flight)), Some((12, 0)));
}

#[tokio::test]
async fn test_ceiling_larger_than_list() {
    let probe = ScriptProbe::new(&[("10.0.2.1", reply(1.0)), ("10.0.2.2", reply(2.0))]);
    let candidates = vec![candidate("10.0.2.1", "a"), candidate("10.0.2.2", "b")];

    let batch = scheduler(probe, 10, LONG).run(&candidates).await.unwrap();
    assert_eq!(batch.peak_in_flight, 2);
    assert_eq!(batch.successes(), 2);
}

#[tokio::test]
async fn test_launch_order_is_fifo() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("order.log");
    let addrs: Vec<String> = (1..=5).map(|i| format!("10.0.3.{i}")).collect();
    let scripts: Vec<(&str, String)> = addrs
        .iter()
        .map(|a| (a.as_str(), format!("echo {a} >> '{}'; {}", log.display(), reply(1.0))))
        .collect();
    let candidates: Vec<_> = addrs.iter().map(|a| candidate(a, "x")).collect();

    let batch = scheduler(ScriptProbe::new(&scripts), 1, LONG).run(&candidates).await.unwrap();
    assert_eq!(batch.peak_in_flight, 1);

    let order = std::fs::read_to_string(&log).unwrap();
    let order: Vec<&str> = order.lines().collect();
    assert_eq!(order, addrs);
}

#[tokio::test]
async fn test_deadline_kills_hung_probe() {
    let probe = ScriptProbe::new(&[("10.0.4.1", "sleep 20".to_string()), ("10.0.4.2", reply(3.0))]);
    let candidates = vec![candidate("10.0.4.1", "a"), candidate("10.0.4.2", "b")];

    let started = Instant::now();
    let batch = scheduler(probe, 2, Duration::from_millis(300)).run(&candidates).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(*batch.statistics[0].state(), ProbeState::Failed(ProbeFailure::TimedOut));
    assert_eq!(batch.statistics[0].failure_code(), -2);
    assert!(batch.statistics[1].is_success());
}

#[tokio::test]
async fn test_missing_primitive_is_fatal() {
    let mut probe = ScriptProbe::new(&[("10.0.5.1", reply(1.0))]);
    probe.program = "/nonexistent/peerscout-probe".to_string();

    let err = scheduler(probe, 2, LONG)
        .run(&[candidate("10.0.5.1", "a")])
        .await
        .unwrap_err();
    match err {
        ProbeError::Launch { program, address, .. } => {
            assert_eq!(program, "/nonexistent/peerscout-probe");
            assert_eq!(address, "10.0.5.1");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_empty_candidate_list() {
    let batch = scheduler(ScriptProbe::new(&[]), 4, LONG).run(&[]).await.unwrap();
    assert!(batch.statistics.is_empty());
    assert_eq!(batch.peak_in_flight, 0);
}

#[tokio::test]
async fn test_probe_then_select_with_locality_cap() {
    let probe = ScriptProbe::new(&[
        ("10.0.0.1", reply(50.0)),
        ("10.0.0.2", reply(10.0)),
        ("10.0.0.3", reply(30.0)),
    ]);
    let candidates = vec![
        candidate("10.0.0.1", "A"),
        candidate("10.0.0.2", "A"),
        candidate("10.0.0.3", "B"),
    ];
    let settings = peerscout::config::Settings {
        best: 2,
        max_per_locality: 1,
        ..Default::default()
    };

    let (batch, best) = peerscout::select_from(&scheduler(probe, 2, LONG), &settings, &candidates)
        .await
        .unwrap();
    assert_eq!(batch.successes(), 3);
    let picked: Vec<_> = best.iter().map(|c| c.address()).collect();
    assert_eq!(picked, ["10.0.0.2", "10.0.0.3"]);
}
