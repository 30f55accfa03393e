use super::{parser, LatencyProbe, ParseError, PingSummary};
use crate::config::Settings;

/// ICMP echo via the system `ping` binary.
///
/// Runs `ping -c <count> -q -i <interval> <address>`. Only the summary block
/// is needed, hence `-q`.
#[derive(Debug, Clone)]
pub struct PingProbe {
    program: String,
    count: u32,
    interval: f64,
}

impl PingProbe {
    pub fn new(count: u32, interval: f64) -> Self {
        Self {
            program: "ping".to_string(),
            count,
            interval,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.pings, settings.ping_interval)
    }

    /// Use a different ping binary (e.g. an absolute path).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Arguments passed before the target address.
    pub fn args(&self) -> Vec<String> {
        vec![
            "-c".to_string(),
            self.count.to_string(),
            "-q".to_string(),
            "-i".to_string(),
            self.interval.to_string(),
        ]
    }
}

impl LatencyProbe for PingProbe {
    fn program(&self) -> &str {
        &self.program
    }

    fn command(&self, address: &str) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(self.args()).arg(address);
        cmd
    }

    fn parse(&self, stdout: &str) -> Result<PingSummary, ParseError> {
        parser::parse_ping_output(stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args() {
        let probe = PingProbe::new(5, 0.1);
        assert_eq!(probe.args(), ["-c", "5", "-q", "-i", "0.1"]);
        assert_eq!(probe.program(), "ping");
    }

    #[test]
    fn test_from_settings() {
        let settings = Settings {
            pings: 3,
            ping_interval: 0.5,
            ..Settings::default()
        };
        let probe = PingProbe::from_settings(&settings).with_program("/usr/bin/ping");
        assert_eq!(probe.args(), ["-c", "3", "-q", "-i", "0.5"]);
        assert_eq!(probe.program(), "/usr/bin/ping");
    }

    #[test]
    fn test_integer_interval_formats_plainly() {
        assert_eq!(PingProbe::new(1, 1.0).args()[4], "1");
    }
}
