//! Run settings: compiled-in defaults, an optional TOML file, then CLI overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Environment variable naming a settings file when `--config` is not given.
pub const CONFIG_ENV: &str = "PEERSCOUT_CONFIG";

pub const DEFAULT_REPO_URL: &str = "https://github.com/yggdrasil-network/public-peers";

/// Grace period added on top of the nominal ping duration for the default deadline.
const PROBE_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("parallel must be at least 1")]
    ZeroParallel,

    #[error("pings must be at least 1")]
    ZeroPings,

    #[error("ping interval must be a finite, representable number of seconds >= 0, got {0}")]
    BadInterval(f64),

    #[error("probe timeout must be a finite, representable number of seconds > 0, got {0}")]
    BadTimeout(f64),

    #[error("repository url must not be empty")]
    EmptyRepoUrl,
}

/// Everything a run needs. Passed explicitly; there is no global instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Maximum number of probes in flight.
    pub parallel: usize,
    /// Echo requests per probe.
    pub pings: u32,
    /// Seconds between echo requests.
    pub ping_interval: f64,
    /// Per-probe deadline in seconds. `None` derives one from pings and interval.
    pub probe_timeout: Option<f64>,
    /// How many peers to select.
    pub best: usize,
    /// Maximum selected peers sharing a locality (country). 0 disables the cap.
    pub max_per_locality: usize,
    pub repo_url: String,
    /// Local public-peers checkout; skips the git clone when set.
    pub peers_dir: Option<PathBuf>,
    /// JSON cache of the peer list.
    pub peers_cache: Option<PathBuf>,
    /// Overlay configuration file whose `Peers` list gets rewritten.
    pub overlay_config: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            parallel: 10,
            pings: 5,
            ping_interval: 0.1,
            probe_timeout: None,
            best: 5,
            max_per_locality: 0,
            repo_url: DEFAULT_REPO_URL.to_string(),
            peers_dir: None,
            peers_cache: None,
            overlay_config: Some(PathBuf::from("yggdrasil.conf")),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let settings: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded settings");
        Ok(settings)
    }

    /// Load from `path`, else from `$PEERSCOUT_CONFIG`, else defaults.
    /// An explicitly named file that cannot be loaded is an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            return Self::load(Path::new(&env_path));
        }
        debug!("no settings file, using defaults");
        Ok(Self::default())
    }

    /// Reject values the probe engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.parallel == 0 {
            return Err(ConfigError::ZeroParallel);
        }
        if self.pings == 0 {
            return Err(ConfigError::ZeroPings);
        }
        if !self.ping_interval.is_finite() || self.ping_interval < 0.0 {
            return Err(ConfigError::BadInterval(self.ping_interval));
        }
        let nominal = Duration::try_from_secs_f64(self.ping_interval * f64::from(self.pings))
            .ok()
            .and_then(|d| d.checked_add(PROBE_GRACE + Duration::from_secs(1)));
        if nominal.is_none() {
            return Err(ConfigError::BadInterval(self.ping_interval));
        }
        if let Some(t) = self.probe_timeout {
            if !t.is_finite() || t <= 0.0 || Duration::try_from_secs_f64(t).is_err() {
                return Err(ConfigError::BadTimeout(t));
            }
        }
        if self.peers_dir.is_none() && self.repo_url.trim().is_empty() {
            return Err(ConfigError::EmptyRepoUrl);
        }
        Ok(())
    }

    /// Deadline for a single probe.
    pub fn probe_deadline(&self) -> Duration {
        match self.probe_timeout {
            Some(secs) => Duration::try_from_secs_f64(secs).unwrap_or(PROBE_GRACE),
            None => {
                let nominal = (self.ping_interval * f64::from(self.pings)).max(0.0).ceil();
                Duration::from_secs(nominal as u64).saturating_add(PROBE_GRACE)
            }
        }
    }

    /// The per-locality cap, or `None` when uncapped.
    pub fn locality_cap(&self) -> Option<usize> {
        (self.max_per_locality > 0).then_some(self.max_per_locality)
    }
}
