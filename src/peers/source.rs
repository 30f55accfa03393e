//! Discover candidates from a public-peers checkout, a git clone of one, or the cache.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{cache, markdown, Candidate};
use crate::config::Settings;

/// Top-level directories of the public-peers repository, one per world region.
pub const REGIONS: [&str; 6] = [
    "africa",
    "asia",
    "europe",
    "mena",
    "north-america",
    "south-america",
];

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to launch git: {0}. Is it installed?")]
    GitLaunch(#[source] std::io::Error),

    #[error("git clone of {url} exited with code {code:?}: {stderr}")]
    GitFailed {
        url: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("directory scan task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> SourceError + '_ {
    move |source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Scan a public-peers checkout. Each `<region>/<locality>.md` file contributes
/// its entries; files are visited in name order so the result is stable.
pub fn scan_directory(root: &Path) -> Result<Vec<Candidate>, SourceError> {
    let mut peers = Vec::new();

    for region in REGIONS {
        let dir = root.join(region);
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "region directory missing");
            continue;
        }

        let mut files = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(io_err(&dir))? {
            let path = entry.map_err(io_err(&dir))?.path();
            if path.extension().is_some_and(|ext| ext == "md") {
                files.push(path);
            }
        }
        files.sort();

        for path in files {
            let Some(locality) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let text = std::fs::read_to_string(&path).map_err(io_err(&path))?;
            let found = markdown::parse_document(&text, region, locality);
            debug!(region, locality, count = found.len(), "parsed peer file");
            peers.extend(found);
        }
    }

    Ok(peers)
}

/// Shallow-clone `repo_url` into a scratch directory and scan it.
/// The scratch directory is removed whether or not the scan succeeds.
pub async fn fetch_from_git(repo_url: &str) -> Result<Vec<Candidate>, SourceError> {
    let dest = std::env::temp_dir().join(format!("peerscout-{}", uuid::Uuid::new_v4()));
    info!(url = repo_url, dest = %dest.display(), "cloning public peers repository");

    let result = clone_and_scan(repo_url, dest.clone()).await;

    if dest.exists() {
        if let Err(e) = tokio::fs::remove_dir_all(&dest).await {
            warn!(dest = %dest.display(), error = %e, "failed to remove scratch clone");
        }
    }

    result
}

/// Arguments for a shallow clone. `--` keeps a url starting with `-` from
/// being read as an option.
fn clone_args<'a>(repo_url: &'a str, dest: &'a Path) -> [&'a OsStr; 7] {
    [
        OsStr::new("clone"),
        OsStr::new("--quiet"),
        OsStr::new("--depth"),
        OsStr::new("1"),
        OsStr::new("--"),
        OsStr::new(repo_url),
        dest.as_os_str(),
    ]
}

async fn clone_and_scan(repo_url: &str, dest: PathBuf) -> Result<Vec<Candidate>, SourceError> {
    let output = tokio::process::Command::new("git")
        .args(clone_args(repo_url, &dest))
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(SourceError::GitLaunch)?;

    if !output.status.success() {
        return Err(SourceError::GitFailed {
            url: repo_url.to_string(),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let peers = tokio::task::spawn_blocking(move || scan_directory(&dest)).await??;
    info!(count = peers.len(), "retrieved public peers from repository");
    Ok(peers)
}

/// Resolve the candidate list for a run.
///
/// A configured local checkout wins. Otherwise the repository is cloned; if
/// that yields nothing the cache file is used, and a fresh clone refreshes it.
pub async fn load_candidates(settings: &Settings) -> Result<Vec<Candidate>> {
    if let Some(dir) = &settings.peers_dir {
        info!(dir = %dir.display(), "scanning local public peers checkout");
        return Ok(scan_directory(dir)?);
    }

    let peers = match fetch_from_git(&settings.repo_url).await {
        Ok(peers) => peers,
        Err(e) => {
            warn!(error = %e, "fetching peers from git failed");
            Vec::new()
        }
    };

    let Some(cache_path) = &settings.peers_cache else {
        return Ok(peers);
    };

    if peers.is_empty() {
        info!(path = %cache_path.display(), "falling back to cached peers");
        return match cache::load(cache_path) {
            Ok(cached) => Ok(cached),
            Err(e) => {
                warn!(error = %e, "peer cache unavailable");
                Ok(Vec::new())
            }
        };
    }

    if let Err(e) = cache::save(cache_path, &peers) {
        warn!(error = %e, "failed to refresh peer cache");
    }
    Ok(peers)
}
