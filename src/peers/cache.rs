//! JSON cache of the last successfully fetched peer list.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::Candidate;

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    yggdrasil_peers: Vec<CacheEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    address: String,
    url: String,
    world_part: String,
    country: String,
}

/// Load candidates from a cache file. Entries with an empty address are dropped.
pub fn load(path: &Path) -> Result<Vec<Candidate>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read peer cache: {}", path.display()))?;
    let file: CacheFile = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse peer cache: {}", path.display()))?;

    let mut peers = Vec::with_capacity(file.yggdrasil_peers.len());
    for entry in file.yggdrasil_peers {
        match Candidate::new(entry.address, entry.url, entry.world_part, entry.country) {
            Ok(c) => peers.push(c),
            Err(e) => debug!(error = %e, "skipping cached peer"),
        }
    }
    info!(path = %path.display(), count = peers.len(), "loaded cached peers");
    Ok(peers)
}

/// Overwrite the cache file with `peers`.
pub fn save(path: &Path, peers: &[Candidate]) -> Result<()> {
    let file = CacheFile {
        yggdrasil_peers: peers
            .iter()
            .map(|p| CacheEntry {
                address: p.address().to_string(),
                url: p.url().to_string(),
                world_part: p.region().to_string(),
                country: p.locality().to_string(),
            })
            .collect(),
    };
    let json = serde_json::to_string_pretty(&file)?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write peer cache: {}", path.display()))?;
    debug!(path = %path.display(), count = peers.len(), "saved peer cache");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_then_load_keeps_order_and_tags() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("peers.json");
        let peers = vec![
            Candidate::new("192.0.2.1", "tls://192.0.2.1:443", "europe", "germany")?,
            Candidate::new("2001:db8::2", "tcp://[2001:db8::2]:80", "asia", "japan")?,
        ];
        save(&path, &peers)?;
        assert_eq!(load(&path)?, peers);
        Ok(())
    }

    #[test]
    fn test_reads_yggdrasil_peers_layout() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("peers.json");
        std::fs::write(
            &path,
            r#"{"yggdrasil_peers": [
                {"address": "192.0.2.9", "url": "tls://192.0.2.9:1", "world_part": "mena", "country": "uae"},
                {"address": "", "url": "tls://:1", "world_part": "mena", "country": "uae"}
            ]}"#,
        )?;
        let peers = load(&path)?;
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].locality(), "uae");
        Ok(())
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(load(Path::new("/nonexistent/peerscout/peers.json")).is_err());
    }
}
