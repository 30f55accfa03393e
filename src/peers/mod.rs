//! Candidate peers: the endpoint model plus discovery (markdown, git, cache).

pub mod cache;
pub mod markdown;
pub mod source;

use serde::Serialize;
use thiserror::Error;

pub use source::load_candidates;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("peer address must not be empty (url: {url})")]
    EmptyAddress { url: String },

    #[error("peer address {address:?} cannot start with a hyphen")]
    InvalidAddress { address: String },
}

/// One public peer endpoint eligible for probing.
///
/// Only `address` is used to probe; `url` is handed back untouched when the
/// peer is selected. `region` and `locality` are grouping tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    address: String,
    url: String,
    region: String,
    locality: String,
}

impl Candidate {
    pub fn new(
        address: impl Into<String>,
        url: impl Into<String>,
        region: impl Into<String>,
        locality: impl Into<String>,
    ) -> Result<Self, PeerError> {
        let address = address.into();
        let url = url.into();
        if address.trim().is_empty() {
            return Err(PeerError::EmptyAddress { url });
        }
        // Would be read as a flag by the probe command.
        if address.starts_with('-') {
            return Err(PeerError::InvalidAddress { address });
        }
        Ok(Self {
            address,
            url,
            region: region.into(),
            locality: locality.into(),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn locality(&self) -> &str {
        &self.locality
    }
}

impl std::fmt::Display for Candidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}/{})", self.address, self.region, self.locality)
    }
}
