//! Extract peer endpoints from the public-peers markdown files.
//!
//! Each usable line looks like:
//!
//! ```text
//! * `tls://[2a01:4f8::1]:443?key=abcd`
//! * `tcp://192.0.2.7:8080`
//! ```

use tracing::debug;

use super::Candidate;

const SCHEMES: [&str; 2] = ["tls://", "tcp://"];

/// URL and probe address pulled out of one markdown line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlAddress {
    pub url: String,
    pub address: String,
}

fn is_host_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '[' | ']' | ':' | '-')
}

/// Parse one markdown line. Returns `None` for anything that is not a peer entry.
pub fn parse_line(line: &str) -> Option<UrlAddress> {
    let body = line.trim_start().strip_prefix("* `")?;
    let body = &body[..body.find('`')?];

    let scheme = SCHEMES.iter().find(|s| body.starts_with(*s))?;
    let rest = &body[scheme.len()..];

    // The host is the longest run of host characters that is still followed
    // by a `:<digit>` port separator.
    let run = rest
        .char_indices()
        .find(|(_, c)| !is_host_char(*c))
        .map(|(i, _)| i)
        .unwrap_or(rest.len());
    let host_end = rest[..run]
        .match_indices(':')
        .map(|(i, _)| i)
        .filter(|&i| i > 0)
        .filter(|&i| rest[i + 1..].starts_with(|c: char| c.is_ascii_digit()))
        .last()?;

    let address = rest[..host_end].trim_matches(|c| c == '[' || c == ']');
    if address.is_empty() {
        return None;
    }

    Some(UrlAddress {
        url: body.to_string(),
        address: address.to_string(),
    })
}

/// Parse a whole markdown document into candidates tagged with `region`/`locality`.
/// Entries that do not make a valid candidate are skipped.
pub fn parse_document(text: &str, region: &str, locality: &str) -> Vec<Candidate> {
    text.lines()
        .filter_map(|line| parse_line(line.trim_end()))
        .filter_map(|ua| match Candidate::new(ua.address, ua.url, region, locality) {
            Ok(c) => Some(c),
            Err(e) => {
                debug!(error = %e, "skipping peer entry");
                None
            }
        })
        .collect()
}
