//! Parse the summary block printed by `ping -q`.
//!
//! Linux iputils:
//!
//! ```text
//! 5 packets transmitted, 5 received, 0% packet loss, time 4006ms
//! rtt min/avg/max/mdev = 11.284/12.046/13.001/0.602 ms
//! ```
//!
//! BSD/macOS spells the second line `round-trip min/avg/max/stddev = ...`.
//! Both figures are located anywhere in the text.

use thiserror::Error;

use super::PingSummary;

const RTT_MARKERS: [&str; 2] = ["rtt min/avg/max/mdev", "round-trip min/avg/max/stddev"];
const LOSS_MARKER: &str = "% packet loss";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("no rtt summary line")]
    MissingRtt,

    #[error("no packet loss figure")]
    MissingLoss,

    #[error("malformed rtt summary: {0:?}")]
    BadRtt(String),

    #[error("malformed packet loss: {0:?}")]
    BadLoss(String),
}

/// Parse the full stdout of one ping run.
pub fn parse_ping_output(output: &str) -> Result<PingSummary, ParseError> {
    let [rtt_min, rtt_avg, rtt_max, rtt_jitter] = parse_rtt(output)?;
    let packet_loss_percent = parse_loss(output)?;
    Ok(PingSummary {
        packet_loss_percent,
        rtt_min,
        rtt_avg,
        rtt_max,
        rtt_jitter,
    })
}

/// Unsigned decimal: digits with at most one fractional part.
fn parse_decimal(s: &str) -> Option<f64> {
    let (int, frac) = match s.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (s, None),
    };
    let digits = |p: &str| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit());
    if !digits(int) || frac.is_some_and(|f| !digits(f)) {
        return None;
    }
    s.parse().ok()
}

fn parse_rtt(output: &str) -> Result<[f64; 4], ParseError> {
    let (pos, marker) = RTT_MARKERS
        .iter()
        .filter_map(|m| output.find(m).map(|pos| (pos, *m)))
        .min_by_key(|(pos, _)| *pos)
        .ok_or(ParseError::MissingRtt)?;

    let line = output[pos..].lines().next().unwrap_or_default();
    let bad = || ParseError::BadRtt(line.trim().to_string());

    let rest = line[marker.len()..].trim_start();
    let rest = rest.strip_prefix('=').ok_or_else(bad)?.trim_start();
    let (figures, unit) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    // iputils may append `, pipe N` after the unit.
    let unit = unit.trim_start();
    if unit != "ms" && !unit.starts_with("ms,") && !unit.starts_with("ms ") {
        return Err(bad());
    }

    let values: Vec<f64> = figures
        .split('/')
        .map(parse_decimal)
        .collect::<Option<_>>()
        .ok_or_else(bad)?;
    <[f64; 4]>::try_from(values).map_err(|_| bad())
}

fn parse_loss(output: &str) -> Result<u8, ParseError> {
    let pos = output.find(LOSS_MARKER).ok_or(ParseError::MissingLoss)?;
    let head = &output[..pos];
    let start = head
        .rfind(|c: char| !(c.is_ascii_digit() || c == '.'))
        .map(|i| i + 1)
        .unwrap_or(0);
    let figure = &head[start..];

    let percent = parse_decimal(figure).ok_or_else(|| ParseError::BadLoss(figure.to_string()))?;
    if percent > 100.0 {
        return Err(ParseError::BadLoss(figure.to_string()));
    }
    Ok(percent.round() as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    const IPUTILS: &str = "\
PING 192.0.2.1 (192.0.2.1) 56(84) bytes of data.

--- 192.0.2.1 ping statistics ---
5 packets transmitted, 5 received, 0% packet loss, time 4006ms
rtt min/avg/max/mdev = 11.284/12.046/13.001/0.602 ms
";

    const MACOS: &str = "\
PING 192.0.2.1 (192.0.2.1): 56 data bytes

--- 192.0.2.1 ping statistics ---
5 packets transmitted, 4 packets received, 20.0% packet loss
round-trip min/avg/max/stddev = 20.100/25.300/30.900/4.200 ms
";

    #[test]
    fn test_iputils_summary() {
        let s = parse_ping_output(IPUTILS).unwrap();
        assert_eq!(s.packet_loss_percent, 0);
        assert_eq!(s.rtt_min, 11.284);
        assert_eq!(s.rtt_avg, 12.046);
        assert_eq!(s.rtt_max, 13.001);
        assert_eq!(s.rtt_jitter, 0.602);
    }

    #[test]
    fn test_bsd_summary() {
        let s = parse_ping_output(MACOS).unwrap();
        assert_eq!(s.packet_loss_percent, 20);
        assert_eq!(s.rtt_avg, 25.3);
        assert_eq!(s.rtt_jitter, 4.2);
    }

    #[test]
    fn test_order_and_noise_do_not_matter() {
        let text = "   rtt min/avg/max/mdev = 1/2.5/4/0.75 ms   \n\n noise line \n\t 3 packets transmitted, 2 received, 33.3333% packet loss \n";
        let s = parse_ping_output(text).unwrap();
        assert_eq!(s.packet_loss_percent, 33);
        assert_eq!([s.rtt_min, s.rtt_avg, s.rtt_max, s.rtt_jitter], [1.0, 2.5, 4.0, 0.75]);
    }

    #[test]
    fn test_pipe_suffix_after_unit() {
        let text = "\
--- 192.0.2.9 ping statistics ---
5 packets transmitted, 5 received, 0% packet loss, time 412ms
rtt min/avg/max/mdev = 150.112/152.004/155.870/1.902 ms, pipe 2
";
        let s = parse_ping_output(text).unwrap();
        assert_eq!(s.packet_loss_percent, 0);
        assert_eq!([s.rtt_min, s.rtt_avg, s.rtt_max, s.rtt_jitter], [150.112, 152.004, 155.87, 1.902]);

        let wrong_unit = "0% packet loss\nrtt min/avg/max/mdev = 1.0/2.0/3.0/0.1 msec";
        assert!(matches!(parse_ping_output(wrong_unit), Err(ParseError::BadRtt(_))));
    }

    #[test]
    fn test_unreachable_has_no_rtt_line() {
        let text = "5 packets transmitted, 0 received, 100% packet loss, time 4096ms\n";
        assert_eq!(parse_ping_output(text), Err(ParseError::MissingRtt));
    }

    #[test]
    fn test_missing_loss() {
        let text = "rtt min/avg/max/mdev = 1.0/2.0/3.0/0.5 ms\n";
        assert_eq!(parse_ping_output(text), Err(ParseError::MissingLoss));
    }

    #[test]
    fn test_empty_and_garbage() {
        assert_eq!(parse_ping_output(""), Err(ParseError::MissingRtt));
        assert_eq!(parse_ping_output("\u{0}\u{1}ping: unknown host"), Err(ParseError::MissingRtt));
    }

    #[test]
    fn test_malformed_figures() {
        for text in [
            "0% packet loss\nrtt min/avg/max/mdev = 1.0/2.0/3.0 ms",
            "0% packet loss\nrtt min/avg/max/mdev = 1.0/-2.0/3.0/0.1 ms",
            "0% packet loss\nrtt min/avg/max/mdev = 1.0/nan/3.0/0.1 ms",
            "0% packet loss\nrtt min/avg/max/mdev = 1.0/2.0/3.0/0.1",
            "0% packet loss\nrtt min/avg/max/mdev 1.0/2.0/3.0/0.1 ms",
            "0% packet loss\nrtt min/avg/max/mdev = 1.0/2.0/3.0/0.1/9 ms",
        ] {
            assert!(matches!(parse_ping_output(text), Err(ParseError::BadRtt(_))), "{text}");
        }
    }

    #[test]
    fn test_loss_out_of_range_or_missing_number() {
        let rtt = "rtt min/avg/max/mdev = 1.0/2.0/3.0/0.5 ms\n";
        assert!(matches!(parse_ping_output(&format!("{rtt}250% packet loss")), Err(ParseError::BadLoss(_))));
        assert!(matches!(parse_ping_output(&format!("{rtt}% packet loss")), Err(ParseError::BadLoss(_))));
    }
}
