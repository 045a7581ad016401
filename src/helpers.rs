//! Free-standing parsing and formatting helpers shared across modules.

use std::time::Duration;

/// Parses a CrowdSec/Go style duration string such as `"4h"`, `"168h"`,
/// `"24h30m"` or `"1.5h"`. Units: `ns`, `us`, `ms`, `s`, `m`, `h`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    if s.starts_with('-') {
        // Negative TTLs make no sense for ban decisions or cache windows.
        return Err(format!("duration cannot be negative: {s}"));
    }
    let s = s.strip_prefix('+').unwrap_or(s);
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total_secs = 0f64;
    let mut rest = s;
    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(|| format!("missing unit in duration: {s}"))?;
        if num_end == 0 {
            return Err(format!("invalid duration: {s}"));
        }
        let value: f64 = rest[..num_end]
            .parse()
            .map_err(|_| format!("invalid number in duration: {s}"))?;
        rest = &rest[num_end..];

        let (unit_secs, unit_len) = if rest.starts_with("ns") {
            (1e-9, 2)
        } else if rest.starts_with("us") {
            (1e-6, 2)
        } else if rest.starts_with("µs") {
            (1e-6, "µs".len())
        } else if rest.starts_with("ms") {
            (1e-3, 2)
        } else if rest.starts_with('s') {
            (1.0, 1)
        } else if rest.starts_with('m') {
            (60.0, 1)
        } else if rest.starts_with('h') {
            (3600.0, 1)
        } else {
            return Err(format!("unknown unit in duration: {s}"));
        };
        total_secs += value * unit_secs;
        rest = &rest[unit_len..];
    }

    Ok(Duration::from_secs_f64(total_secs))
}

/// Formats a duration the way the LAPI expects in `since=` parameters,
/// e.g. `15m0s`, `1h2m3s`, `45s`.
pub fn format_duration(d: Duration) -> String {
    let total = d.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    let millis = d.subsec_millis();

    let secs_part = if millis > 0 && hours == 0 && minutes == 0 {
        format!("{seconds}.{millis:03}s")
    } else {
        format!("{seconds}s")
    };

    if hours > 0 {
        format!("{hours}h{minutes}m{secs_part}")
    } else if minutes > 0 {
        format!("{minutes}m{secs_part}")
    } else {
        secs_part
    }
}

pub fn is_hop_by_hop_http_header(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-connection"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}
