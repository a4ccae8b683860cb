//! Shared parsing helpers for human-readable policy values.

use lazy_static::lazy_static;
use regex::Regex;
use std::time::Duration;

use crate::error::ServiceError;

lazy_static! {
    /// Collection names double as directory and SQL identifiers, so only a
    /// conservative character set is allowed.
    pub static ref SAFE_NAME: Regex = Regex::new(r"^[A-Za-z0-9_]+$").unwrap();
    static ref SIZE_RE: Regex = Regex::new(r"(?i)^(\d+)\s*(K|M|G|T)?B?$").unwrap();
    static ref DURATION_RE: Regex = Regex::new(r"^(\d+)\s*(d|h|m|s)$").unwrap();
}

/// Parses a size string (e.g. "100G", "500MB") into bytes. Binary units.
pub fn parse_size(size_str: &str) -> Result<u64, ServiceError> {
    let trimmed = size_str.trim();
    let caps = SIZE_RE
        .captures(trimmed)
        .ok_or_else(|| ServiceError::Validation(format!("invalid size format: {}", size_str)))?;

    let value: u64 = caps[1]
        .parse()
        .map_err(|_| ServiceError::Validation(format!("invalid size number: {}", &caps[1])))?;

    let unit = caps
        .get(2)
        .map(|m| m.as_str().to_ascii_uppercase())
        .unwrap_or_default();

    let bytes = match unit.as_str() {
        "T" => value << 40,
        "G" => value << 30,
        "M" => value << 20,
        "K" => value << 10,
        _ => value,
    };
    Ok(bytes)
}

/// Parses a duration string with day support (e.g. "30d", "24h", "15m",
/// "90s"). The special value "0" is allowed and disables the check.
pub fn parse_duration(duration_str: &str) -> Result<Duration, ServiceError> {
    let trimmed = duration_str.trim();
    if trimmed == "0" {
        return Ok(Duration::ZERO);
    }

    let caps = DURATION_RE.captures(trimmed).ok_or_else(|| {
        ServiceError::Validation(format!("invalid duration format: {}", duration_str))
    })?;

    let value: u64 = caps[1]
        .parse()
        .map_err(|_| ServiceError::Validation(format!("invalid duration number: {}", &caps[1])))?;
    if value == 0 {
        return Ok(Duration::ZERO);
    }

    let secs = match &caps[2] {
        "d" => value * 24 * 3600,
        "h" => value * 3600,
        "m" => value * 60,
        _ => value,
    };
    Ok(Duration::from_secs(secs))
}

/// Formats a byte count for log and report messages (e.g. "1.5 MiB").
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
