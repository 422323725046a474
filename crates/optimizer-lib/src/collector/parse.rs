//! Parsers for the runtime's human-formatted output

use chrono::DateTime;

/// `"12.5%"` -> `12.5`
pub fn parse_percent(s: &str) -> Option<f64> {
    s.trim().trim_end_matches('%').trim().parse().ok()
}

/// Size string with binary or decimal units (`"12.3MiB"`, `"1.2GB"`, `"512B"`)
pub fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let value: f64 = number.parse().ok()?;

    let multiplier: f64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1.0,
        "kib" | "ki" => 1024.0,
        "mib" | "mi" => 1024.0 * 1024.0,
        "gib" | "gi" => 1024.0 * 1024.0 * 1024.0,
        "tib" | "ti" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        "kb" | "k" => 1e3,
        "mb" | "m" => 1e6,
        "gb" | "g" => 1e9,
        "tb" | "t" => 1e12,
        _ => return None,
    };

    Some((value * multiplier) as u64)
}

/// Used bytes from a `"used / limit"` memory usage column
pub fn parse_mem_usage(s: &str) -> Option<u64> {
    parse_size(s.split('/').next()?)
}

/// RFC 3339 start time to unix seconds.
///
/// The runtime reports the zero time (`0001-01-01T00:00:00Z`) for containers
/// that never started; that maps to `None`.
pub fn parse_started_at(s: &str) -> Option<i64> {
    let ts = DateTime::parse_from_rfc3339(s.trim()).ok()?.timestamp();
    (ts > 0).then_some(ts)
}
