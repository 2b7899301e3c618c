//! Duration literals accepted by configuration values.
//!
//! A bare integer is read as seconds. Suffixed values use `ms`, `s`, `m`,
//! `h` or `d`.

use std::time::Duration;

/// Parse a duration literal such as `30`, `500ms`, `5m` or `1h`.
///
/// Returns `None` for empty input, unknown suffixes or overflow.
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use skeleton::config::parse_duration;
///
/// assert_eq!(parse_duration("90"), Some(Duration::from_secs(90)));
/// assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
/// assert_eq!(parse_duration("2h"), Some(Duration::from_secs(7200)));
/// assert_eq!(parse_duration("soon"), None);
/// ```
#[must_use]
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let trimmed = raw.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);
    if digits.is_empty() {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;
    match unit.trim() {
        "" | "s" => Some(Duration::from_secs(amount)),
        "ms" => Some(Duration::from_millis(amount)),
        "m" => amount.checked_mul(60).map(Duration::from_secs),
        "h" => amount.checked_mul(3_600).map(Duration::from_secs),
        "d" => amount.checked_mul(86_400).map(Duration::from_secs),
        _ => None,
    }
}
