//! Utility functions for Latchkey
//!
//! Human-friendly duration parsing shared by configuration and the CLI.

use std::time::Duration;

use crate::error::LatchkeyError;

/// Parse a duration such as `"150ms"`, `"5s"`, `"2m"` or `"1h"`.
///
/// A bare number is read as seconds.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use latchkey_common::parse_duration;
///
/// assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
/// assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
/// assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));
/// assert!(parse_duration("soon").is_err());
/// ```
pub fn parse_duration(s: &str) -> Result<Duration, LatchkeyError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(LatchkeyError::IllegalArgument(
            "duration must not be empty".to_string(),
        ));
    }

    let (num_str, multiplier) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, 1u64)
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, 1000u64)
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, 60_000u64)
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, 3_600_000u64)
    } else {
        (s, 1000u64)
    };

    num_str
        .trim()
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .map(Duration::from_millis)
        .ok_or_else(|| LatchkeyError::IllegalArgument(format!("invalid duration '{}'", s)))
}

/// Render a duration in the same shorthand accepted by [`parse_duration`].
///
/// Whole seconds render as `"Ns"`, everything else as `"Nms"`.
pub fn format_duration(d: Duration) -> String {
    let millis = d.as_millis();
    if millis != 0 && millis % 1000 == 0 {
        format!("{}s", millis / 1000)
    } else {
        format!("{}ms", millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("100ms").unwrap(), Duration::from_millis(100));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn test_parse_duration_bare_number_is_seconds() {
        assert_eq!(parse_duration("15").unwrap(), Duration::from_secs(15));
        assert_eq!(parse_duration(" 3s ").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("-5s").is_err());
        assert!(parse_duration("1.5s").is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(5)), "5s");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1500ms");
        assert_eq!(format_duration(Duration::ZERO), "0ms");
    }
}
