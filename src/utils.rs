//! Shared helpers for rendering and configuration values.

use std::borrow::Cow;
use std::time::Duration;

/// Quotes a string for display as a single POSIX shell word.
///
/// The result is always wrapped in single quotes; embedded single quotes
/// are written as `'\''`.
///
/// # Examples
///
/// ```
/// use ssh_hop::utils::shell_quote;
///
/// assert_eq!(shell_quote("host"), "'host'");
/// assert_eq!(shell_quote("it's"), "'it'\\''s'");
/// ```
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Parses a human-friendly duration such as `500ms`, `2s`, `5m` or `1h`.
///
/// A bare number is read as seconds. Values that overflow yield `None`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use ssh_hop::utils::parse_duration;
///
/// assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
/// assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_duration("soon"), None);
/// ```
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim().to_lowercase();

    if let Some(millis) = s.strip_suffix("ms") {
        millis.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>().ok()?.checked_mul(3600).map(Duration::from_secs)
    } else if let Some(minutes) = s.strip_suffix('m') {
        minutes.parse::<u64>().ok()?.checked_mul(60).map(Duration::from_secs)
    } else if let Some(seconds) = s.strip_suffix('s') {
        seconds.parse::<u64>().ok().map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

/// Truncates a string to at most `max_chars` characters, appending "..." if truncated.
///
/// Returns a `Cow<str>` to avoid allocation when no truncation is needed.
///
/// # Examples
///
/// ```
/// use ssh_hop::utils::truncate;
///
/// assert_eq!(truncate("hello", 10), "hello");
/// assert_eq!(truncate("hello world", 8), "hello...");
/// ```
pub fn truncate(s: &str, max_chars: usize) -> Cow<'_, str> {
    if s.chars().count() <= max_chars {
        Cow::Borrowed(s)
    } else if max_chars <= 3 {
        Cow::Owned(s.chars().take(max_chars).collect())
    } else {
        let head: String = s.chars().take(max_chars - 3).collect();
        Cow::Owned(format!("{}...", head))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote_plain() {
        assert_eq!(shell_quote("user@host"), "'user@host'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_shell_quote_metacharacters() {
        assert_eq!(shell_quote("$(reboot)"), "'$(reboot)'");
        assert_eq!(shell_quote("a b;c"), "'a b;c'");
        assert_eq!(shell_quote("'"), "''\\'''");
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("2s"), Some(Duration::from_secs(2)));
        assert_eq!(parse_duration("30m"), Some(Duration::from_secs(1800)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("90M"), Some(Duration::from_secs(5400)));
    }

    #[test]
    fn test_parse_duration_raw_seconds() {
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("  3s  "), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert_eq!(parse_duration("invalid"), None);
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("2x"), None);
        assert_eq!(parse_duration("ms"), None);
    }

    #[test]
    fn test_parse_duration_overflow() {
        assert_eq!(parse_duration("9999999999999999h"), None);
        assert_eq!(parse_duration("999999999999999999m"), None);
        assert_eq!(
            parse_duration("5124095576030431h"),
            Some(Duration::from_secs(5124095576030431 * 3600))
        );
    }

    #[test]
    fn test_truncate_no_truncation_needed() {
        let result = truncate("hello", 10);
        assert!(matches!(result, Cow::Borrowed(_)));
        assert_eq!(result, "hello");
    }

    #[test]
    fn test_truncate_with_ellipsis() {
        let result = truncate("hello world", 8);
        assert!(matches!(result, Cow::Owned(_)));
        assert_eq!(result, "hello...");
    }

    #[test]
    fn test_truncate_multibyte() {
        assert_eq!(truncate("héllo wörld", 7), "héll...");
        assert_eq!(truncate("日本語", 2), "日本");
    }
}
