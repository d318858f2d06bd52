use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use thiserror::Error;

/// Default pattern: everything up to the first `|` is the timestamp.
pub const DEFAULT_TIMESTAMP_REGEX: &str = r"^([^|]+)";
/// Default pattern: the second `|`-delimited field is the level.
pub const DEFAULT_LEVEL_REGEX: &str = r"^[^|]+\|([^|]+)\|";

const LEVEL_UNKNOWN: &str = "unknown";

#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("regex compilation failed: {0}")]
    InvalidRegex(#[from] regex::Error),
}

/// Pluggable timestamp/level extraction. Implementations must be cheap to
/// call per line; the monitor invokes them for every non-empty line read.
pub trait Extractor: Send + Sync {
    /// Extract the timestamp from a log line, or `None` when the line
    /// carries no recognizable timestamp.
    fn extract_timestamp(&self, line: &str) -> Option<DateTime<Utc>>;

    /// Extract the severity label from a log line. Falls back to `"unknown"`.
    fn extract_level(&self, line: &str) -> String;
}

/// Regex-based extractor matching the `timestamp|level|message` convention.
///
/// Timestamps are parsed as `%Y-%m-%d %H:%M:%S` with optional fractional
/// seconds and are interpreted as UTC.
#[derive(Debug)]
pub struct RegexExtractor {
    timestamp_pattern: Regex,
    level_pattern: Regex,
}

impl RegexExtractor {
    pub fn new(timestamp_regex: &str, level_regex: &str) -> Result<Self, ExtractorError> {
        Ok(Self {
            timestamp_pattern: Regex::new(timestamp_regex)?,
            level_pattern: Regex::new(level_regex)?,
        })
    }

    fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S"))
            .ok()
    }
}

impl Default for RegexExtractor {
    fn default() -> Self {
        // Both default patterns are compile-time constants and always valid.
        Self::new(DEFAULT_TIMESTAMP_REGEX, DEFAULT_LEVEL_REGEX)
            .expect("default extractor patterns must compile")
    }
}

impl Extractor for RegexExtractor {
    fn extract_timestamp(&self, line: &str) -> Option<DateTime<Utc>> {
        let captures = self.timestamp_pattern.captures(line)?;
        let value = captures.get(1)?.as_str().trim();
        Self::parse_timestamp(value).map(|naive| Utc.from_utc_datetime(&naive))
    }

    fn extract_level(&self, line: &str) -> String {
        self.level_pattern
            .captures(line)
            .and_then(|captures| captures.get(1))
            .map(|m| m.as_str().trim().to_lowercase())
            .unwrap_or_else(|| LEVEL_UNKNOWN.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_with_millis() {
        let extractor = RegexExtractor::default();
        let ts = extractor
            .extract_timestamp("2024-01-01 10:00:00.123|info|hello")
            .unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-01-01T10:00:00.123+00:00");
        assert_eq!(ts.timestamp_subsec_millis(), 123);
    }

    #[test]
    fn test_timestamp_without_fraction() {
        let extractor = RegexExtractor::default();
        let ts = extractor
            .extract_timestamp("2024-01-01 10:00:00|warn|slow request")
            .unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-01-01T10:00:00+00:00");
    }

    #[test]
    fn test_timestamp_no_match() {
        let extractor = RegexExtractor::default();
        assert!(extractor.extract_timestamp("not a timestamp at all").is_none());
    }

    #[test]
    fn test_level_extracted_and_lowercased() {
        let extractor = RegexExtractor::default();
        assert_eq!(
            extractor.extract_level("2024-01-01 10:00:00.123|INFO|hello"),
            "info"
        );
    }

    #[test]
    fn test_level_defaults_to_unknown() {
        let extractor = RegexExtractor::default();
        assert_eq!(extractor.extract_level("no delimiters here"), "unknown");
    }

    #[test]
    fn test_custom_patterns() {
        let extractor = RegexExtractor::new(
            r"^\[(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2})\]",
            r"^\[[^\]]+\] (\w+):",
        )
        .unwrap();

        let ts = extractor
            .extract_timestamp("[2024-06-01 12:00:00] ERROR: boom")
            .unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-06-01T12:00:00+00:00");
        assert_eq!(extractor.extract_level("[2024-06-01 12:00:00] ERROR: boom"), "error");
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let result = RegexExtractor::new(r"([invalid", DEFAULT_LEVEL_REGEX);
        assert!(matches!(result, Err(ExtractorError::InvalidRegex(_))));
    }
}
