use crate::extract::Extractor;
use chrono::Utc;
use std::collections::HashMap;

/// One structured log line, ready for delivery.
///
/// `timestamp_ns` is always a valid epoch-nanosecond value: when the
/// extractor finds no timestamp in the line, the ingestion-time wall clock is
/// used instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp_ns: i64,
    pub text: String,
    pub level: String,
}

impl LogEntry {
    /// Build an entry from a raw line. Returns `None` for lines that are
    /// empty after trimming; those are filtered, not errors.
    pub fn from_line(line: &str, extractor: &dyn Extractor) -> Option<Self> {
        let text = line.trim();
        if text.is_empty() {
            return None;
        }

        let timestamp_ns = extractor
            .extract_timestamp(text)
            .and_then(|ts| ts.timestamp_nanos_opt())
            .unwrap_or_else(|| Utc::now().timestamp_nanos_opt().unwrap_or(0));

        Some(Self {
            timestamp_ns,
            text: text.to_string(),
            level: extractor.extract_level(text),
        })
    }

    /// Epoch seconds of this entry, used as the Docker since-cursor.
    pub fn timestamp_secs(&self) -> u64 {
        (self.timestamp_ns / 1_000_000_000).max(0) as u64
    }

    /// Convert into the `(timestamp, line, metadata)` shape the sink expects.
    pub fn into_loki_value(self) -> (String, String, HashMap<String, String>) {
        let metadata = HashMap::from([("level".to_string(), self.level)]);
        (self.timestamp_ns.to_string(), self.text, metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::RegexExtractor;

    #[test]
    fn test_entry_from_structured_line() {
        let extractor = RegexExtractor::default();
        let entry = LogEntry::from_line("2024-01-01 10:00:00.123|info|hello", &extractor).unwrap();

        assert_eq!(entry.timestamp_ns, 1_704_103_200_123_000_000);
        assert_eq!(entry.level, "info");
        assert_eq!(entry.text, "2024-01-01 10:00:00.123|info|hello");
    }

    #[test]
    fn test_empty_line_filtered() {
        let extractor = RegexExtractor::default();
        assert!(LogEntry::from_line("", &extractor).is_none());
        assert!(LogEntry::from_line("   \t  ", &extractor).is_none());
        assert!(LogEntry::from_line("\r\n", &extractor).is_none());
    }

    #[test]
    fn test_fallback_timestamp_is_wall_clock() {
        let extractor = RegexExtractor::default();
        let before = Utc::now().timestamp_nanos_opt().unwrap();
        let entry = LogEntry::from_line("no timestamp here", &extractor).unwrap();
        let after = Utc::now().timestamp_nanos_opt().unwrap();

        assert!(entry.timestamp_ns >= before && entry.timestamp_ns <= after);
        assert_eq!(entry.level, "unknown");
    }

    #[test]
    fn test_surrounding_whitespace_stripped() {
        let extractor = RegexExtractor::default();
        let entry = LogEntry::from_line("  2024-01-01 10:00:00|info|x  \n", &extractor).unwrap();
        assert_eq!(entry.text, "2024-01-01 10:00:00|info|x");
    }

    #[test]
    fn test_loki_value_shape() {
        let extractor = RegexExtractor::default();
        let entry = LogEntry::from_line("2024-01-01 10:00:00|error|boom", &extractor).unwrap();
        let secs = entry.timestamp_secs();
        let (ts, line, metadata) = entry.into_loki_value();

        assert_eq!(ts, "1704103200000000000");
        assert_eq!(secs, 1_704_103_200);
        assert_eq!(line, "2024-01-01 10:00:00|error|boom");
        assert_eq!(metadata.get("level"), Some(&"error".to_string()));
    }
}
