pub mod docker;
pub mod file;

pub use docker::DockerStreamReader;
pub use file::FileReader;

use crate::entry::LogEntry;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("connection failure: {0}")]
    Transient(String),

    #[error("unexpected HTTP status {status} from log endpoint")]
    Http { status: u16 },
}

impl ReaderError {
    /// How long the monitor should back off before retrying the cycle.
    /// Transient connection trouble retries quickly with an unchanged cursor;
    /// everything else waits out a full poll interval.
    pub fn backoff(&self, poll_interval: Duration) -> Duration {
        match self {
            ReaderError::Transient(_) => Duration::from_millis(100),
            _ => poll_interval,
        }
    }
}

/// A raw line as produced by a reader, tagged with the cursor key it belongs
/// to and the source position after consuming it (byte offset for files;
/// unused for streaming sources, whose position derives from entry
/// timestamps).
#[derive(Debug, Clone)]
pub struct RawLine {
    pub text: String,
    pub cursor_key: String,
    pub position: u64,
}

/// Capability interface for the two source variants. The monitor control
/// loop is written once against this trait.
///
/// A cycle is one poll pass: for files, everything appended since the stored
/// offsets at the moment of reading; for a Docker stream, lines as they
/// arrive until the bounded read timeout or the connection ends. `next_line`
/// returning `Ok(None)` ends the cycle; the monitor flushes and calls
/// `begin_cycle` again.
#[async_trait]
pub trait SourceReader: Send {
    /// Human-readable label for log context.
    fn source_label(&self) -> &str;

    /// Read resumption cursors and open whatever the cycle needs.
    async fn begin_cycle(&mut self) -> Result<(), ReaderError>;

    /// Pull the next raw line of the current cycle.
    async fn next_line(&mut self) -> Result<Option<RawLine>, ReaderError>;

    /// The cursor commit this line justifies once its batch is flushed.
    /// `entry` is `None` when the line was filtered out (empty after trim);
    /// byte-offset sources still advance past such lines, timestamp-cursor
    /// sources do not.
    fn cursor_update(&self, line: &RawLine, entry: Option<&LogEntry>) -> Option<(String, u64)>;

    /// How long to wait after a cycle before starting the next one.
    fn cycle_delay(&self, since_last_flush: Duration) -> Duration;

    /// Labels the sink should attach in addition to app/service.
    fn extra_labels(&self) -> Option<HashMap<String, String>> {
        None
    }
}
