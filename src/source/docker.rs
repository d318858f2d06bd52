use super::{RawLine, ReaderError, SourceReader};
use crate::entry::LogEntry;
use crate::offset::{source_key, OffsetStore};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(2);

type ByteStream = BoxStream<'static, reqwest::Result<Vec<u8>>>;

/// Consumes a container's stdout/stderr over the Docker Engine API's
/// streaming log endpoint, resuming from the last flushed high-water
/// timestamp (the `since` parameter, epoch seconds).
///
/// Every reconnect re-requests from the stored cursor, so a few seconds of
/// duplicates around a reconnect are possible; lines are never lost.
pub struct DockerStreamReader {
    label: String,
    container_name: String,
    base_url: String,
    cursor_key: String,
    store: Arc<OffsetStore>,
    client: reqwest::Client,
    read_timeout: Duration,
    stream: Option<ByteStream>,
    buf: Vec<u8>,
    stream_done: bool,
}

impl DockerStreamReader {
    pub fn new(
        app_name: &str,
        container_name: String,
        api_host: &str,
        api_port: u16,
        store: Arc<OffsetStore>,
    ) -> Self {
        let safe_app_name = app_name.replace(' ', "_");
        Self {
            label: format!("docker:{}", container_name),
            cursor_key: source_key(&safe_app_name, &container_name),
            base_url: format!("http://{}:{}", api_host, api_port),
            container_name,
            store,
            client: reqwest::Client::new(),
            read_timeout: DEFAULT_READ_TIMEOUT,
            stream: None,
            buf: Vec::new(),
            stream_done: false,
        }
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    fn logs_url(&self, since: u64) -> String {
        format!(
            "{}/containers/{}/logs?stdout=1&stderr=1&follow=1&tail=0&since={}",
            self.base_url, self.container_name, since
        )
    }

    fn raw_line(&self, text: String) -> RawLine {
        RawLine {
            text,
            cursor_key: self.cursor_key.clone(),
            position: 0,
        }
    }
}

/// Split one `\n`-terminated line off the front of `buf`, stripping the
/// terminator and any trailing `\r`.
fn take_line(buf: &mut Vec<u8>) -> Option<String> {
    let newline = buf.iter().position(|&b| b == b'\n')?;
    let mut line: Vec<u8> = buf.drain(..=newline).collect();
    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Some(String::from_utf8_lossy(&line).into_owned())
}

#[async_trait]
impl SourceReader for DockerStreamReader {
    fn source_label(&self) -> &str {
        &self.label
    }

    async fn begin_cycle(&mut self) -> Result<(), ReaderError> {
        self.stream = None;
        self.buf.clear();
        self.stream_done = false;

        // No stored cursor means "start from now": a brand new monitor should
        // not replay the container's entire history.
        let since = self
            .store
            .read_or(&self.cursor_key, Utc::now().timestamp().max(0) as u64);

        // Bound only the connection attempt; the body is a follow stream and
        // must stay open indefinitely.
        let response = tokio::time::timeout(self.read_timeout, self.client.get(self.logs_url(since)).send())
            .await
            .map_err(|_| ReaderError::Transient("connect timed out".to_string()))?
            .map_err(|e| ReaderError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReaderError::Http {
                status: status.as_u16(),
            });
        }

        debug!(container = %self.container_name, since = since, "Log stream connected");
        self.stream = Some(
            response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
                .boxed(),
        );
        Ok(())
    }

    async fn next_line(&mut self) -> Result<Option<RawLine>, ReaderError> {
        loop {
            if let Some(text) = take_line(&mut self.buf) {
                return Ok(Some(self.raw_line(text)));
            }

            if self.stream_done {
                // Connection ended; emit any unterminated tail before closing
                // the cycle.
                if self.buf.is_empty() {
                    return Ok(None);
                }
                let tail = String::from_utf8_lossy(&self.buf).into_owned();
                self.buf.clear();
                return Ok(Some(self.raw_line(tail)));
            }

            let stream = match self.stream.as_mut() {
                Some(stream) => stream,
                None => return Ok(None),
            };

            match tokio::time::timeout(self.read_timeout, stream.next()).await {
                // Read timeout: end the cycle so the monitor can flush and
                // observe a stop signal; the cursor is left untouched.
                Err(_elapsed) => {
                    self.stream = None;
                    return Ok(None);
                }
                Ok(None) => self.stream_done = true,
                Ok(Some(Ok(chunk))) => self.buf.extend_from_slice(&chunk),
                Ok(Some(Err(e))) => {
                    self.stream = None;
                    return Err(ReaderError::Transient(e.to_string()));
                }
            }
        }
    }

    fn cursor_update(&self, _line: &RawLine, entry: Option<&LogEntry>) -> Option<(String, u64)> {
        // The since-cursor only moves on delivered entries; filtered lines
        // carry no timestamp to advance to.
        entry.map(|entry| (self.cursor_key.clone(), entry.timestamp_secs()))
    }

    fn cycle_delay(&self, _since_last_flush: Duration) -> Duration {
        // Streaming source: reconnect immediately, backoff is handled per
        // error class by the monitor.
        Duration::ZERO
    }

    fn extra_labels(&self) -> Option<HashMap<String, String>> {
        Some(HashMap::from([(
            "container".to_string(),
            self.container_name.clone(),
        )]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn new_reader(store: Arc<OffsetStore>) -> DockerStreamReader {
        DockerStreamReader::new("my app", "api-1".to_string(), "localhost", 2375, store)
    }

    #[test]
    fn test_take_line_splits_and_strips() {
        let mut buf = b"first\r\nsecond\npartial".to_vec();
        assert_eq!(take_line(&mut buf).unwrap(), "first");
        assert_eq!(take_line(&mut buf).unwrap(), "second");
        assert!(take_line(&mut buf).is_none());
        assert_eq!(buf, b"partial");
    }

    #[test]
    fn test_logs_url_carries_cursor() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(OffsetStore::open(dir.path()).unwrap());
        let reader = new_reader(store);

        assert_eq!(
            reader.logs_url(1_700_000_000),
            "http://localhost:2375/containers/api-1/logs?stdout=1&stderr=1&follow=1&tail=0&since=1700000000"
        );
    }

    #[test]
    fn test_cursor_update_uses_entry_timestamp() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(OffsetStore::open(dir.path()).unwrap());
        let reader = new_reader(store);

        let entry = LogEntry {
            timestamp_ns: 1_700_000_123_456_000_000,
            text: "x".to_string(),
            level: "info".to_string(),
        };
        let line = reader.raw_line("x".to_string());

        let (key, value) = reader.cursor_update(&line, Some(&entry)).unwrap();
        assert_eq!(key, "my_app_api-1");
        assert_eq!(value, 1_700_000_123);

        // Filtered lines never advance the since-cursor.
        assert!(reader.cursor_update(&line, None).is_none());
    }

    #[tokio::test]
    async fn test_connect_failure_is_transient() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(OffsetStore::open(dir.path()).unwrap());
        // Port 9 (discard) is not listening in the test environment.
        let mut reader = DockerStreamReader::new("app", "c".to_string(), "127.0.0.1", 9, store)
            .with_read_timeout(Duration::from_millis(200));

        match reader.begin_cycle().await {
            Err(ReaderError::Transient(_)) => {}
            other => panic!("expected transient error, got {:?}", other.map(|_| ())),
        }
    }
}
