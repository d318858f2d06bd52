pub mod supervisor;

pub use supervisor::MonitorSupervisor;

use crate::entry::LogEntry;
use crate::extract::Extractor;
use crate::offset::OffsetStore;
use crate::sink::{LogSink, SinkValue};
use crate::source::SourceReader;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_FLUSH_RETRY_LIMIT: u32 = 3;

/// In-memory batch of entries awaiting delivery, plus the high-water cursor
/// for every source key observed while filling it. Cursors are committed only
/// after the sink acknowledges the batch.
#[derive(Debug, Default)]
struct Batch {
    entries: Vec<LogEntry>,
    cursors: HashMap<String, u64>,
    flush_attempts: u32,
}

impl Batch {
    fn push(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    fn track(&mut self, key: String, position: u64) {
        let high_water = self.cursors.entry(key).or_insert(0);
        if position > *high_water {
            *high_water = position;
        }
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.cursors.clear();
        self.flush_attempts = 0;
    }
}

/// One long-lived control loop per configured source.
///
/// The loop is written against the `SourceReader` capability interface, never
/// a concrete variant: read cursors, pull lines, build entries, batch, flush
/// on the poll-interval trigger, persist cursors after a successful flush.
/// Reader failures become backoff-then-continue; only a stop signal
/// terminates the monitor.
pub struct Monitor {
    app_name: String,
    service_name: String,
    poll_interval: Duration,
    flush_retry_limit: u32,
    reader: Box<dyn SourceReader>,
    extractor: Arc<dyn Extractor>,
    store: Arc<OffsetStore>,
    sink: Arc<dyn LogSink>,
}

impl Monitor {
    pub fn new(
        app_name: String,
        service_name: String,
        poll_interval: Duration,
        reader: Box<dyn SourceReader>,
        extractor: Arc<dyn Extractor>,
        store: Arc<OffsetStore>,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            app_name,
            service_name,
            poll_interval,
            flush_retry_limit: DEFAULT_FLUSH_RETRY_LIMIT,
            reader,
            extractor,
            store,
            sink,
        }
    }

    pub fn with_flush_retry_limit(mut self, limit: u32) -> Self {
        self.flush_retry_limit = limit.max(1);
        self
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub async fn run(mut self, mut stop: watch::Receiver<bool>) {
        info!(
            app = %self.app_name,
            service = %self.service_name,
            source = %self.reader.source_label(),
            "Monitor started"
        );

        let mut batch = Batch::default();
        let mut last_flush = Instant::now();

        'outer: while !*stop.borrow() {
            let cycle_start = Instant::now();

            // A batch retained by a failed flush is redelivered before any
            // new reading; its cursors are still parked, so reading again
            // would append the same lines a second time.
            if batch.flush_attempts > 0 {
                self.flush(&mut batch).await;
                last_flush = Instant::now();
                if batch.flush_attempts > 0 {
                    if pause(self.poll_interval, &mut stop).await {
                        break;
                    }
                    continue;
                }
            }

            if let Err(e) = self.reader.begin_cycle().await {
                self.log_reader_error(&e);
                if pause(e.backoff(self.poll_interval), &mut stop).await {
                    break;
                }
                continue;
            }

            loop {
                // Safe point: stop is observed between lines, never mid-line.
                if *stop.borrow() {
                    break 'outer;
                }

                match self.reader.next_line().await {
                    Ok(Some(raw)) => {
                        let entry = LogEntry::from_line(&raw.text, self.extractor.as_ref());
                        if let Some((key, position)) =
                            self.reader.cursor_update(&raw, entry.as_ref())
                        {
                            batch.track(key, position);
                        }
                        if let Some(entry) = entry {
                            batch.push(entry);
                        }

                        // Time-based trigger keeps delivery latency bounded on
                        // long-lived streams.
                        if last_flush.elapsed() >= self.poll_interval && !batch.is_empty() {
                            self.flush(&mut batch).await;
                            last_flush = Instant::now();
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        self.log_reader_error(&e);
                        if !batch.is_empty() {
                            self.flush(&mut batch).await;
                            last_flush = Instant::now();
                        }
                        if pause(e.backoff(self.poll_interval), &mut stop).await {
                            break 'outer;
                        }
                        continue 'outer;
                    }
                }
            }

            if !batch.is_empty() {
                self.flush(&mut batch).await;
                last_flush = Instant::now();
            }

            let delay = self.reader.cycle_delay(cycle_start.elapsed());
            if pause(delay, &mut stop).await {
                break;
            }
        }

        info!(app = %self.app_name, service = %self.service_name, "Monitor stopped");
    }

    /// Deliver the batch; cursors advance only after the sink acknowledges
    /// and every cursor write commits. Otherwise the batch is retained for a
    /// bounded number of attempts and then dropped with a warning.
    async fn flush(&mut self, batch: &mut Batch) {
        let values: Vec<SinkValue> = batch
            .entries
            .iter()
            .cloned()
            .map(LogEntry::into_loki_value)
            .collect();

        let delivered = self
            .sink
            .send(
                &self.app_name,
                &self.service_name,
                values,
                self.reader.extra_labels(),
            )
            .await;

        if !delivered {
            self.note_flush_failure(batch, "sink delivery failed");
            return;
        }

        for (key, position) in &batch.cursors {
            if let Err(e) = self.store.write(key, *position) {
                error!(app = %self.app_name, key = %key, error = %e, "Cursor write failed");
                self.note_flush_failure(batch, "cursor write failed");
                return;
            }
        }

        debug!(
            app = %self.app_name,
            service = %self.service_name,
            entries = batch.len(),
            "Flushed batch"
        );
        batch.clear();
    }

    fn note_flush_failure(&self, batch: &mut Batch, reason: &str) {
        batch.flush_attempts += 1;
        if batch.flush_attempts >= self.flush_retry_limit {
            warn!(
                app = %self.app_name,
                service = %self.service_name,
                entries = batch.len(),
                attempts = batch.flush_attempts,
                reason = reason,
                "Dropping batch after repeated flush failures"
            );
            batch.clear();
        } else {
            warn!(
                app = %self.app_name,
                service = %self.service_name,
                entries = batch.len(),
                attempts = batch.flush_attempts,
                reason = reason,
                "Flush failed, batch retained"
            );
        }
    }

    fn log_reader_error(&self, e: &crate::source::ReaderError) {
        use crate::source::ReaderError;
        match e {
            ReaderError::Transient(_) => {
                debug!(app = %self.app_name, source = %self.reader.source_label(), error = %e, "Connection issue")
            }
            _ => {
                error!(app = %self.app_name, source = %self.reader.source_label(), error = %e, "Reader error")
            }
        }
    }
}

/// Sleep for `delay` unless the stop signal fires first. Returns true when
/// the monitor should shut down.
async fn pause(delay: Duration, stop: &mut watch::Receiver<bool>) -> bool {
    if delay.is_zero() {
        return *stop.borrow();
    }
    tokio::select! {
        _ = stop.changed() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_tracks_high_water_per_key() {
        let mut batch = Batch::default();
        batch.track("a".to_string(), 10);
        batch.track("a".to_string(), 7);
        batch.track("a".to_string(), 12);
        batch.track("b".to_string(), 3);

        assert_eq!(batch.cursors.get("a"), Some(&12));
        assert_eq!(batch.cursors.get("b"), Some(&3));
    }

    #[test]
    fn test_batch_clear_resets_attempts() {
        let mut batch = Batch::default();
        batch.push(LogEntry {
            timestamp_ns: 1,
            text: "x".to_string(),
            level: "info".to_string(),
        });
        batch.flush_attempts = 2;
        batch.clear();

        assert!(batch.is_empty());
        assert_eq!(batch.flush_attempts, 0);
        assert!(batch.cursors.is_empty());
    }

    #[tokio::test]
    async fn test_pause_interrupted_by_stop() {
        let (tx, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move { pause(Duration::from_secs(30), &mut rx).await });

        tx.send(true).unwrap();
        let stopped = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("pause must observe stop promptly")
            .unwrap();
        assert!(stopped);
    }

    #[tokio::test]
    async fn test_pause_elapses_without_stop() {
        let (_tx, mut rx) = watch::channel(false);
        assert!(!pause(Duration::from_millis(10), &mut rx).await);
    }
}
