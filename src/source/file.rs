use super::{RawLine, ReaderError, SourceReader};
use crate::entry::LogEntry;
use crate::offset::{source_key, OffsetStore};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const LOG_SUFFIXES: [&str; 2] = ["log", "txt"];

struct PendingFile {
    cursor_key: String,
    reader: BufReader<File>,
    offset: u64,
    // File length observed at open time; the cycle never reads past it.
    limit: u64,
}

/// Tails every `*.log` / `*.txt` file in a directory, resuming each file from
/// its independently stored byte offset.
///
/// Text is decoded as UTF-8 with lossy byte substitution, so one malformed
/// file never aborts the poll cycle for its siblings. Lines are consumed only
/// through the last newline; a trailing partial line waits for the next
/// cycle.
pub struct FileReader {
    label: String,
    folder: PathBuf,
    safe_app_name: String,
    store: Arc<OffsetStore>,
    poll_interval: Duration,
    pending: VecDeque<PendingFile>,
}

impl FileReader {
    pub fn new(
        app_name: &str,
        folder: PathBuf,
        store: Arc<OffsetStore>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            label: format!("file:{}", folder.display()),
            folder,
            safe_app_name: app_name.replace(' ', "_"),
            store,
            poll_interval,
            pending: VecDeque::new(),
        }
    }

    fn matching_files(&self) -> Vec<PathBuf> {
        let entries = match std::fs::read_dir(&self.folder) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(folder = %self.folder.display(), error = %e, "Log folder not readable");
                return Vec::new();
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .and_then(|ext| ext.to_str())
                        .is_some_and(|ext| LOG_SUFFIXES.contains(&ext))
            })
            .collect();
        paths.sort();
        paths
    }

    fn open_pending(&self, path: &PathBuf) -> Result<Option<PendingFile>, std::io::Error> {
        let file_name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => return Ok(None),
        };
        let cursor_key = source_key(&self.safe_app_name, &file_name);

        let file = File::open(path)?;
        let limit = file.metadata()?.len();

        let mut offset = self.store.read_or(&cursor_key, 0);
        if limit < offset {
            warn!(
                file = %path.display(),
                stored_offset = offset,
                size = limit,
                "File truncated, resetting cursor to zero"
            );
            offset = 0;
        }
        if offset >= limit {
            return Ok(None);
        }

        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(offset))?;

        Ok(Some(PendingFile {
            cursor_key,
            reader,
            offset,
            limit,
        }))
    }
}

#[async_trait]
impl SourceReader for FileReader {
    fn source_label(&self) -> &str {
        &self.label
    }

    async fn begin_cycle(&mut self) -> Result<(), ReaderError> {
        self.pending.clear();

        for path in self.matching_files() {
            match self.open_pending(&path) {
                Ok(Some(pending)) => self.pending.push_back(pending),
                Ok(None) => {}
                // One unreadable file must not abort the cycle for siblings.
                Err(e) => warn!(file = %path.display(), error = %e, "Skipping unreadable file"),
            }
        }
        Ok(())
    }

    async fn next_line(&mut self) -> Result<Option<RawLine>, ReaderError> {
        loop {
            let current = match self.pending.front_mut() {
                Some(current) => current,
                None => return Ok(None),
            };

            if current.offset >= current.limit {
                self.pending.pop_front();
                continue;
            }

            let mut buf = Vec::new();
            let bytes_read = match current.reader.read_until(b'\n', &mut buf) {
                Ok(n) => n,
                Err(e) => {
                    warn!(key = %current.cursor_key, error = %e, "Read failed, skipping rest of file");
                    self.pending.pop_front();
                    continue;
                }
            };

            // A chunk without a trailing newline is a partially written line;
            // leave it unconsumed so the next cycle re-reads it whole.
            if bytes_read == 0 || buf.last() != Some(&b'\n') {
                self.pending.pop_front();
                continue;
            }

            current.offset += bytes_read as u64;
            let text = String::from_utf8_lossy(&buf).into_owned();
            return Ok(Some(RawLine {
                text,
                cursor_key: current.cursor_key.clone(),
                position: current.offset,
            }));
        }
    }

    fn cursor_update(&self, line: &RawLine, _entry: Option<&LogEntry>) -> Option<(String, u64)> {
        // Byte offsets advance past filtered lines too.
        Some((line.cursor_key.clone(), line.position))
    }

    fn cycle_delay(&self, since_last_flush: Duration) -> Duration {
        self.poll_interval.saturating_sub(since_last_flush)
    }
}
