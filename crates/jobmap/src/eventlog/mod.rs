//! Incremental reader over a map's scheduler event log.
//!
//! The log is JSON lines appended by the scheduler. The reader keeps a byte
//! cursor; each call to [`EventLogReader::next_entry`] consumes one complete
//! line. A trailing line without its newline is left in place and retried on
//! the next call, so a reader racing the writer never observes half an event.

mod writer;

use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::core::{ClusterId, ContentHash, EventDecodeError, JobEvent, ProcId, RawEvent};

pub use writer::EventLogWriter;

#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("event log io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("corrupt event log {path} at offset {offset}: {reason}")]
    Corrupt {
        path: PathBuf,
        offset: u64,
        reason: Corruption,
    },
}

#[derive(Debug, Error)]
pub enum Corruption {
    #[error("log is {len} bytes, shorter than the saved cursor")]
    Truncated { len: u64 },
    #[error("malformed record: {0}")]
    Malformed(String),
    #[error(transparent)]
    InvalidEvent(#[from] EventDecodeError),
    #[error("event for job {cluster}.{proc} was not preceded by its SUBMIT")]
    UnknownJob { cluster: ClusterId, proc: ProcId },
    #[error("SUBMIT carries correlation key {hash} which belongs to no component")]
    UnknownCorrelationKey { hash: ContentHash },
}

/// One decoded event and where it sits in the log.
#[derive(Clone, Debug, PartialEq)]
pub struct LogEntry {
    pub offset: u64,
    pub event: JobEvent,
}

pub struct EventLogReader {
    path: PathBuf,
    offset: u64,
    reader: Option<BufReader<File>>,
}

impl EventLogReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::resume(path, 0)
    }

    /// Continue from a previously saved cursor.
    pub fn resume(path: impl Into<PathBuf>, offset: u64) -> Self {
        Self {
            path: path.into(),
            offset,
            reader: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Byte offset of the next unread record.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Move the cursor back to `offset`, e.g. to retry a record whose fold failed.
    pub fn rewind_to(&mut self, offset: u64) {
        self.offset = offset;
        self.reader = None;
    }

    pub fn corrupt(&self, offset: u64, reason: Corruption) -> EventLogError {
        EventLogError::Corrupt {
            path: self.path.clone(),
            offset,
            reason,
        }
    }

    fn io_err(&self, source: io::Error) -> EventLogError {
        EventLogError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn open(&mut self) -> Result<Option<&mut BufReader<File>>, EventLogError> {
        if self.reader.is_none() {
            let file = match File::open(&self.path) {
                Ok(file) => file,
                Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
                Err(err) => return Err(self.io_err(err)),
            };
            let len = file.metadata().map_err(|e| self.io_err(e))?.len();
            if len < self.offset {
                return Err(self.corrupt(self.offset, Corruption::Truncated { len }));
            }
            let mut reader = BufReader::new(file);
            reader
                .seek(SeekFrom::Start(self.offset))
                .map_err(|e| self.io_err(e))?;
            tracing::debug!(path = %self.path.display(), offset = self.offset, "opened event log");
            self.reader = Some(reader);
        }
        Ok(self.reader.as_mut())
    }

    /// Next complete event, or `Ok(None)` when caught up with the writer.
    pub fn next_entry(&mut self) -> Result<Option<LogEntry>, EventLogError> {
        let mut line = Vec::new();
        loop {
            let start = self.offset;
            line.clear();
            let read = {
                let Some(reader) = self.open()? else {
                    return Ok(None);
                };
                reader.read_until(b'\n', &mut line)
            };
            let read = read.map_err(|e| self.io_err(e))?;
            if read == 0 {
                return Ok(None);
            }
            if line.last() != Some(&b'\n') {
                // Partial record; the writer has not finished it yet.
                self.rewind_to(start);
                return Ok(None);
            }
            self.offset = start + read as u64;

            let body = line.trim_ascii();
            if body.is_empty() {
                continue;
            }
            let raw: RawEvent = serde_json::from_slice(body)
                .map_err(|err| self.corrupt(start, Corruption::Malformed(err.to_string())))?;
            let event = JobEvent::decode(&raw)
                .map_err(|err| self.corrupt(start, Corruption::InvalidEvent(err)))?;
            return Ok(Some(LogEntry {
                offset: start,
                event,
            }));
        }
    }
}

impl Iterator for EventLogReader {
    type Item = Result<LogEntry, EventLogError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EventBody, fields};
    use std::fs::OpenOptions;
    use std::io::Write;

    fn submit_line(cluster: u64, proc: u64, hash: &ContentHash) -> String {
        let raw = RawEvent::new("SUBMIT", ClusterId::new(cluster), ProcId::new(proc), 0)
            .with_field(fields::LOG_NOTES, hash.to_hex());
        format!("{}\n", serde_json::to_string(&raw).unwrap())
    }

    fn append(path: &Path, text: &str) {
        let mut file = OpenOptions::new().create(true).append(true).open(path).unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    #[test]
    fn missing_log_reads_as_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut reader = EventLogReader::new(dir.path().join("events.log"));
        assert!(reader.next_entry().unwrap().is_none());
        assert_eq!(reader.offset(), 0);
    }

    #[test]
    fn partial_trailing_record_is_not_consumed() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("events.log");
        let hash = ContentHash::digest(b"a");
        let full = submit_line(1, 0, &hash);
        let (head, tail) = full.split_at(full.len() / 2);

        append(&path, head);
        let mut reader = EventLogReader::new(&path);
        assert!(reader.next_entry().unwrap().is_none());
        assert_eq!(reader.offset(), 0);

        append(&path, tail);
        let entry = reader.next_entry().unwrap().unwrap();
        assert_eq!(entry.offset, 0);
        assert_eq!(
            entry.event.body,
            EventBody::Submit {
                correlation_key: hash
            }
        );
        assert_eq!(reader.offset(), full.len() as u64);
        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn resume_continues_from_cursor() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("events.log");
        let a = ContentHash::digest(b"a");
        let b = ContentHash::digest(b"b");
        append(&path, &submit_line(1, 0, &a));
        append(&path, "\n");
        append(&path, &submit_line(1, 1, &b));

        let mut first = EventLogReader::new(&path);
        first.next_entry().unwrap().unwrap();
        let mut resumed = EventLogReader::resume(&path, first.offset());
        let entry = resumed.next_entry().unwrap().unwrap();
        assert_eq!(entry.event.proc, ProcId::new(1));
        assert!(resumed.next_entry().unwrap().is_none());
    }

    #[test]
    fn malformed_line_is_corruption() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("events.log");
        append(&path, "{not json}\n");
        let err = EventLogReader::new(&path).next_entry().unwrap_err();
        assert!(matches!(
            err,
            EventLogError::Corrupt {
                offset: 0,
                reason: Corruption::Malformed(_),
                ..
            }
        ));
    }

    #[test]
    fn cursor_past_end_is_truncation() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("events.log");
        append(&path, &submit_line(1, 0, &ContentHash::digest(b"a")));
        let err = EventLogReader::resume(&path, 10_000).next_entry().unwrap_err();
        assert!(matches!(
            err,
            EventLogError::Corrupt {
                reason: Corruption::Truncated { .. },
                ..
            }
        ));
    }

    fn drain(reader: &mut EventLogReader) -> usize {
        let mut n = 0;
        while reader.next_entry().unwrap().is_some() {
            n += 1;
        }
        n
    }

    proptest::proptest! {
        #![proptest_config(proptest::prelude::ProptestConfig::with_cases(32))]

        #[test]
        fn only_complete_lines_are_consumed(count in 1usize..6, cut_seed in 0usize..10_000) {
            let dir = tempfile::TempDir::new().unwrap();
            let path = dir.path().join("events.log");
            let text: String = (0..count)
                .map(|i| submit_line(1, i as u64, &ContentHash::digest(&[i as u8])))
                .collect();
            let cut = cut_seed % (text.len() + 1);
            let (head, tail) = text.split_at(cut);

            append(&path, head);
            let mut reader = EventLogReader::new(&path);
            let seen = drain(&mut reader);
            let complete = head.matches('\n').count();
            proptest::prop_assert_eq!(seen, complete);
            let boundary = head.rfind('\n').map_or(0, |pos| pos + 1);
            proptest::prop_assert_eq!(reader.offset(), boundary as u64);

            append(&path, tail);
            proptest::prop_assert_eq!(seen + drain(&mut reader), count);
            proptest::prop_assert_eq!(reader.offset(), text.len() as u64);
        }
    }
}
