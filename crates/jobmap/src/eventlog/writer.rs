use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::core::{JobEvent, RawEvent};

/// Appends events to a log, one JSON object per line.
///
/// Each record is written with a single `write_all` on an append-mode file,
/// so concurrent readers see either nothing or a prefix of the line.
pub struct EventLogWriter {
    path: PathBuf,
    file: Mutex<File>,
}

impl EventLogWriter {
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, event: &JobEvent) -> io::Result<()> {
        self.append_raw(&event.to_raw())
    }

    pub fn append_raw(&self, raw: &RawEvent) -> io::Result<()> {
        let mut line = serde_json::to_vec(raw).map_err(io::Error::other)?;
        line.push(b'\n');
        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::other("event log writer lock poisoned"))?;
        file.write_all(&line)?;
        file.flush()
    }
}
