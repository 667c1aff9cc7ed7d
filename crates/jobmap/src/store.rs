//! Content-addressed blob store for component inputs and outputs.
//!
//! Blobs are named after the [`ContentHash`] of the input they belong to.
//! Writes go through a temp file and a no-clobber rename, so a blob is either
//! absent or complete, and the first writer of a hash wins.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::core::{Args, ContentHash, FunctionName, OutputRecord, OutputStatus};
use crate::paths::Layout;
use crate::wait::{PollError, poll_until};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlobKind {
    Input,
    Output,
}

crate::core::enum_str! {
    impl BlobKind {
        pub fn as_str(&self) -> &'static str;
        fn parse_str(raw: &str) -> Option<Self>;
        variants {
            Input => ["input"],
            Output => ["output"],
        }
    }
}

impl BlobKind {
    fn extension(self) -> &'static str {
        match self {
            BlobKind::Input => "in",
            BlobKind::Output => "out",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PutOutcome {
    Written,
    AlreadyPresent,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{} {hash} not found", .kind.as_str())]
    Missing { kind: BlobKind, hash: ContentHash },
    #[error("timed out after {waited:?} waiting for {} {hash}", .kind.as_str())]
    Timeout {
        kind: BlobKind,
        hash: ContentHash,
        waited: Duration,
    },
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode {}: {source}", .kind.as_str())]
    Encode {
        kind: BlobKind,
        #[source]
        source: serde_json::Error,
    },
    #[error("{} blob at {path} is corrupt: {source}", .kind.as_str())]
    Corrupt {
        kind: BlobKind,
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Clone, Debug)]
pub struct ContentStore {
    inputs_dir: PathBuf,
    outputs_dir: PathBuf,
    poll_interval: Duration,
}

impl ContentStore {
    pub fn new(layout: &Layout, poll_interval: Duration) -> Self {
        Self {
            inputs_dir: layout.inputs_dir(),
            outputs_dir: layout.outputs_dir(),
            poll_interval,
        }
    }

    pub fn dir(&self, kind: BlobKind) -> &Path {
        match kind {
            BlobKind::Input => &self.inputs_dir,
            BlobKind::Output => &self.outputs_dir,
        }
    }

    pub fn path(&self, kind: BlobKind, hash: &ContentHash) -> PathBuf {
        self.dir(kind).join(format!("{hash}.{}", kind.extension()))
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Write-once put. A second put of the same hash leaves the first blob.
    pub fn put(
        &self,
        kind: BlobKind,
        hash: &ContentHash,
        payload: &[u8],
    ) -> Result<PutOutcome, StoreError> {
        let path = self.path(kind, hash);
        if path.exists() {
            return Ok(PutOutcome::AlreadyPresent);
        }
        let temp = self.staged(kind, payload)?;
        match temp.persist_noclobber(&path) {
            Ok(_) => {
                tracing::trace!(kind = kind.as_str(), %hash, "blob written");
                Ok(PutOutcome::Written)
            }
            Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => {
                Ok(PutOutcome::AlreadyPresent)
            }
            Err(err) => Err(StoreError::Io {
                path,
                source: err.error,
            }),
        }
    }

    /// Atomically replace whatever is stored under `hash`.
    pub fn replace(
        &self,
        kind: BlobKind,
        hash: &ContentHash,
        payload: &[u8],
    ) -> Result<(), StoreError> {
        let path = self.path(kind, hash);
        let temp = self.staged(kind, payload)?;
        temp.persist(&path).map_err(|err| StoreError::Io {
            path,
            source: err.error,
        })?;
        tracing::trace!(kind = kind.as_str(), %hash, "blob replaced");
        Ok(())
    }

    /// A synced temp file holding `payload`, next to the blobs of `kind`.
    fn staged(&self, kind: BlobKind, payload: &[u8]) -> Result<tempfile::NamedTempFile, StoreError> {
        let dir = self.dir(kind);
        let io_err = |source: io::Error| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        };
        fs::create_dir_all(dir).map_err(io_err)?;
        let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        let file = temp.as_file_mut();
        file.write_all(payload).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        Ok(temp)
    }

    pub fn exists(&self, kind: BlobKind, hash: &ContentHash) -> bool {
        self.path(kind, hash).is_file()
    }

    pub fn get(&self, kind: BlobKind, hash: &ContentHash) -> Result<Vec<u8>, StoreError> {
        let path = self.path(kind, hash);
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(StoreError::Missing {
                kind,
                hash: *hash,
            }),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    /// Wait for a blob to appear.
    ///
    /// `Some(Duration::ZERO)` checks once and reports `Missing`; any other
    /// expired deadline reports `Timeout`. `None` waits forever.
    pub fn get_blocking(
        &self,
        kind: BlobKind,
        hash: &ContentHash,
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>, StoreError> {
        let result = poll_until(timeout, self.poll_interval, || {
            match self.get(kind, hash) {
                Ok(bytes) => Ok(Some(bytes)),
                Err(StoreError::Missing { .. }) => Ok(None),
                Err(err) => Err(err),
            }
        });
        result.map_err(|err| match err {
            PollError::Probe(err) => err,
            PollError::Missing => StoreError::Missing { kind, hash: *hash },
            PollError::Timeout { waited } => StoreError::Timeout {
                kind,
                hash: *hash,
                waited,
            },
        })
    }

    /// Returns whether a blob was actually removed.
    pub fn delete(&self, kind: BlobKind, hash: &ContentHash) -> Result<bool, StoreError> {
        let path = self.path(kind, hash);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    /// Every hash stored under `kind`; unparseable file names are skipped.
    pub fn list(&self, kind: BlobKind) -> Result<Vec<ContentHash>, StoreError> {
        let dir = self.dir(kind);
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: dir.to_path_buf(),
                    source,
                });
            }
        };
        let mut hashes = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(kind.extension()) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str())
                && let Ok(hash) = ContentHash::from_hex(stem)
            {
                hashes.push(hash);
            }
        }
        hashes.sort();
        Ok(hashes)
    }

    /// Store the arguments of one call of `function`.
    pub fn put_input(
        &self,
        function: &FunctionName,
        args: &Args,
    ) -> Result<(ContentHash, PutOutcome), StoreError> {
        let (hash, bytes) = args.encode(function).map_err(|source| StoreError::Encode {
            kind: BlobKind::Input,
            source,
        })?;
        let outcome = self.put(BlobKind::Input, &hash, &bytes)?;
        Ok((hash, outcome))
    }

    pub fn read_input(&self, hash: &ContentHash) -> Result<Args, StoreError> {
        let bytes = self.get(BlobKind::Input, hash)?;
        Args::from_canonical_bytes(&bytes).map_err(|source| StoreError::Corrupt {
            kind: BlobKind::Input,
            path: self.path(BlobKind::Input, hash),
            source,
        })
    }

    /// Record a component's output.
    ///
    /// An OK output is final and is never overwritten. An ERROR output (or
    /// an unreadable one) is replaced in one rename, so maps sharing the
    /// hash see either the old record or the new one.
    pub fn write_output(&self, record: &OutputRecord) -> Result<PutOutcome, StoreError> {
        let bytes = serde_json::to_vec(record).map_err(|source| StoreError::Encode {
            kind: BlobKind::Output,
            source,
        })?;
        match self.output_status(&record.hash) {
            Ok(Some(OutputStatus::Ok)) => Ok(PutOutcome::AlreadyPresent),
            Ok(None) => self.put(BlobKind::Output, &record.hash, &bytes),
            Ok(Some(OutputStatus::Error)) | Err(StoreError::Corrupt { .. }) => {
                self.replace(BlobKind::Output, &record.hash, &bytes)?;
                Ok(PutOutcome::Written)
            }
            Err(err) => Err(err),
        }
    }

    pub fn read_output(&self, hash: &ContentHash) -> Result<OutputRecord, StoreError> {
        let bytes = self.get(BlobKind::Output, hash)?;
        self.decode_output(hash, &bytes)
    }

    pub fn read_output_blocking(
        &self,
        hash: &ContentHash,
        timeout: Option<Duration>,
    ) -> Result<OutputRecord, StoreError> {
        let bytes = self.get_blocking(BlobKind::Output, hash, timeout)?;
        self.decode_output(hash, &bytes)
    }

    /// Status of the stored output, if any.
    pub fn output_status(&self, hash: &ContentHash) -> Result<Option<OutputStatus>, StoreError> {
        match self.read_output(hash) {
            Ok(record) => Ok(Some(record.status())),
            Err(StoreError::Missing { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn decode_output(&self, hash: &ContentHash, bytes: &[u8]) -> Result<OutputRecord, StoreError> {
        serde_json::from_slice(bytes).map_err(|source| StoreError::Corrupt {
            kind: BlobKind::Output,
            path: self.path(BlobKind::Output, hash),
            source,
        })
    }
}
