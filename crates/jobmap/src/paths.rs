//! On-disk layout of a jobmap root directory.
//!
//! ```text
//! <root>/config.toml
//! <root>/store/inputs/<hash>.in
//! <root>/store/outputs/<hash>.out
//! <root>/maps/<tag>/{identity.json,job.json,events.log,map_state.json}
//! <root>/maps/<tag>/job_logs/<hash>.{stdout,stderr}
//! <root>/scratch/<hash>/
//! <root>/logs/
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::core::{ContentHash, Tag};

pub const ROOT_ENV: &str = "JOBMAP_DIR";

pub const IDENTITY_FILE: &str = "identity.json";
pub const JOB_FILE: &str = "job.json";
pub const EVENT_LOG_FILE: &str = "events.log";
pub const STATE_FILE: &str = "map_state.json";
pub const JOB_LOGS_DIR: &str = "job_logs";

/// Default root when neither config nor environment names one.
///
/// `$XDG_DATA_HOME/jobmap`, falling back to `~/.local/share/jobmap`.
pub fn default_root() -> PathBuf {
    if let Ok(dir) = std::env::var(ROOT_ENV)
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }

    dirs::data_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local").join("share")))
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("jobmap")
}

#[derive(Clone, Debug)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn inputs_dir(&self) -> PathBuf {
        self.root.join("store").join("inputs")
    }

    pub fn outputs_dir(&self) -> PathBuf {
        self.root.join("store").join("outputs")
    }

    pub fn maps_dir(&self) -> PathBuf {
        self.root.join("maps")
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.root.join("scratch")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn map_dir(&self, tag: &Tag) -> PathBuf {
        self.maps_dir().join(tag.as_str())
    }

    pub fn identity_path(&self, tag: &Tag) -> PathBuf {
        self.map_dir(tag).join(IDENTITY_FILE)
    }

    pub fn job_path(&self, tag: &Tag) -> PathBuf {
        self.map_dir(tag).join(JOB_FILE)
    }

    pub fn event_log_path(&self, tag: &Tag) -> PathBuf {
        self.map_dir(tag).join(EVENT_LOG_FILE)
    }

    pub fn state_path(&self, tag: &Tag) -> PathBuf {
        self.map_dir(tag).join(STATE_FILE)
    }

    pub fn job_logs_dir(&self, tag: &Tag) -> PathBuf {
        self.map_dir(tag).join(JOB_LOGS_DIR)
    }

    /// Create the directories every workspace needs.
    pub fn ensure(&self) -> io::Result<()> {
        for dir in [
            self.inputs_dir(),
            self.outputs_dir(),
            self.maps_dir(),
            self.scratch_dir(),
        ] {
            fs::create_dir_all(&dir)?;
        }
        Ok(())
    }
}

/// Sandbox a worker runs one hash in.
pub fn sandbox_dir(scratch_dir: &Path, hash: &ContentHash) -> PathBuf {
    scratch_dir.join(hash.to_hex())
}

/// Where a checkpoint waits between runs of the same hash.
pub fn transfer_dir(scratch_dir: &Path, hash: &ContentHash) -> PathBuf {
    scratch_dir.join(format!("{hash}.transfer"))
}

pub fn stdout_path(job_logs_dir: &Path, hash: &ContentHash) -> PathBuf {
    job_logs_dir.join(format!("{hash}.stdout"))
}

pub fn stderr_path(job_logs_dir: &Path, hash: &ContentHash) -> PathBuf {
    job_logs_dir.join(format!("{hash}.stderr"))
}
