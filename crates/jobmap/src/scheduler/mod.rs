//! The external batch scheduler, seen through the two calls the engine needs.
//!
//! A scheduler accepts a job description plus the correlation keys to queue,
//! runs one process per key, and appends lifecycle events for every process
//! to the job's event log. [`LocalScheduler`] is the in-process
//! implementation.

mod local;

use std::path::PathBuf;

use thiserror::Error;

use crate::assembler::JobDescription;
use crate::core::{ClusterId, ContentHash, Effect, Transience};

pub use local::{LocalScheduler, RunMode};

pub trait Scheduler: Send + Sync {
    /// Queue one process per key in `keys`; returns the new cluster id.
    fn submit(&self, job: &JobDescription, keys: &[ContentHash]) -> Result<ClusterId, SchedulerError>;

    /// Apply `action` to the processes of `clusters` matching `selector`.
    fn act(
        &self,
        clusters: &[ClusterId],
        action: JobAction,
        selector: &ActSelector,
    ) -> Result<ActAck, SchedulerError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobAction {
    Hold,
    Release,
    Suspend,
    Continue,
    Vacate,
    Remove,
}

crate::core::enum_str! {
    impl JobAction {
        pub fn as_str(&self) -> &'static str;
        pub fn parse_str(raw: &str) -> Option<Self>;
        variants {
            Hold => ["hold"],
            Release => ["release"],
            Suspend => ["suspend", "pause"],
            Continue => ["continue", "resume"],
            Vacate => ["vacate"],
            Remove => ["remove"],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActSelector {
    All,
    /// Only processes whose correlation key is listed.
    Keys(Vec<ContentHash>),
}

impl ActSelector {
    pub fn matches(&self, key: &ContentHash) -> bool {
        match self {
            ActSelector::All => true,
            ActSelector::Keys(keys) => keys.contains(key),
        }
    }
}

/// How many processes an action reached and how many it changed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ActAck {
    pub matched: usize,
    pub affected: usize,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SchedulerError {
    #[error("scheduler rejected the submission: {reason}")]
    Rejected { reason: String },
    #[error("scheduler does not know cluster {cluster}")]
    UnknownCluster { cluster: ClusterId },
    #[error("scheduler io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("scheduler unavailable: {reason}")]
    Unavailable { reason: String },
}

impl SchedulerError {
    pub fn transience(&self) -> Transience {
        match self {
            SchedulerError::Rejected { .. } | SchedulerError::UnknownCluster { .. } => {
                Transience::Permanent
            }
            SchedulerError::Unavailable { .. } => Transience::Retryable,
            SchedulerError::Io { .. } => Transience::Unknown,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            SchedulerError::Rejected { .. }
            | SchedulerError::UnknownCluster { .. }
            | SchedulerError::Unavailable { .. } => Effect::None,
            SchedulerError::Io { .. } => Effect::Unknown,
        }
    }
}
