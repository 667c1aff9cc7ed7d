use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;
use crate::core::{
    ComponentErrorReport, ComponentHold, CoreError, Effect, InvalidId, OptionsError, Tag,
    Transience,
};
use crate::eventlog::EventLogError;
use crate::persist::PersistError;
use crate::scheduler::SchedulerError;
use crate::store::StoreError;

/// Crate-level error.
///
/// Component failures are data until a caller asks for that component's
/// value; only then do they surface as [`Error::ComponentError`].
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("cannot create a map with no components")]
    EmptyMap,

    #[error("map `{tag}` already exists; load it or remove it first")]
    MapAlreadyExists { tag: Tag },

    #[error("map `{tag}` not found")]
    MapNotFound { tag: Tag },

    #[error("map `{tag}` was removed; `{operation}` is no longer available")]
    MapWasRemoved { tag: Tag, operation: &'static str },

    #[error(transparent)]
    CorruptEventLog(#[from] EventLogError),

    #[error("timed out after {waited:?} waiting for {what}")]
    Timeout { what: String, waited: Duration },

    #[error("{what} not found")]
    NotFound { what: String },

    #[error("component {component} of map `{tag}` failed: {}", .report.exception_msg)]
    ComponentError {
        tag: Tag,
        component: usize,
        report: Box<ComponentErrorReport>,
    },

    #[error("component {component} of map `{tag}` is held: {hold}")]
    ComponentHeld {
        tag: Tag,
        component: usize,
        hold: ComponentHold,
    },

    #[error("cannot rerun components of map `{tag}`: {reason}")]
    CannotRerunComponents { tag: Tag, reason: String },

    #[error("cannot rename map `{tag}`: {reason}")]
    CannotRenameMap { tag: Tag, reason: String },

    #[error("component index {index} out of range for map with {len} components")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("output of component {component} does not have the requested shape: {source}")]
    OutputShape {
        component: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Options(#[from] OptionsError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("io error at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Missing { kind, hash } => Error::NotFound {
                what: format!("{} {hash}", kind.as_str()),
            },
            StoreError::Timeout { kind, hash, waited } => Error::Timeout {
                what: format!("{} {hash}", kind.as_str()),
                waited,
            },
            other => Error::Store(other),
        }
    }
}

impl From<InvalidId> for Error {
    fn from(err: InvalidId) -> Self {
        Error::Core(err.into())
    }
}

impl Error {
    pub(crate) fn io(path: impl Into<std::path::PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub fn transience(&self) -> Transience {
        match self {
            Error::Timeout { .. } | Error::NotFound { .. } => Transience::Retryable,
            Error::ComponentHeld { .. } => Transience::Retryable,
            Error::CorruptEventLog(_) => Transience::Permanent,
            Error::Scheduler(e) => e.transience(),
            Error::Store(_) | Error::Persist(_) | Error::Io { .. } => Transience::Unknown,
            Error::Core(e) => e.transience(),
            _ => Transience::Permanent,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            Error::Scheduler(e) => e.effect(),
            Error::Store(_) | Error::Persist(_) | Error::Io { .. } => Effect::Unknown,
            Error::Core(e) => e.effect(),
            _ => Effect::None,
        }
    }
}
