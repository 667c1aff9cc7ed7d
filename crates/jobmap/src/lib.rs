//! jobmap: fan a function out over a batch scheduler.
//!
//! A [`Workspace`] turns a list of inputs into a *map*: every input becomes a
//! component, identified by the content hash of its arguments. Inputs whose
//! output already exists are never resubmitted. The rest go to a
//! [`Scheduler`], whose append-only event log is folded into per-component
//! status by the [`MapHandle`].

#![forbid(unsafe_code)]

pub use jobmap_core as core;

mod assembler;
mod builder;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod eventlog;
mod handle;
mod iter;
pub mod paths;
mod persist;
mod registry;
pub mod scheduler;
mod state;
pub mod store;
pub mod tags;
pub mod telemetry;
mod wait;
pub mod worker;
mod workspace;

pub use assembler::{Assembly, ItemData, JobDescription, SubmissionAssembler};
pub use builder::MapBuilder;
pub use config::Config;
pub use error::Error;
pub use handle::{MapHandle, RerunOutcome};
pub use iter::{AvailableOutputs, OrderedOutputs};
pub use registry::MapRegistry;
pub use scheduler::{
    ActAck, ActSelector, JobAction, LocalScheduler, RunMode, Scheduler, SchedulerError,
};
pub use state::{ComponentStateMachine, OutputProbe, StateSnapshot};
pub use store::{BlobKind, ContentStore, PutOutcome, StoreError};
pub use worker::{ComponentContext, ComponentResult, FunctionRegistry, RunReport, Worker, WorkerError};
pub use workspace::Workspace;

pub use crate::core::{
    Args, ClusterId, ComponentErrorReport, ComponentHold, ComponentStatus, ContentHash,
    Effect, FunctionName, MapIdentity, MapOptions, OutputRecord, OutputStatus, ProcId,
    StatusCounts, Tag, Transience,
};

pub type Result<T> = std::result::Result<T, Error>;
