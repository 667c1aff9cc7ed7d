//! Core domain types for jobmap
//!
//! Module hierarchy follows type dependency order:
//! - effect: Transience, Effect (error classification)
//! - identity: ContentHash, ClusterId, ProcId, Tag, FunctionName, MapIdentity
//! - status: ComponentStatus, StatusCounts, ComponentHold
//! - args: Args and starmap argument zipping
//! - event: raw scheduler event records and their typed decoding
//! - output: OutputRecord and the structured component error report
//! - options: per-map submit options and their validation

#![forbid(unsafe_code)]

// Re-export enum_str! macro from jobmap-macros for internal use and downstream consumers
pub use jobmap_macros::enum_str;

pub mod args;
pub mod effect;
pub mod error;
pub mod event;
pub mod identity;
pub mod options;
pub mod output;
pub mod status;

pub use args::{Args, ZipArgs, zip_args_and_kwargs};
pub use effect::{Effect, Transience};
pub use error::{CoreError, InvalidId};
pub use event::{
    EventBody, EventDecodeError, EventKind, JobEvent, RawEvent, fields, format_runtime, parse_runtime,
};
pub use identity::{
    ClusterId, ContentHash, FunctionName, INVALID_TAG_CHARACTERS, MapIdentity, ProcId, Tag,
};
pub use options::{MapOptions, OptionsError, RESERVED_KEYS, ResolvedOptions};
pub use output::{
    ComponentErrorReport, NodeInfo, OutputPayload, OutputRecord, OutputStatus, RuntimeInfo,
};
pub use status::{ComponentHold, ComponentStatus, StatusCounts};
