//! Core capability errors (parsing and validation).
//!
//! These are bounded and stable: core errors represent refusal states on
//! caller-supplied identifiers, not library implementation details.

use thiserror::Error;

use crate::effect::{Effect, Transience};
use crate::options::OptionsError;

/// Invalid ID or content identifier.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidId {
    #[error("content hash `{raw}` is invalid: {reason}")]
    ContentHash { raw: String, reason: String },
    #[error("map tag `{raw}` is invalid: {reason}")]
    Tag { raw: String, reason: String },
    #[error("function name `{raw}` is invalid: {reason}")]
    Function { raw: String, reason: String },
}

/// Canonical error enum for core capability.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum CoreError {
    #[error(transparent)]
    InvalidId(#[from] InvalidId),
    #[error(transparent)]
    Options(#[from] OptionsError),
}

impl CoreError {
    pub fn transience(&self) -> Transience {
        // Core errors are pure input failures.
        Transience::Permanent
    }

    pub fn effect(&self) -> Effect {
        Effect::None
    }
}
