//! Core capability errors (parsing and validation).
//!
//! These are bounded and stable: they represent domain/refusal states, not
//! library implementation details.

use thiserror::Error;

use crate::transience::Transience;

/// Invalid dotted-numeric version string.
#[derive(Debug, Error, Clone)]
#[error("version `{raw}` is invalid: {reason}")]
pub struct InvalidVersion {
    pub raw: String,
    pub reason: String,
}

/// Invalid version range expression.
#[derive(Debug, Error, Clone)]
#[error("version range `{raw}` is invalid: {reason}")]
pub struct InvalidRange {
    pub raw: String,
    pub reason: String,
}

/// Invalid node identity string.
#[derive(Debug, Error, Clone)]
#[error("node identity `{raw}` is invalid: {reason}")]
pub struct InvalidIdentity {
    pub raw: String,
    pub reason: String,
}

/// Canonical error enum for the core capability.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum CoreError {
    #[error(transparent)]
    InvalidVersion(#[from] InvalidVersion),
    #[error(transparent)]
    InvalidRange(#[from] InvalidRange),
    #[error(transparent)]
    InvalidIdentity(#[from] InvalidIdentity),
}

impl CoreError {
    pub fn transience(&self) -> Transience {
        // Core errors are pure input failures.
        Transience::Permanent
    }
}
