//! Parse/validation errors for core primitives.

use thiserror::Error;

/// Result type used for core conversions.
pub type CoreResult<T> = Result<T, CoreError>;

/// Core-level error.
///
/// Keep this focused on deterministic input failures. Runtime queue failures
/// belong to the infra layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// The job type is not one of the supported channels.
    #[error("unsupported job type: {0}")]
    UnsupportedJobType(String),

    /// The priority name is not one of the four tiers.
    #[error("unknown priority: {0}")]
    UnknownPriority(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl CoreError {
    pub fn unsupported_job_type(name: impl Into<String>) -> Self {
        Self::UnsupportedJobType(name.into())
    }

    pub fn unknown_priority(name: impl Into<String>) -> Self {
        Self::UnknownPriority(name.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
