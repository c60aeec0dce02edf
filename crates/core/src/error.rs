//! Core error model.

use thiserror::Error;

/// Result type used across the data model.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while building, encoding or decoding envelopes.
///
/// All variants are deterministic: retrying the same input yields the same
/// error. The dispatcher relies on this to treat decode failures as permanent.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// The message body is not a well-formed envelope.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The `taskType` tag does not name a known task type.
    #[error("unknown task type: {0}")]
    UnknownTaskType(String),

    /// The queue name is not part of the catalog.
    #[error("unknown queue: {0}")]
    UnknownQueue(String),

    /// Encoding the envelope failed.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl CoreError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedEnvelope(msg.into())
    }

    pub fn unknown_task_type(name: impl Into<String>) -> Self {
        Self::UnknownTaskType(name.into())
    }

    pub fn unknown_queue(name: impl Into<String>) -> Self {
        Self::UnknownQueue(name.into())
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }
}
