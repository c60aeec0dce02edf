//! Error types for the queue layer.
//!
//! - [`BrokerError`]: a single transport operation failed.
//! - [`QueueError`]: the client could not provide a usable channel.
//! - [`PublishError`]: a publish call failed (reported to callers as `false`).

use tasklane_core::CoreError;

/// Transport-level failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("broker connection error: {0}")]
    Connect(String),

    #[error("broker channel error: {0}")]
    Channel(String),

    #[error("failed to declare queue {queue}: {reason}")]
    Declare { queue: String, reason: String },

    /// Queue exists with incompatible arguments (AMQP 406).
    #[error("queue {queue} exists with different arguments: {reason}")]
    PreconditionFailed { queue: String, reason: String },

    #[error("queue not found: {0}")]
    QueueNotFound(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("consume failed: {0}")]
    Consume(String),

    #[error("acknowledgement failed: {0}")]
    Ack(String),

    #[error("channel is closed")]
    Closed,
}

impl BrokerError {
    pub fn connect(e: impl ToString) -> Self {
        Self::Connect(e.to_string())
    }

    pub fn channel(e: impl ToString) -> Self {
        Self::Channel(e.to_string())
    }

    pub fn declare(queue: impl Into<String>, e: impl ToString) -> Self {
        Self::Declare {
            queue: queue.into(),
            reason: e.to_string(),
        }
    }

    pub fn publish(e: impl ToString) -> Self {
        Self::Publish(e.to_string())
    }

    pub fn consume(e: impl ToString) -> Self {
        Self::Consume(e.to_string())
    }

    pub fn ack(e: impl ToString) -> Self {
        Self::Ack(e.to_string())
    }
}

/// Failure to obtain a ready channel from the [`crate::BrokerClient`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// A concurrent connection attempt failed while this caller waited on it.
    #[error("broker unavailable; reconnect scheduled")]
    Unavailable,

    #[error("broker client is closed")]
    Closed,
}

/// Publish-class failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] CoreError),

    #[error("no broker channel available: {0}")]
    Unavailable(#[source] QueueError),

    #[error("broker rejected the message: {0}")]
    Rejected(#[source] BrokerError),
}
