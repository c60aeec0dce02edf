//! Queue catalog and definitions.
//!
//! The catalog is fixed at compile time. Publishers and consumers address
//! queues through [`QueueName`], so a queue that was never provisioned cannot
//! be named.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::envelope::Priority;
use crate::error::CoreError;

/// A queue in the catalog.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueName {
    /// Priority-enabled queue for AI response generation.
    AiProcessing,
    EmailNotifications,
    DataExports,
    PlatformSync,
    AnalyticsProcessing,
    /// Holding queue for envelopes that can never be processed.
    DeadLetters,
}

impl QueueName {
    /// Queues that carry work for handlers.
    pub const WORK: [QueueName; 5] = [
        QueueName::AiProcessing,
        QueueName::EmailNotifications,
        QueueName::DataExports,
        QueueName::PlatformSync,
        QueueName::AnalyticsProcessing,
    ];

    /// Every queue the topology provisions.
    pub const ALL: [QueueName; 6] = [
        QueueName::AiProcessing,
        QueueName::EmailNotifications,
        QueueName::DataExports,
        QueueName::PlatformSync,
        QueueName::AnalyticsProcessing,
        QueueName::DeadLetters,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::AiProcessing => "ai-processing",
            QueueName::EmailNotifications => "email-notifications",
            QueueName::DataExports => "data-exports",
            QueueName::PlatformSync => "platform-sync",
            QueueName::AnalyticsProcessing => "analytics-processing",
            QueueName::DeadLetters => "dead-letters",
        }
    }

    /// Broker-side priority ceiling, if the queue is priority-enabled.
    pub fn max_priority(&self) -> Option<u8> {
        match self {
            QueueName::AiProcessing => Some(Priority::MAX.value()),
            _ => None,
        }
    }

    pub fn definition(&self) -> QueueDefinition {
        QueueDefinition {
            name: *self,
            durable: true,
            max_priority: self.max_priority(),
        }
    }
}

impl core::fmt::Display for QueueName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueueName::ALL
            .into_iter()
            .find(|q| q.as_str() == s)
            .ok_or_else(|| CoreError::unknown_queue(s))
    }
}

/// Declaration parameters for one queue.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueDefinition {
    pub name: QueueName,
    /// Survives broker restarts. Always `true` for catalog queues.
    pub durable: bool,
    /// Enables priority-aware delivery up to this value.
    pub max_priority: Option<u8>,
}

impl QueueDefinition {
    /// Definitions for every catalog queue.
    pub fn catalog() -> Vec<QueueDefinition> {
        QueueName::ALL.iter().map(QueueName::definition).collect()
    }
}
