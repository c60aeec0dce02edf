//! Task type catalog.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::queue::QueueName;

/// Tag selecting the handler for an envelope.
///
/// The set is closed: every variant has exactly one handler in the worker's
/// registry, and the wire name is the kebab-case form of the variant.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    GenerateAiResponse,
    SendEmail,
    ExportConversationData,
    SyncPlatformData,
    GenerateAnalytics,
}

impl TaskType {
    /// Every task type, in catalog order.
    pub const ALL: [TaskType; 5] = [
        TaskType::GenerateAiResponse,
        TaskType::SendEmail,
        TaskType::ExportConversationData,
        TaskType::SyncPlatformData,
        TaskType::GenerateAnalytics,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::GenerateAiResponse => "generate-ai-response",
            TaskType::SendEmail => "send-email",
            TaskType::ExportConversationData => "export-conversation-data",
            TaskType::SyncPlatformData => "sync-platform-data",
            TaskType::GenerateAnalytics => "generate-analytics",
        }
    }

    /// Queue this task type is normally published to.
    pub fn default_queue(&self) -> QueueName {
        match self {
            TaskType::GenerateAiResponse => QueueName::AiProcessing,
            TaskType::SendEmail => QueueName::EmailNotifications,
            TaskType::ExportConversationData => QueueName::DataExports,
            TaskType::SyncPlatformData => QueueName::PlatformSync,
            TaskType::GenerateAnalytics => QueueName::AnalyticsProcessing,
        }
    }
}

impl core::fmt::Display for TaskType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CoreError::unknown_task_type(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_match_serde_representation() {
        for task in TaskType::ALL {
            let json = serde_json::to_string(&task).unwrap();
            assert_eq!(json, format!("\"{}\"", task.as_str()));
            assert_eq!(task.as_str().parse::<TaskType>().unwrap(), task);
        }
    }

    #[test]
    fn unknown_names_are_rejected() {
        let err = "send-fax".parse::<TaskType>().unwrap_err();
        assert_eq!(err, CoreError::UnknownTaskType("send-fax".to_string()));
    }

    #[test]
    fn each_task_type_has_a_distinct_home_queue() {
        let mut queues: Vec<_> = TaskType::ALL.iter().map(|t| t.default_queue()).collect();
        queues.sort();
        queues.dedup();
        assert_eq!(queues.len(), TaskType::ALL.len());
        assert!(!queues.contains(&QueueName::DeadLetters));
    }
}
