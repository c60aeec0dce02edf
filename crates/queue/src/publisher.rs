//! Task publication.

use serde_json::Value as JsonValue;
use tracing::{debug, error, warn};

use tasklane_core::{MetadataOverrides, Priority, QueueMessage, QueueName, RequestId, TaskType};

use crate::client::BrokerClient;
use crate::error::PublishError;
use crate::transport::{BrokerChannel, MessageProperties, Transport};

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Outcome of a successful publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub queue: QueueName,
    pub request_id: RequestId,
}

/// Builds envelopes and sends them through the shared [`BrokerClient`].
///
/// No retries: a failed publish is logged and reported to the caller, which
/// decides whether to try again.
pub struct Publisher<T: Transport> {
    client: BrokerClient<T>,
}

impl<T: Transport> Clone for Publisher<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
        }
    }
}

impl<T: Transport> Publisher<T> {
    pub fn new(client: BrokerClient<T>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &BrokerClient<T> {
        &self.client
    }

    /// Publish a task; `false` on any failure (already logged).
    pub async fn publish(
        &self,
        queue: QueueName,
        task_type: TaskType,
        payload: JsonValue,
        overrides: MetadataOverrides,
        priority: Priority,
    ) -> bool {
        self.try_publish(queue, task_type, payload, overrides, priority)
            .await
            .is_ok()
    }

    /// Publish to the task type's home queue.
    pub async fn publish_to_default_queue(
        &self,
        task_type: TaskType,
        payload: JsonValue,
        overrides: MetadataOverrides,
        priority: Priority,
    ) -> bool {
        self.publish(task_type.default_queue(), task_type, payload, overrides, priority)
            .await
    }

    pub async fn try_publish(
        &self,
        queue: QueueName,
        task_type: TaskType,
        payload: JsonValue,
        overrides: MetadataOverrides,
        priority: Priority,
    ) -> Result<PublishReceipt, PublishError> {
        let result = self
            .send(queue, task_type, payload, overrides, priority)
            .await;

        if let Err(e) = &result {
            error!(
                queue = %queue,
                task_type = %task_type,
                error = %e,
                "failed to publish task"
            );
        }
        result
    }

    async fn send(
        &self,
        queue: QueueName,
        task_type: TaskType,
        payload: JsonValue,
        overrides: MetadataOverrides,
        priority: Priority,
    ) -> Result<PublishReceipt, PublishError> {
        let channel = self
            .client
            .channel()
            .await
            .map_err(PublishError::Unavailable)?;

        if !priority.is_in_range() {
            warn!(
                queue = %queue,
                priority = priority.value(),
                "priority outside 0-10; broker may clamp it"
            );
        }

        let message = QueueMessage::new(task_type, payload, overrides, priority);
        let body = message.to_bytes()?;
        let request_id = message.request_id().clone();

        let properties = MessageProperties::persistent()
            .with_priority(priority.value())
            .with_content_type(JSON_CONTENT_TYPE)
            .with_message_id(request_id.as_str());

        channel
            .publish(queue, body, properties)
            .await
            .map_err(PublishError::Rejected)?;

        debug!(
            queue = %queue,
            task_type = %task_type,
            request_id = %request_id,
            priority = priority.value(),
            "task published"
        );
        Ok(PublishReceipt { queue, request_id })
    }
}
