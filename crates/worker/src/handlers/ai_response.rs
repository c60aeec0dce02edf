use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;
use tracing::info;

use tasklane_core::{Metadata, TaskType};

use super::{check_cancelled, decode, require};
use crate::registry::{TaskError, TaskHandler};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateAiResponsePayload {
    pub conversation_id: String,
    pub message_id: String,
    #[serde(default)]
    pub model: Option<String>,
}

/// Generates an assistant reply for a conversation message.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerateAiResponse;

#[async_trait]
impl TaskHandler for GenerateAiResponse {
    fn task_type(&self) -> TaskType {
        TaskType::GenerateAiResponse
    }

    async fn handle(
        &self,
        payload: &JsonValue,
        metadata: &Metadata,
        cancel: CancellationToken,
    ) -> Result<(), TaskError> {
        let payload: GenerateAiResponsePayload = decode(payload)?;
        require("conversationId", &payload.conversation_id)?;
        require("messageId", &payload.message_id)?;
        check_cancelled(&cancel)?;

        info!(
            request_id = %metadata.request_id(),
            conversation_id = %payload.conversation_id,
            message_id = %payload.message_id,
            model = payload.model.as_deref().unwrap_or("default"),
            "ai response generated"
        );
        Ok(())
    }
}
