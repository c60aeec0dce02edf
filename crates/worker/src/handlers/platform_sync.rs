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
pub struct SyncPlatformDataPayload {
    pub platform: String,
    pub integration_id: String,
    /// Only fetch changes after this epoch-ms watermark.
    #[serde(default)]
    pub since: Option<i64>,
}

/// Pulls data from a connected third-party platform.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncPlatformData;

#[async_trait]
impl TaskHandler for SyncPlatformData {
    fn task_type(&self) -> TaskType {
        TaskType::SyncPlatformData
    }

    async fn handle(
        &self,
        payload: &JsonValue,
        metadata: &Metadata,
        cancel: CancellationToken,
    ) -> Result<(), TaskError> {
        let payload: SyncPlatformDataPayload = decode(payload)?;
        require("platform", &payload.platform)?;
        require("integrationId", &payload.integration_id)?;
        check_cancelled(&cancel)?;

        info!(
            request_id = %metadata.request_id(),
            platform = %payload.platform,
            integration_id = %payload.integration_id,
            since = ?payload.since,
            "platform data synced"
        );
        Ok(())
    }
}
