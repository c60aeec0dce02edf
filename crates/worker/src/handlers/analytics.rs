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
pub struct GenerateAnalyticsPayload {
    pub report_type: String,
    /// Epoch-ms window; both ends optional.
    #[serde(default)]
    pub from: Option<i64>,
    #[serde(default)]
    pub to: Option<i64>,
}

impl GenerateAnalyticsPayload {
    fn validate(&self) -> Result<(), TaskError> {
        require("reportType", &self.report_type)?;
        if let (Some(from), Some(to)) = (self.from, self.to) {
            if from > to {
                return Err(TaskError::permanent(format!("empty window: from {from} > to {to}")));
            }
        }
        Ok(())
    }
}

/// Builds an analytics report for an organization.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerateAnalytics;

#[async_trait]
impl TaskHandler for GenerateAnalytics {
    fn task_type(&self) -> TaskType {
        TaskType::GenerateAnalytics
    }

    async fn handle(
        &self,
        payload: &JsonValue,
        metadata: &Metadata,
        cancel: CancellationToken,
    ) -> Result<(), TaskError> {
        let payload: GenerateAnalyticsPayload = decode(payload)?;
        payload.validate()?;
        check_cancelled(&cancel)?;

        info!(
            request_id = %metadata.request_id(),
            organization_id = %metadata.organization_id(),
            report_type = %payload.report_type,
            "analytics report generated"
        );
        Ok(())
    }
}
