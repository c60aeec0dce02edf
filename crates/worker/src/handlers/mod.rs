//! Task handlers, one per task type.
//!
//! These are thin: they validate the payload into a typed struct, honor
//! cancellation, and log what they would do. Domain work (LLM calls, SMTP,
//! storage, platform APIs) plugs in behind the same signature.

mod ai_response;
mod analytics;
mod email;
mod export;
mod platform_sync;

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;

use crate::registry::{HandlerRegistry, TaskError};

pub use ai_response::{GenerateAiResponse, GenerateAiResponsePayload};
pub use analytics::{GenerateAnalytics, GenerateAnalyticsPayload};
pub use email::{SendEmail, SendEmailPayload};
pub use export::{ExportConversationData, ExportConversationDataPayload, ExportFormat};
pub use platform_sync::{SyncPlatformData, SyncPlatformDataPayload};

pub(crate) fn standard_registry() -> HandlerRegistry {
    HandlerRegistry::new()
        .with(GenerateAiResponse)
        .with(SendEmail)
        .with(ExportConversationData)
        .with(SyncPlatformData)
        .with(GenerateAnalytics)
}

/// Decode a payload; a shape mismatch can never succeed on retry.
pub(crate) fn decode<T: DeserializeOwned>(payload: &JsonValue) -> Result<T, TaskError> {
    serde_json::from_value(payload.clone())
        .map_err(|e| TaskError::permanent(format!("invalid payload: {e}")))
}

pub(crate) fn check_cancelled(cancel: &CancellationToken) -> Result<(), TaskError> {
    if cancel.is_cancelled() {
        return Err(TaskError::Cancelled);
    }
    Ok(())
}

pub(crate) fn require(field: &str, value: &str) -> Result<(), TaskError> {
    if value.trim().is_empty() {
        return Err(TaskError::permanent(format!("{field} must not be empty")));
    }
    Ok(())
}
