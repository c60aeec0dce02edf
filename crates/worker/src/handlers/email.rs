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
pub struct SendEmailPayload {
    pub to: String,
    pub subject: String,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

impl SendEmailPayload {
    fn validate(&self) -> Result<(), TaskError> {
        require("to", &self.to)?;
        require("subject", &self.subject)?;
        if !self.to.contains('@') {
            return Err(TaskError::permanent(format!("invalid recipient {:?}", self.to)));
        }
        if self.template.is_none() && self.body.is_none() {
            return Err(TaskError::permanent("either template or body is required"));
        }
        Ok(())
    }
}

/// Sends a transactional email.
#[derive(Debug, Clone, Copy, Default)]
pub struct SendEmail;

#[async_trait]
impl TaskHandler for SendEmail {
    fn task_type(&self) -> TaskType {
        TaskType::SendEmail
    }

    async fn handle(
        &self,
        payload: &JsonValue,
        metadata: &Metadata,
        cancel: CancellationToken,
    ) -> Result<(), TaskError> {
        let payload: SendEmailPayload = decode(payload)?;
        payload.validate()?;
        check_cancelled(&cancel)?;

        info!(
            request_id = %metadata.request_id(),
            template = payload.template.as_deref().unwrap_or("inline"),
            "email sent"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tasklane_core::MetadataOverrides;

    fn meta() -> Metadata {
        Metadata::stamp(MetadataOverrides::new().organization("org-1"))
    }

    #[tokio::test]
    async fn valid_email_succeeds() {
        let payload = json!({"to": "a@example.com", "subject": "Hi", "template": "welcome"});
        SendEmail
            .handle(&payload, &meta(), CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn bad_recipient_or_missing_content_is_permanent() {
        for payload in [
            json!({"to": "nobody", "subject": "Hi", "body": "x"}),
            json!({"to": "a@example.com", "subject": "Hi"}),
            json!({"subject": "Hi", "body": "x"}),
        ] {
            let err = SendEmail
                .handle(&payload, &meta(), CancellationToken::new())
                .await
                .unwrap_err();
            assert!(matches!(err, TaskError::Permanent(_)), "{payload}");
        }
    }
}
