use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{CoreError, CoreResult};
use crate::id::RequestId;
use crate::task::TaskType;

/// Fallback `userId` when the caller has no authenticated user.
pub const ANONYMOUS_USER: &str = "anonymous";

/// Fallback `organizationId` for work not tied to a tenant.
pub const SYSTEM_ORGANIZATION: &str = "system";

/// Delivery priority, 0 (lowest) to 10 (highest).
///
/// Values outside the range are representable on purpose: they are handed to
/// the broker unchanged, which may reject or clamp them.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(u8);

impl Priority {
    pub const MIN: Priority = Priority(0);
    pub const DEFAULT: Priority = Priority(5);
    pub const MAX: Priority = Priority(10);

    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    pub const fn value(&self) -> u8 {
        self.0
    }

    pub fn is_in_range(&self) -> bool {
        *self >= Self::MIN && *self <= Self::MAX
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<u8> for Priority {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl core::fmt::Display for Priority {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Caller-supplied metadata; anything left `None` is defaulted at publish time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataOverrides {
    pub user_id: Option<String>,
    pub organization_id: Option<String>,
    pub timestamp: Option<i64>,
    pub request_id: Option<RequestId>,
}

impl MetadataOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    pub fn timestamp(mut self, epoch_ms: i64) -> Self {
        self.timestamp = Some(epoch_ms);
        self
    }

    pub fn request_id(mut self, request_id: impl Into<RequestId>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// Who asked for the work, and when.
///
/// Always present on an envelope. Fields are read-only once stamped; consumers
/// only ever see shared references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    user_id: String,
    organization_id: String,
    /// Epoch milliseconds at publish time.
    timestamp: i64,
    request_id: RequestId,
}

impl Metadata {
    /// Fill in defaults for anything the caller left out.
    pub fn stamp(overrides: MetadataOverrides) -> Self {
        Self {
            user_id: overrides
                .user_id
                .unwrap_or_else(|| ANONYMOUS_USER.to_string()),
            organization_id: overrides
                .organization_id
                .unwrap_or_else(|| SYSTEM_ORGANIZATION.to_string()),
            timestamp: overrides
                .timestamp
                .unwrap_or_else(|| Utc::now().timestamp_millis()),
            request_id: overrides.request_id.unwrap_or_else(RequestId::generate),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn organization_id(&self) -> &str {
        &self.organization_id
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }
}

/// The unit of work transiting the broker.
///
/// Wire format (UTF-8 JSON):
///
/// ```text
/// {
///   "taskType": "send-email",
///   "priority": 5,
///   "payload": { ... },
///   "metadata": { "userId": "...", "organizationId": "...",
///                 "timestamp": 1700000000000, "requestId": "..." }
/// }
/// ```
///
/// Notes:
/// - `payload` is opaque to the queue layer; handlers decode it.
/// - Decoding goes through [`QueueMessage::from_bytes`] so that an unknown
///   `taskType` is reported as such rather than as a generic JSON error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    task_type: TaskType,
    priority: Priority,
    payload: JsonValue,
    metadata: Metadata,
}

/// Decoding shape: `taskType` is kept as a string until validated.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEnvelope {
    task_type: String,
    priority: Priority,
    payload: JsonValue,
    metadata: Metadata,
}

impl QueueMessage {
    /// Build an envelope, stamping defaulted metadata.
    pub fn new(
        task_type: TaskType,
        payload: JsonValue,
        overrides: MetadataOverrides,
        priority: Priority,
    ) -> Self {
        Self::from_parts(task_type, priority, payload, Metadata::stamp(overrides))
    }

    pub fn from_parts(
        task_type: TaskType,
        priority: Priority,
        payload: JsonValue,
        metadata: Metadata,
    ) -> Self {
        Self {
            task_type,
            priority,
            payload,
            metadata,
        }
    }

    pub fn task_type(&self) -> TaskType {
        self.task_type
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn request_id(&self) -> &RequestId {
        self.metadata.request_id()
    }

    pub fn into_payload(self) -> JsonValue {
        self.payload
    }

    /// Serialize to the JSON wire form.
    pub fn to_bytes(&self) -> CoreResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CoreError::serialization(e.to_string()))
    }

    /// Parse a broker message body.
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        let raw: RawEnvelope =
            serde_json::from_slice(bytes).map_err(|e| CoreError::malformed(e.to_string()))?;
        let task_type = raw.task_type.parse::<TaskType>()?;

        Ok(Self {
            task_type,
            priority: raw.priority,
            payload: raw.payload,
            metadata: raw.metadata,
        })
    }
}
