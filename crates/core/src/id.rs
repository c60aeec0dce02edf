//! Request identifiers stamped on every envelope.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Correlation id carried in `metadata.requestId`.
///
/// Callers usually forward the id of the HTTP request that enqueued the work;
/// when they don't, one is generated at publish time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a fresh id (`req_` + time-ordered UUIDv7, simple form).
    pub fn generate() -> Self {
        Self(format!("req_{}", Uuid::now_v7().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl core::fmt::Display for RequestId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<RequestId> for String {
    fn from(value: RequestId) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_prefixed_and_unique() {
        let a = RequestId::generate();
        let b = RequestId::generate();

        assert!(a.as_str().starts_with("req_"));
        assert_eq!(a.as_str().len(), "req_".len() + 32);
        assert_ne!(a, b);
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = RequestId::from("req_abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"req_abc\"");
    }
}
