//! Task handler registry.
//!
//! Maps each [`TaskType`] to its [`TaskHandler`] and adapts handler results to
//! dispatcher [`Disposition`]s:
//!
//! | Handler result | Disposition |
//! |----------------|-------------|
//! | `Ok(())` | `Ack` |
//! | `Err(Transient)` | `Retry` |
//! | `Err(Cancelled)` | `Retry` |
//! | `Err(Permanent)` | `DeadLetter` |
//! | no handler registered | `DeadLetter` |

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

use tasklane_core::{Metadata, QueueMessage, TaskType};
use tasklane_queue::{DeliveryHandler, Disposition};

/// How a task handler failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// Worth retrying (dependency down, timeout, rate limit).
    #[error("transient failure: {0}")]
    Transient(String),

    /// Will never succeed as sent (invalid payload, unknown entity).
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// Stopped because the worker is shutting down.
    #[error("cancelled")]
    Cancelled,
}

impl TaskError {
    pub fn transient(e: impl ToString) -> Self {
        Self::Transient(e.to_string())
    }

    pub fn permanent(e: impl ToString) -> Self {
        Self::Permanent(e.to_string())
    }
}

impl From<TaskError> for Disposition {
    fn from(e: TaskError) -> Self {
        match e {
            TaskError::Transient(reason) => Disposition::retry(reason),
            TaskError::Cancelled => Disposition::retry("cancelled"),
            TaskError::Permanent(reason) => Disposition::dead_letter(reason),
        }
    }
}

/// Task-specific processing for one task type.
///
/// Handlers must return errors rather than swallow them: the error decides
/// whether the message is redelivered or dead-lettered. Delivery is
/// at-least-once, so handlers should be idempotent.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    fn task_type(&self) -> TaskType;

    async fn handle(
        &self,
        payload: &JsonValue,
        metadata: &Metadata,
        cancel: CancellationToken,
    ) -> Result<(), TaskError>;
}

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.handlers.keys().collect();
        types.sort();
        f.debug_struct("HandlerRegistry")
            .field("task_types", &types)
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One handler per task type.
    pub fn standard() -> Self {
        crate::handlers::standard_registry()
    }

    /// Register `handler` under its task type, replacing any previous one.
    pub fn register<H: TaskHandler>(&mut self, handler: H) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.insert(handler.task_type(), Arc::new(handler))
    }

    pub fn with<H: TaskHandler>(mut self, handler: H) -> Self {
        self.register(handler);
        self
    }

    pub fn get(&self, task_type: TaskType) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(&task_type).cloned()
    }

    pub fn contains(&self, task_type: TaskType) -> bool {
        self.handlers.contains_key(&task_type)
    }

    /// Task types without a handler.
    pub fn missing(&self) -> Vec<TaskType> {
        TaskType::ALL
            .into_iter()
            .filter(|t| !self.contains(*t))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[async_trait]
impl DeliveryHandler for HandlerRegistry {
    async fn handle(&self, message: QueueMessage, cancel: CancellationToken) -> Disposition {
        let task_type = message.task_type();
        let span = info_span!(
            "task",
            task_type = %task_type,
            request_id = %message.request_id(),
            organization_id = %message.metadata().organization_id(),
        );

        let Some(handler) = self.get(task_type) else {
            let _entered = span.enter();
            error!("no handler registered for task type");
            return Disposition::dead_letter(format!("no handler registered for {task_type}"));
        };

        async move {
            info!(priority = message.priority().value(), "task started");
            let started = Instant::now();
            let result = handler
                .handle(message.payload(), message.metadata(), cancel)
                .await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(()) => {
                    info!(elapsed_ms, "task completed");
                    Disposition::Ack
                }
                Err(e) => {
                    warn!(elapsed_ms, error = %e, "task failed");
                    e.into()
                }
            }
        }
        .instrument(span)
        .await
    }
}
