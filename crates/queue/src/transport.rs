//! Broker transport abstraction (mechanics only).
//!
//! This module is the seam between the queue layer and a concrete broker.
//!
//! ## Design Philosophy
//!
//! The traits mirror the AMQP 0-9-1 operations the queue layer needs and
//! nothing more:
//!
//! - **One channel per process**: [`Transport::connect`] opens a connection and a
//!   single channel on it; the [`crate::BrokerClient`] owns the result.
//! - **Manual acknowledgement**: consumers receive [`Delivery`] values and must
//!   `ack` or `nack` them on the channel they came from.
//! - **At-least-once**: a delivery that is never settled is redelivered by the
//!   broker once its channel closes.
//! - **Close notification**: [`BrokerChannel::closed`] resolves when the channel
//!   or its connection dies, which is what drives reconnection.
//!
//! ## Thread Safety
//!
//! Channels are cheap handles (`Clone`) over shared broker state and can be
//! used concurrently from many tasks.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;

use tasklane_core::{QueueDefinition, QueueName};

use crate::error::BrokerError;

/// AMQP delivery mode for messages that survive a broker restart.
pub const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// Broker-level message properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageProperties {
    pub persistent: bool,
    pub priority: Option<u8>,
    pub content_type: Option<String>,
    pub message_id: Option<String>,
    pub headers: BTreeMap<String, String>,
}

impl MessageProperties {
    /// Properties for a message that survives broker restarts.
    pub fn persistent() -> Self {
        Self {
            persistent: true,
            ..Self::default()
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }
}

/// One message handed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Channel-scoped tag used to settle the delivery.
    pub delivery_tag: u64,
    /// Set when the broker has delivered this message before.
    pub redelivered: bool,
    pub body: Vec<u8>,
    pub properties: MessageProperties,
}

/// Stream of deliveries for one consumer; ends when the consumer is cancelled
/// or its channel closes.
pub type DeliveryStream = UnboundedReceiver<Delivery>;

/// Opens broker sessions.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Channel: BrokerChannel;

    /// Open a new connection and a channel on it.
    async fn connect(&self) -> Result<Self::Channel, BrokerError>;

    /// Human-readable endpoint for logs (credentials redacted).
    fn endpoint(&self) -> String;
}

/// Operations on an open broker channel.
#[async_trait]
pub trait BrokerChannel: Clone + Send + Sync + 'static {
    /// Ensure a queue exists. Idempotent for identical definitions.
    async fn declare_queue(&self, definition: &QueueDefinition) -> Result<(), BrokerError>;

    /// Cap unacknowledged deliveries per consumer (basic.qos, non-global).
    async fn set_prefetch(&self, count: u16) -> Result<(), BrokerError>;

    async fn publish(
        &self,
        queue: QueueName,
        body: Vec<u8>,
        properties: MessageProperties,
    ) -> Result<(), BrokerError>;

    /// Start a manual-ack consumer.
    async fn consume(
        &self,
        queue: QueueName,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, BrokerError>;

    /// Stop a consumer. Unsettled deliveries stay with the channel.
    async fn cancel(&self, consumer_tag: &str) -> Result<(), BrokerError>;

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError>;

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError>;

    fn is_open(&self) -> bool;

    /// Resolves once the channel (or its connection) is closed for any reason.
    async fn closed(&self);

    /// Close the channel and its connection.
    async fn close(&self) -> Result<(), BrokerError>;
}
