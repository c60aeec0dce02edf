//! Task queue mechanics: connection management, topology, publishing and
//! consumer dispatch.
//!
//! Everything here is written against the [`Transport`] / [`BrokerChannel`]
//! traits. Infrastructure crates provide the real broker adapter (AMQP); this
//! crate ships an [`InMemoryBroker`] for tests and local development.
//!
//! ## Data flow
//!
//! ```text
//! caller → Publisher::publish ─┐
//!                              ├→ BrokerClient::channel() → Topology::declare (once per channel)
//! ConsumerDispatcher ──────────┘
//!        ↓ delivery
//!   decode envelope → DeliveryHandler → Disposition → ack | nack(requeue) | dead-letter
//! ```

pub mod backoff;
pub mod client;
pub mod dispatcher;
pub mod error;
pub mod memory;
pub mod publisher;
pub mod topology;
pub mod transport;

pub use backoff::ReconnectPolicy;
pub use client::{BrokerClient, ConnectionPhase};
pub use dispatcher::{
    ConsumerDispatcher, DeliveryHandler, DispatcherMonitor, Disposition, DrainReport, HandlerFn,
    handler_fn,
};
pub use error::{BrokerError, PublishError, QueueError};
pub use memory::{InMemoryBroker, InMemoryChannel};
pub use publisher::{PublishReceipt, Publisher};
pub use topology::Topology;
pub use transport::{BrokerChannel, Delivery, DeliveryStream, MessageProperties, Transport};
