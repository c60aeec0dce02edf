//! Infrastructure layer: broker adapters and process configuration.

pub mod config;

#[cfg(feature = "amqp")]
pub mod amqp;

#[cfg(all(test, feature = "amqp"))]
mod integration_tests;

pub use config::{ConfigError, WorkerConfig};

#[cfg(feature = "amqp")]
pub use amqp::{AmqpChannel, AmqpTransport};
