//! `tasklane-core` — task queue data model.
//!
//! This crate contains the **pure** building blocks shared by publishers and
//! workers: the task and queue catalogs, the envelope that transits the broker,
//! and its JSON wire codec. No IO lives here.

pub mod envelope;
pub mod error;
pub mod id;
pub mod queue;
pub mod task;

pub use envelope::{Metadata, MetadataOverrides, Priority, QueueMessage};
pub use error::{CoreError, CoreResult};
pub use id::RequestId;
pub use queue::{QueueDefinition, QueueName};
pub use task::TaskType;
