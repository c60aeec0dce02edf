//! Worker process: routes queue deliveries to task handlers.
//!
//! - [`registry`]: task type → handler table, plugged into the dispatcher
//! - [`handlers`]: one handler per task type
//! - [`health`]: liveness/readiness endpoint
//! - [`app`]: composition root and lifecycle

pub mod app;
pub mod handlers;
pub mod health;
pub mod registry;

pub use app::Worker;
pub use registry::{HandlerRegistry, TaskError, TaskHandler};
