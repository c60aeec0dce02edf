//! Queue provisioning.

use tracing::{debug, info};

use tasklane_core::{QueueDefinition, QueueName};

use crate::error::BrokerError;
use crate::transport::BrokerChannel;

/// Default per-consumer prefetch: one unacknowledged delivery at a time.
pub const DEFAULT_PREFETCH: u16 = 1;

/// Queues to declare and the channel QoS to apply, once per new channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    queues: Vec<QueueDefinition>,
    prefetch: u16,
}

impl Default for Topology {
    fn default() -> Self {
        Self::standard()
    }
}

impl Topology {
    /// Full queue catalog (work queues plus `dead-letters`), prefetch 1.
    pub fn standard() -> Self {
        Self {
            queues: QueueDefinition::catalog(),
            prefetch: DEFAULT_PREFETCH,
        }
    }

    pub fn with_prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch;
        self
    }

    pub fn queues(&self) -> &[QueueDefinition] {
        &self.queues
    }

    pub fn prefetch(&self) -> u16 {
        self.prefetch
    }

    pub fn contains(&self, queue: QueueName) -> bool {
        self.queues.iter().any(|q| q.name == queue)
    }

    /// Declare every queue, then set prefetch. Safe to repeat.
    pub async fn declare<C: BrokerChannel>(&self, channel: &C) -> Result<(), BrokerError> {
        for definition in &self.queues {
            channel.declare_queue(definition).await?;
            debug!(
                queue = %definition.name,
                max_priority = ?definition.max_priority,
                "queue declared"
            );
        }

        channel.set_prefetch(self.prefetch).await?;

        info!(
            queues = self.queues.len(),
            prefetch = self.prefetch,
            "topology declared"
        );
        Ok(())
    }
}
