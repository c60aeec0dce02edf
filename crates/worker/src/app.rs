//! Worker composition root.
//!
//! [`Worker::start`] subscribes the handler registry to every work queue;
//! [`run`] wires the AMQP transport, the health endpoint and signal-driven
//! shutdown around it.

use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tasklane_core::QueueName;
use tasklane_infra::{AmqpTransport, WorkerConfig};
use tasklane_queue::{BrokerClient, ConsumerDispatcher, DrainReport, Topology, Transport};

use crate::health::{self, HealthState};
use crate::registry::HandlerRegistry;

/// A running worker: one dispatcher over a shared broker client.
pub struct Worker<T: Transport> {
    client: BrokerClient<T>,
    dispatcher: ConsumerDispatcher<T>,
}

impl<T: Transport> Worker<T> {
    /// Subscribe `registry` to every work queue and start connecting.
    pub fn start(client: BrokerClient<T>, registry: HandlerRegistry) -> Self {
        let missing = registry.missing();
        if !missing.is_empty() {
            warn!(?missing, "task types without a handler will be dead-lettered");
        }

        let dispatcher = ConsumerDispatcher::new(client.clone());
        for queue in QueueName::WORK {
            dispatcher.subscribe(queue, registry.clone());
        }
        client.warm();
        info!(queues = QueueName::WORK.len(), "worker started");

        Self { client, dispatcher }
    }

    pub fn client(&self) -> &BrokerClient<T> {
        &self.client
    }

    pub fn dispatcher(&self) -> &ConsumerDispatcher<T> {
        &self.dispatcher
    }

    pub fn health_state(&self) -> HealthState {
        HealthState::new(self.client.subscribe_phase(), self.dispatcher.monitor())
    }

    /// Drain handlers for up to `grace`, then close the broker connection.
    pub async fn stop(self, grace: Duration) -> DrainReport {
        let report = self.dispatcher.shutdown(grace).await;
        self.client.close().await;
        report
    }
}

/// Run the worker until SIGINT/SIGTERM.
pub async fn run(config: WorkerConfig) -> anyhow::Result<()> {
    info!(
        broker = %config.redacted_broker_url(),
        prefetch = config.prefetch,
        "starting worker"
    );

    let client = BrokerClient::new(
        AmqpTransport::new(config.broker_url.clone()),
        Topology::standard().with_prefetch(config.prefetch),
        config.reconnect.clone(),
    );
    let worker = Worker::start(client, HandlerRegistry::standard());

    let health_shutdown = CancellationToken::new();
    let health_task = config.health_addr.map(|addr| {
        let state = worker.health_state();
        let token = health_shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = health::serve(addr, state, token).await {
                warn!(error = %e, "health endpoint stopped");
            }
        })
    });

    shutdown_signal().await.context("installing signal handlers")?;
    info!(grace_secs = config.shutdown_grace.as_secs(), "shutdown requested; draining");

    let report = worker.stop(config.shutdown_grace).await;
    if report.is_clean() {
        info!(in_flight = report.in_flight_at_stop, "drain complete");
    } else {
        warn!(
            in_flight = report.in_flight_at_stop,
            cancelled = report.cancelled,
            "drain cut short; cancelled deliveries were requeued"
        );
    }

    health_shutdown.cancel();
    if let Some(task) = health_task {
        let _ = task.await;
    }
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
