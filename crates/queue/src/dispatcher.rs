//! Consumer dispatch.
//!
//! [`ConsumerDispatcher`] runs one supervised subscription per queue and turns
//! each delivery into exactly one settlement on the broker.
//!
//! ## Per-delivery flow
//!
//! ```text
//! delivered → decode envelope ─(error)──────────────→ dead-letter
//!                  ↓
//!           DeliveryHandler::handle → Disposition
//!                  ↓
//!   Ack → ack | Retry → nack(requeue) | DeadLetter → publish to dead-letters, ack
//! ```
//!
//! ## Design
//!
//! - **At-least-once**: nothing is acked before the handler returns. A crash
//!   mid-handler leaves the delivery unacked; the broker redelivers it.
//! - **Permanent failures leave the work queue**: malformed bodies, unknown
//!   task types and `DeadLetter` dispositions are copied to
//!   [`QueueName::DeadLetters`] with diagnostic headers, then acked. If that
//!   copy fails the original is requeued instead, so nothing is dropped.
//! - **Supervision**: if consuming fails or the delivery stream ends (channel
//!   died), the subscription is re-attached after the client's reconnect delay.
//! - **Bounded drain**: [`ConsumerDispatcher::shutdown`] stops intake, waits up
//!   to a grace period for running handlers, then cancels their tokens.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use tasklane_core::{CoreError, QueueMessage, QueueName};

use crate::client::BrokerClient;
use crate::error::QueueError;
use crate::transport::{BrokerChannel, Delivery, DeliveryStream, Transport};

pub const HEADER_ORIGINAL_QUEUE: &str = "x-original-queue";
pub const HEADER_DEAD_LETTER_REASON: &str = "x-dead-letter-reason";
pub const HEADER_TASK_TYPE: &str = "x-task-type";

/// How long cancelled handlers get to settle after the grace period ran out.
const CANCEL_SETTLE_WINDOW: Duration = Duration::from_secs(5);

/// Terminal decision for one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Done; remove from the queue.
    Ack,
    /// Transient failure; put back for redelivery.
    Retry { reason: String },
    /// Permanent failure; move to the dead-letter queue.
    DeadLetter { reason: String },
}

impl Disposition {
    pub fn retry(reason: impl Into<String>) -> Self {
        Self::Retry {
            reason: reason.into(),
        }
    }

    pub fn dead_letter(reason: impl Into<String>) -> Self {
        Self::DeadLetter {
            reason: reason.into(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Ack => "ack",
            Disposition::Retry { .. } => "retry",
            Disposition::DeadLetter { .. } => "dead_letter",
        }
    }
}

/// Processes decoded envelopes for a subscription.
///
/// `cancel` fires when shutdown gives up waiting; handlers should return
/// promptly (typically with [`Disposition::Retry`]) once it does.
#[async_trait]
pub trait DeliveryHandler: Send + Sync + 'static {
    async fn handle(&self, message: QueueMessage, cancel: CancellationToken) -> Disposition;
}

#[async_trait]
impl<H> DeliveryHandler for Arc<H>
where
    H: DeliveryHandler + ?Sized,
{
    async fn handle(&self, message: QueueMessage, cancel: CancellationToken) -> Disposition {
        (**self).handle(message, cancel).await
    }
}

/// Closure adapter, see [`handler_fn`].
pub struct HandlerFn<F>(F);

/// Wrap an async closure as a [`DeliveryHandler`].
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(QueueMessage, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Disposition> + Send + 'static,
{
    HandlerFn(f)
}

#[async_trait]
impl<F, Fut> DeliveryHandler for HandlerFn<F>
where
    F: Fn(QueueMessage, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Disposition> + Send + 'static,
{
    async fn handle(&self, message: QueueMessage, cancel: CancellationToken) -> Disposition {
        (self.0)(message, cancel).await
    }
}

/// Result of [`ConsumerDispatcher::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainReport {
    /// Handlers running when intake stopped.
    pub in_flight_at_stop: usize,
    /// Handlers still running when the grace period ran out.
    pub cancelled: usize,
}

impl DrainReport {
    pub fn is_clean(&self) -> bool {
        self.cancelled == 0
    }
}

/// Read-only view of dispatcher activity (for health reporting).
#[derive(Debug, Clone)]
pub struct DispatcherMonitor {
    active: Arc<AtomicUsize>,
    in_flight: TaskTracker,
}

impl DispatcherMonitor {
    pub fn active_subscriptions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

/// Subscribes handlers to queues and settles their deliveries.
pub struct ConsumerDispatcher<T: Transport> {
    client: BrokerClient<T>,
    stop: CancellationToken,
    abort: CancellationToken,
    supervisors: TaskTracker,
    in_flight: TaskTracker,
    active: Arc<AtomicUsize>,
}

impl<T: Transport> Clone for ConsumerDispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            stop: self.stop.clone(),
            abort: self.abort.clone(),
            supervisors: self.supervisors.clone(),
            in_flight: self.in_flight.clone(),
            active: Arc::clone(&self.active),
        }
    }
}

enum PumpExit {
    Stopped,
    StreamEnded,
}

impl<T: Transport> ConsumerDispatcher<T> {
    pub fn new(client: BrokerClient<T>) -> Self {
        Self {
            client,
            stop: CancellationToken::new(),
            abort: CancellationToken::new(),
            supervisors: TaskTracker::new(),
            in_flight: TaskTracker::new(),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn client(&self) -> &BrokerClient<T> {
        &self.client
    }

    /// Handlers currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Subscriptions currently attached to a consumer.
    pub fn active_subscriptions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn monitor(&self) -> DispatcherMonitor {
        DispatcherMonitor {
            active: Arc::clone(&self.active),
            in_flight: self.in_flight.clone(),
        }
    }

    /// Start consuming `queue`. Returns immediately; attachment happens in the
    /// background and is retried until [`Self::shutdown`].
    pub fn subscribe<H: DeliveryHandler>(&self, queue: QueueName, handler: H) {
        if self.stop.is_cancelled() {
            warn!(queue = %queue, "dispatcher is shutting down; subscription ignored");
            return;
        }

        let this = self.clone();
        let handler = Arc::new(handler);
        self.supervisors.spawn(
            async move { this.supervise(queue, handler).await }
                .instrument(info_span!("subscription", queue = %queue)),
        );
    }

    async fn supervise<H: DeliveryHandler>(self, queue: QueueName, handler: Arc<H>) {
        let mut failures: u32 = 0;

        loop {
            if self.stop.is_cancelled() {
                return;
            }

            let attached = tokio::select! {
                _ = self.stop.cancelled() => return,
                attached = self.attach(queue) => attached,
            };

            match attached {
                Ok((channel, consumer_tag, stream)) => {
                    failures = 0;
                    self.active.fetch_add(1, Ordering::SeqCst);
                    info!(consumer_tag = %consumer_tag, "consumer attached");

                    let exit = self.pump(queue, &channel, stream, &handler).await;
                    self.active.fetch_sub(1, Ordering::SeqCst);

                    match exit {
                        PumpExit::Stopped => {
                            if let Err(e) = channel.cancel(&consumer_tag).await {
                                debug!(error = %e, "consumer cancel failed");
                            }
                            info!(consumer_tag = %consumer_tag, "consumer stopped");
                            return;
                        }
                        PumpExit::StreamEnded => {
                            warn!(consumer_tag = %consumer_tag, "delivery stream ended; resubscribing");
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "subscription attempt failed");
                }
            }

            failures = failures.saturating_add(1);
            let delay = self.client.policy().delay_for_attempt(failures);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.stop.cancelled() => return,
            }
        }
    }

    async fn attach(
        &self,
        queue: QueueName,
    ) -> Result<(T::Channel, String, DeliveryStream), QueueError> {
        let channel = self.client.channel().await?;
        let consumer_tag = format!("{queue}-{}", Uuid::now_v7().simple());
        let stream = channel.consume(queue, &consumer_tag).await?;
        Ok((channel, consumer_tag, stream))
    }

    async fn pump<H: DeliveryHandler>(
        &self,
        queue: QueueName,
        channel: &T::Channel,
        mut stream: DeliveryStream,
        handler: &Arc<H>,
    ) -> PumpExit {
        loop {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => return PumpExit::Stopped,
                next = stream.recv() => match next {
                    Some(delivery) => {
                        let span = info_span!(
                            "delivery",
                            queue = %queue,
                            delivery_tag = delivery.delivery_tag,
                            redelivered = delivery.redelivered,
                        );
                        self.in_flight.spawn(
                            process(
                                channel.clone(),
                                queue,
                                delivery,
                                Arc::clone(handler),
                                self.abort.child_token(),
                            )
                            .instrument(span),
                        );
                    }
                    None => return PumpExit::StreamEnded,
                },
            }
        }
    }

    /// Stop intake, wait up to `grace` for running handlers, then cancel them.
    pub async fn shutdown(&self, grace: Duration) -> DrainReport {
        self.stop.cancel();
        self.supervisors.close();
        self.supervisors.wait().await;

        let in_flight_at_stop = self.in_flight.len();
        self.in_flight.close();
        info!(in_flight = in_flight_at_stop, grace_ms = grace.as_millis() as u64, "draining handlers");

        if tokio::time::timeout(grace, self.in_flight.wait()).await.is_ok() {
            info!("all handlers finished");
            return DrainReport {
                in_flight_at_stop,
                cancelled: 0,
            };
        }

        let cancelled = self.in_flight.len();
        warn!(cancelled, "grace period expired; cancelling handlers");
        self.abort.cancel();
        if tokio::time::timeout(CANCEL_SETTLE_WINDOW, self.in_flight.wait())
            .await
            .is_err()
        {
            error!(remaining = self.in_flight.len(), "handlers ignored cancellation");
        }

        DrainReport {
            in_flight_at_stop,
            cancelled,
        }
    }
}

async fn process<C, H>(
    channel: C,
    queue: QueueName,
    delivery: Delivery,
    handler: Arc<H>,
    cancel: CancellationToken,
) where
    C: BrokerChannel,
    H: DeliveryHandler,
{
    let (disposition, task_type) = match QueueMessage::from_bytes(&delivery.body) {
        Ok(message) => {
            let task_type = message.task_type().to_string();
            debug!(
                task_type = %task_type,
                request_id = %message.request_id(),
                "dispatching"
            );
            (handler.handle(message, cancel).await, Some(task_type))
        }
        Err(CoreError::UnknownTaskType(name)) => {
            warn!(task_type = %name, "unknown task type");
            (
                Disposition::dead_letter(format!("unknown task type: {name}")),
                Some(name),
            )
        }
        Err(e) => {
            warn!(error = %e, "undecodable message body");
            (Disposition::dead_letter(e.to_string()), None)
        }
    };

    settle(&channel, queue, &delivery, task_type, disposition).await;
}

async fn settle<C: BrokerChannel>(
    channel: &C,
    queue: QueueName,
    delivery: &Delivery,
    task_type: Option<String>,
    disposition: Disposition,
) {
    let tag = delivery.delivery_tag;
    let outcome = disposition.as_str();

    let result = match disposition {
        Disposition::Ack => channel.ack(tag).await,
        Disposition::Retry { reason } => {
            info!(reason = %reason, "requeueing for redelivery");
            channel.nack(tag, true).await
        }
        Disposition::DeadLetter { reason } => {
            dead_letter(channel, queue, delivery, task_type, reason).await
        }
    };

    match result {
        Ok(()) => debug!(outcome, "delivery settled"),
        // Channel is gone; the broker requeues the delivery on its own.
        Err(e) => warn!(outcome, error = %e, "failed to settle delivery"),
    }
}

async fn dead_letter<C: BrokerChannel>(
    channel: &C,
    queue: QueueName,
    delivery: &Delivery,
    task_type: Option<String>,
    reason: String,
) -> Result<(), crate::error::BrokerError> {
    let tag = delivery.delivery_tag;

    if queue == QueueName::DeadLetters {
        error!(reason = %reason, "dropping message rejected from the dead-letter queue");
        return channel.nack(tag, false).await;
    }

    let mut properties = delivery
        .properties
        .clone()
        .with_header(HEADER_ORIGINAL_QUEUE, queue.as_str())
        .with_header(HEADER_DEAD_LETTER_REASON, reason.as_str());
    if let Some(task_type) = task_type {
        properties = properties.with_header(HEADER_TASK_TYPE, task_type);
    }

    match channel
        .publish(QueueName::DeadLetters, delivery.body.clone(), properties)
        .await
    {
        Ok(()) => {
            warn!(reason = %reason, "message dead-lettered");
            channel.ack(tag).await
        }
        Err(e) => {
            error!(reason = %reason, error = %e, "dead-letter publish failed; requeueing");
            channel.nack(tag, true).await
        }
    }
}
