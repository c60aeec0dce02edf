//! In-memory broker for tests/dev.
//!
//! Models the parts of AMQP 0-9-1 the queue layer relies on:
//!
//! - Durable queue declaration (idempotent; differing arguments are rejected)
//! - Priority queues (`max_priority`), FIFO within a priority
//! - Per-consumer prefetch, round-robin across consumers
//! - Manual ack / nack with requeue; unsettled deliveries are requeued with
//!   `redelivered = true` when their channel closes
//!
//! Plus hooks tests need: refusing connections, severing every open channel,
//! and inspecting queue contents.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_util::sync::CancellationToken;

use tasklane_core::{QueueDefinition, QueueName};

use crate::error::BrokerError;
use crate::transport::{BrokerChannel, Delivery, DeliveryStream, MessageProperties, Transport};

/// A message sitting in a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub body: Vec<u8>,
    pub properties: MessageProperties,
    pub redelivered: bool,
}

#[derive(Debug)]
struct Ready {
    seq: u64,
    message: StoredMessage,
}

type ReadyKey = (Reverse<u8>, u64);

#[derive(Debug)]
struct QueueState {
    definition: QueueDefinition,
    ready: BTreeMap<ReadyKey, StoredMessage>,
    consumers: Vec<Consumer>,
    cursor: usize,
}

impl QueueState {
    fn new(definition: QueueDefinition) -> Self {
        Self {
            definition,
            ready: BTreeMap::new(),
            consumers: Vec::new(),
            cursor: 0,
        }
    }

    fn key_for(&self, properties: &MessageProperties, seq: u64) -> ReadyKey {
        let effective = match self.definition.max_priority {
            Some(max) => properties.priority.unwrap_or(0).min(max),
            None => 0,
        };
        (Reverse(effective), seq)
    }

    fn enqueue(&mut self, ready: Ready) {
        let key = self.key_for(&ready.message.properties, ready.seq);
        self.ready.insert(key, ready.message);
    }
}

#[derive(Debug)]
struct Consumer {
    channel: u64,
    tag: String,
    tx: UnboundedSender<Delivery>,
}

#[derive(Debug)]
struct Unacked {
    queue: QueueName,
    consumer_tag: String,
    seq: u64,
    message: StoredMessage,
}

#[derive(Debug)]
struct ChannelState {
    prefetch: u16,
    next_tag: u64,
    unacked: HashMap<u64, Unacked>,
    closed: CancellationToken,
}

impl ChannelState {
    fn has_capacity(&self, consumer_tag: &str) -> bool {
        if self.prefetch == 0 {
            return true;
        }
        let held = self
            .unacked
            .values()
            .filter(|u| u.consumer_tag == consumer_tag)
            .count();
        held < self.prefetch as usize
    }
}

#[derive(Debug)]
struct State {
    queues: HashMap<QueueName, QueueState>,
    channels: HashMap<u64, ChannelState>,
    accepting: bool,
    next_channel: u64,
    next_seq: u64,
    connections_opened: usize,
    declare_calls: usize,
}

impl Default for State {
    fn default() -> Self {
        Self {
            queues: HashMap::new(),
            channels: HashMap::new(),
            accepting: true,
            next_channel: 1,
            next_seq: 0,
            connections_opened: 0,
            declare_calls: 0,
        }
    }
}

impl State {
    /// Hand ready messages to consumers with spare prefetch, round-robin.
    fn pump(&mut self, queue: QueueName) {
        let State {
            queues, channels, ..
        } = self;
        let Some(q) = queues.get_mut(&queue) else {
            return;
        };

        loop {
            if q.ready.is_empty() || q.consumers.is_empty() {
                return;
            }

            q.consumers.retain(|c| !c.tx.is_closed());
            let n = q.consumers.len();
            let chosen = (0..n).map(|i| (q.cursor + i) % n).find(|&i| {
                let c = &q.consumers[i];
                channels
                    .get(&c.channel)
                    .is_some_and(|ch| ch.has_capacity(&c.tag))
            });
            let Some(idx) = chosen else {
                return;
            };
            q.cursor = (idx + 1) % n;

            let Some(((_, seq), message)) = q.ready.pop_first() else {
                return;
            };
            let consumer = &q.consumers[idx];
            let Some(channel) = channels.get_mut(&consumer.channel) else {
                return;
            };

            let delivery_tag = channel.next_tag;
            channel.next_tag += 1;
            let delivery = Delivery {
                delivery_tag,
                redelivered: message.redelivered,
                body: message.body.clone(),
                properties: message.properties.clone(),
            };

            if consumer.tx.send(delivery).is_err() {
                q.enqueue(Ready { seq, message });
                q.consumers.remove(idx);
                continue;
            }

            channel.unacked.insert(
                delivery_tag,
                Unacked {
                    queue,
                    consumer_tag: consumer.tag.clone(),
                    seq,
                    message,
                },
            );
        }
    }

    fn requeue(&mut self, unacked: Unacked) -> QueueName {
        let queue = unacked.queue;
        if let Some(q) = self.queues.get_mut(&queue) {
            let mut message = unacked.message;
            message.redelivered = true;
            q.enqueue(Ready {
                seq: unacked.seq,
                message,
            });
        }
        queue
    }

    /// Close a channel: drop its consumers and requeue what it still holds.
    fn close_channel(&mut self, id: u64) {
        let Some(channel) = self.channels.remove(&id) else {
            return;
        };
        channel.closed.cancel();

        for q in self.queues.values_mut() {
            q.consumers.retain(|c| c.channel != id);
        }

        let mut touched = Vec::new();
        for (_, unacked) in channel.unacked {
            touched.push(self.requeue(unacked));
        }
        touched.sort();
        touched.dedup();
        for queue in touched {
            self.pump(queue);
        }
    }
}

/// Shared in-process broker. Cloning yields another handle to the same broker.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<State>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // Poisoned only if a test panicked mid-operation.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refuse (`false`) or accept (`true`) new connections.
    pub fn set_accepting(&self, accepting: bool) {
        self.lock().accepting = accepting;
    }

    /// Close every open channel, as if the broker dropped all connections.
    pub fn sever_connections(&self) {
        let mut state = self.lock();
        let ids: Vec<u64> = state.channels.keys().copied().collect();
        for id in ids {
            state.close_channel(id);
        }
    }

    /// Declared queues, sorted.
    pub fn queue_names(&self) -> Vec<QueueName> {
        let mut names: Vec<QueueName> = self.lock().queues.keys().copied().collect();
        names.sort();
        names
    }

    pub fn definition(&self, queue: QueueName) -> Option<QueueDefinition> {
        self.lock().queues.get(&queue).map(|q| q.definition)
    }

    /// Ready (undelivered) messages in `queue`.
    pub fn depth(&self, queue: QueueName) -> usize {
        self.lock().queues.get(&queue).map_or(0, |q| q.ready.len())
    }

    /// Delivered but unsettled messages across all channels.
    pub fn unacked_count(&self) -> usize {
        self.lock().channels.values().map(|c| c.unacked.len()).sum()
    }

    pub fn consumer_count(&self, queue: QueueName) -> usize {
        self.lock().queues.get(&queue).map_or(0, |q| q.consumers.len())
    }

    /// Ready messages in `queue`, in delivery order.
    pub fn peek(&self, queue: QueueName) -> Vec<StoredMessage> {
        self.lock()
            .queues
            .get(&queue)
            .map(|q| q.ready.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn connections_opened(&self) -> usize {
        self.lock().connections_opened
    }

    pub fn declare_calls(&self) -> usize {
        self.lock().declare_calls
    }

    pub fn open_channels(&self) -> usize {
        self.lock().channels.len()
    }
}

#[async_trait]
impl Transport for InMemoryBroker {
    type Channel = InMemoryChannel;

    async fn connect(&self) -> Result<InMemoryChannel, BrokerError> {
        let mut state = self.lock();
        if !state.accepting {
            return Err(BrokerError::connect("connection refused"));
        }

        let id = state.next_channel;
        state.next_channel += 1;
        state.connections_opened += 1;

        let closed = CancellationToken::new();
        state.channels.insert(
            id,
            ChannelState {
                prefetch: 0,
                next_tag: 1,
                unacked: HashMap::new(),
                closed: closed.clone(),
            },
        );

        Ok(InMemoryChannel {
            id,
            closed,
            broker: self.clone(),
        })
    }

    fn endpoint(&self) -> String {
        "memory://".to_string()
    }
}

/// Channel handle on an [`InMemoryBroker`].
#[derive(Debug, Clone)]
pub struct InMemoryChannel {
    id: u64,
    closed: CancellationToken,
    broker: InMemoryBroker,
}

impl InMemoryChannel {
    pub fn id(&self) -> u64 {
        self.id
    }

    fn open_state(&self) -> Result<MutexGuard<'_, State>, BrokerError> {
        let state = self.broker.lock();
        if self.closed.is_cancelled() || !state.channels.contains_key(&self.id) {
            return Err(BrokerError::Closed);
        }
        Ok(state)
    }

    fn settle(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        let mut state = self.open_state()?;
        let unacked = state
            .channels
            .get_mut(&self.id)
            .and_then(|c| c.unacked.remove(&delivery_tag))
            .ok_or_else(|| BrokerError::ack(format!("unknown delivery tag {delivery_tag}")))?;

        let queue = if requeue {
            state.requeue(unacked)
        } else {
            unacked.queue
        };
        state.pump(queue);
        Ok(())
    }
}

#[async_trait]
impl BrokerChannel for InMemoryChannel {
    async fn declare_queue(&self, definition: &QueueDefinition) -> Result<(), BrokerError> {
        let mut state = self.open_state()?;
        state.declare_calls += 1;

        match state.queues.get(&definition.name) {
            Some(existing) if existing.definition == *definition => Ok(()),
            Some(existing) => Err(BrokerError::PreconditionFailed {
                queue: definition.name.to_string(),
                reason: format!(
                    "declared as {:?}, requested {:?}",
                    existing.definition, definition
                ),
            }),
            None => {
                state
                    .queues
                    .insert(definition.name, QueueState::new(*definition));
                Ok(())
            }
        }
    }

    async fn set_prefetch(&self, count: u16) -> Result<(), BrokerError> {
        let mut state = self.open_state()?;
        if let Some(channel) = state.channels.get_mut(&self.id) {
            channel.prefetch = count;
        }
        Ok(())
    }

    async fn publish(
        &self,
        queue: QueueName,
        body: Vec<u8>,
        properties: MessageProperties,
    ) -> Result<(), BrokerError> {
        let mut state = self.open_state()?;
        let seq = state.next_seq;
        state.next_seq += 1;

        let q = state
            .queues
            .get_mut(&queue)
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;
        q.enqueue(Ready {
            seq,
            message: StoredMessage {
                body,
                properties,
                redelivered: false,
            },
        });

        state.pump(queue);
        Ok(())
    }

    async fn consume(
        &self,
        queue: QueueName,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, BrokerError> {
        let mut state = self.open_state()?;
        let q = state
            .queues
            .get_mut(&queue)
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        q.consumers.push(Consumer {
            channel: self.id,
            tag: consumer_tag.to_string(),
            tx,
        });

        state.pump(queue);
        Ok(rx)
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), BrokerError> {
        let mut state = self.open_state()?;
        for q in state.queues.values_mut() {
            q.consumers
                .retain(|c| !(c.channel == self.id && c.tag == consumer_tag));
        }
        Ok(())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.settle(delivery_tag, false)
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        self.settle(delivery_tag, requeue)
    }

    fn is_open(&self) -> bool {
        !self.closed.is_cancelled()
    }

    async fn closed(&self) {
        self.closed.cancelled().await
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.broker.lock().close_channel(self.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(priority: u8) -> MessageProperties {
        MessageProperties::persistent().with_priority(priority)
    }

    async fn channel_with_queues(broker: &InMemoryBroker) -> InMemoryChannel {
        let ch = broker.connect().await.unwrap();
        for def in QueueDefinition::catalog() {
            ch.declare_queue(&def).await.unwrap();
        }
        ch
    }

    #[tokio::test]
    async fn priority_queue_delivers_highest_first() {
        let broker = InMemoryBroker::new();
        let ch = channel_with_queues(&broker).await;

        for p in [1u8, 9, 5] {
            ch.publish(QueueName::AiProcessing, vec![p], props(p))
                .await
                .unwrap();
        }

        let order: Vec<u8> = broker
            .peek(QueueName::AiProcessing)
            .into_iter()
            .map(|m| m.body[0])
            .collect();
        assert_eq!(order, vec![9, 5, 1]);
    }

    #[tokio::test]
    async fn queue_without_max_priority_is_fifo() {
        let broker = InMemoryBroker::new();
        let ch = channel_with_queues(&broker).await;

        for p in [1u8, 9, 5] {
            ch.publish(QueueName::EmailNotifications, vec![p], props(p))
                .await
                .unwrap();
        }

        let order: Vec<u8> = broker
            .peek(QueueName::EmailNotifications)
            .into_iter()
            .map(|m| m.body[0])
            .collect();
        assert_eq!(order, vec![1, 9, 5]);
    }

    #[tokio::test]
    async fn prefetch_limits_unacked_per_consumer() {
        let broker = InMemoryBroker::new();
        let ch = channel_with_queues(&broker).await;
        ch.set_prefetch(1).await.unwrap();

        for i in 0..3u8 {
            ch.publish(QueueName::DataExports, vec![i], MessageProperties::persistent())
                .await
                .unwrap();
        }

        let mut rx = ch.consume(QueueName::DataExports, "c1").await.unwrap();
        let first = rx.recv().await.unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(broker.depth(QueueName::DataExports), 2);

        ch.ack(first.delivery_tag).await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(second.body, vec![1]);
    }

    #[tokio::test]
    async fn closing_channel_requeues_unacked_as_redelivered() {
        let broker = InMemoryBroker::new();
        let ch = channel_with_queues(&broker).await;
        ch.publish(QueueName::PlatformSync, b"x".to_vec(), MessageProperties::persistent())
            .await
            .unwrap();

        let mut rx = ch.consume(QueueName::PlatformSync, "c1").await.unwrap();
        let first = rx.recv().await.unwrap();
        assert!(!first.redelivered);

        broker.sever_connections();
        assert!(!ch.is_open());
        assert!(rx.recv().await.is_none());

        let stored = broker.peek(QueueName::PlatformSync);
        assert_eq!(stored.len(), 1);
        assert!(stored[0].redelivered);
    }

    #[tokio::test]
    async fn conflicting_redeclare_is_rejected() {
        let broker = InMemoryBroker::new();
        let ch = channel_with_queues(&broker).await;

        let mut conflicting = QueueName::EmailNotifications.definition();
        conflicting.max_priority = Some(3);
        assert!(matches!(
            ch.declare_queue(&conflicting).await,
            Err(BrokerError::PreconditionFailed { .. })
        ));
    }

    #[tokio::test]
    async fn refused_connections_and_unknown_queues_fail() {
        let broker = InMemoryBroker::new();
        let ch = broker.connect().await.unwrap();
        assert!(matches!(
            ch.publish(QueueName::DataExports, vec![], MessageProperties::default())
                .await,
            Err(BrokerError::QueueNotFound(_))
        ));

        broker.set_accepting(false);
        assert!(matches!(broker.connect().await, Err(BrokerError::Connect(_))));
    }
}
