//! Broker connection manager.
//!
//! [`BrokerClient`] owns the process's single broker channel and hands out
//! clones of it to the publisher and the consumer dispatcher.
//!
//! ## Design
//!
//! - **Lazy, single-flight establishment**: [`BrokerClient::channel`] returns
//!   the current channel when it is open; otherwise one caller connects while
//!   the others wait on an async guard and reuse the outcome.
//! - **Topology before use**: a channel is only stored (and the phase only
//!   becomes `Ready`) after [`Topology::declare`] succeeded on it.
//! - **Self-healing**: a monitor task watches each channel; when it closes the
//!   phase drops to `Absent` and a reconnect is scheduled with
//!   [`ReconnectPolicy`] backoff. Failed attempts schedule the next one.
//!   Retries never give up; after `alert_after` consecutive failures they are
//!   logged at error level.
//! - **Explicit ownership**: the client is created by the composition root and
//!   cloned (cheap `Arc`) into every collaborator. There is no global state.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::ReconnectPolicy;
use crate::error::{BrokerError, QueueError};
use crate::topology::Topology;
use crate::transport::{BrokerChannel, Transport};

/// Connection lifecycle as observed by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionPhase {
    /// No usable channel.
    Absent,
    /// An establishment attempt is in progress.
    Connecting,
    /// A channel is open and the topology is declared on it.
    Ready,
}

impl ConnectionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionPhase::Absent => "absent",
            ConnectionPhase::Connecting => "connecting",
            ConnectionPhase::Ready => "ready",
        }
    }
}

impl std::fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Established<C> {
    channel: C,
    generation: u64,
}

struct Inner<T: Transport> {
    transport: T,
    topology: Topology,
    policy: ReconnectPolicy,
    slot: Mutex<Option<Established<T::Channel>>>,
    phase: watch::Sender<ConnectionPhase>,
    connect_guard: tokio::sync::Mutex<()>,
    attempts: AtomicU32,
    failures: AtomicU32,
    retry_pending: AtomicBool,
    generation: AtomicU64,
    shutdown: CancellationToken,
}

impl<T: Transport> Inner<T> {
    fn current(&self) -> Option<T::Channel> {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.as_ref()
            .filter(|e| e.channel.is_open())
            .map(|e| e.channel.clone())
    }

    fn take_slot(&self) -> Option<Established<T::Channel>> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Clear the slot if it still holds channel `generation`.
    fn clear_if_current(&self, generation: u64) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            Some(e) if e.generation == generation => {
                *slot = None;
                self.phase.send_replace(ConnectionPhase::Absent);
                true
            }
            _ => false,
        }
    }
}

/// Shared handle to the broker connection.
pub struct BrokerClient<T: Transport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for BrokerClient<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> std::fmt::Debug for BrokerClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerClient")
            .field("endpoint", &self.inner.transport.endpoint())
            .field("phase", &self.phase())
            .field("attempts", &self.attempts())
            .finish()
    }
}

impl<T: Transport> BrokerClient<T> {
    pub fn new(transport: T, topology: Topology, policy: ReconnectPolicy) -> Self {
        let (phase, _) = watch::channel(ConnectionPhase::Absent);
        Self {
            inner: Arc::new(Inner {
                transport,
                topology,
                policy,
                slot: Mutex::new(None),
                phase,
                connect_guard: tokio::sync::Mutex::new(()),
                attempts: AtomicU32::new(0),
                failures: AtomicU32::new(0),
                retry_pending: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    fn from_inner(inner: Arc<Inner<T>>) -> Self {
        Self { inner }
    }

    pub fn phase(&self) -> ConnectionPhase {
        *self.inner.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<ConnectionPhase> {
        self.inner.phase.subscribe()
    }

    /// Establishment attempts made so far (successful or not).
    pub fn attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Failed attempts since the last successful establishment.
    pub fn consecutive_failures(&self) -> u32 {
        self.inner.failures.load(Ordering::SeqCst)
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.inner.policy
    }

    pub fn topology(&self) -> &Topology {
        &self.inner.topology
    }

    pub fn endpoint(&self) -> String {
        self.inner.transport.endpoint()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Return a ready channel, establishing one if needed.
    pub async fn channel(&self) -> Result<T::Channel, QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        if let Some(channel) = self.inner.current() {
            return Ok(channel);
        }

        let seen = self.attempts();
        let _guard = self.inner.connect_guard.lock().await;

        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        if let Some(channel) = self.inner.current() {
            return Ok(channel);
        }
        if self.attempts() != seen {
            // Someone else attempted while we waited and did not succeed.
            return Err(QueueError::Unavailable);
        }

        match self.establish().await {
            Ok(channel) => Ok(channel),
            Err(e) => {
                self.schedule_reconnect();
                Err(e)
            }
        }
    }

    /// Start establishing in the background; failures only schedule retries.
    pub fn warm(&self) {
        let client = self.clone();
        tokio::spawn(async move {
            if let Err(e) = client.channel().await {
                warn!(error = %e, "broker warm-up failed; retry scheduled");
            }
        });
    }

    /// Stop retrying and close the channel and its connection.
    pub async fn close(&self) {
        self.inner.shutdown.cancel();
        let _guard = self.inner.connect_guard.lock().await;

        if let Some(established) = self.inner.take_slot() {
            if let Err(e) = established.channel.close().await {
                warn!(error = %e, "error closing broker channel");
            }
        }
        self.inner.phase.send_replace(ConnectionPhase::Absent);
        info!(endpoint = %self.endpoint(), "broker client closed");
    }

    /// Caller must hold the connect guard.
    async fn establish(&self) -> Result<T::Channel, QueueError> {
        let inner = &self.inner;
        let attempt = inner.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        inner.phase.send_replace(ConnectionPhase::Connecting);

        if let Some(stale) = inner.take_slot() {
            if let Err(e) = stale.channel.close().await {
                debug!(error = %e, "closing stale channel failed");
            }
        }

        debug!(endpoint = %self.endpoint(), attempt, "connecting to broker");
        match self.open_and_declare().await {
            Ok(channel) => {
                if self.is_closed() {
                    let _ = channel.close().await;
                    inner.phase.send_replace(ConnectionPhase::Absent);
                    return Err(QueueError::Closed);
                }

                inner.failures.store(0, Ordering::SeqCst);
                let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
                *inner.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(Established {
                    channel: channel.clone(),
                    generation,
                });
                inner.phase.send_replace(ConnectionPhase::Ready);
                info!(endpoint = %self.endpoint(), attempt, generation, "broker channel ready");

                self.spawn_monitor(channel.clone(), generation);
                Ok(channel)
            }
            Err(e) => {
                let failures = inner.failures.fetch_add(1, Ordering::SeqCst) + 1;
                inner.phase.send_replace(ConnectionPhase::Absent);
                if inner.policy.should_alert(failures) {
                    error!(
                        endpoint = %self.endpoint(),
                        error = %e,
                        consecutive_failures = failures,
                        "broker still unreachable"
                    );
                } else {
                    warn!(
                        endpoint = %self.endpoint(),
                        error = %e,
                        consecutive_failures = failures,
                        "broker connection failed"
                    );
                }
                Err(e.into())
            }
        }
    }

    async fn open_and_declare(&self) -> Result<T::Channel, BrokerError> {
        let channel = self.inner.transport.connect().await?;
        if let Err(e) = self.inner.topology.declare(&channel).await {
            let _ = channel.close().await;
            return Err(e);
        }
        Ok(channel)
    }

    fn spawn_monitor(&self, channel: T::Channel, generation: u64) {
        let weak: Weak<Inner<T>> = Arc::downgrade(&self.inner);
        let shutdown = self.inner.shutdown.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = channel.closed() => {}
                _ = shutdown.cancelled() => return,
            }

            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.clear_if_current(generation) {
                warn!(generation, "broker channel closed; reconnect scheduled");
                BrokerClient::from_inner(inner).schedule_reconnect();
            }
        });
    }

    /// At most one pending retry at a time.
    fn schedule_reconnect(&self) {
        if self.is_closed() || self.inner.retry_pending.swap(true, Ordering::SeqCst) {
            return;
        }

        let failures = self.consecutive_failures().max(1);
        let delay = self.inner.policy.delay_for_attempt(failures);
        let weak: Weak<Inner<T>> = Arc::downgrade(&self.inner);
        let shutdown = self.inner.shutdown.clone();
        debug!(delay_ms = delay.as_millis() as u64, "broker reconnect scheduled");

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => return,
            }

            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.retry_pending.store(false, Ordering::SeqCst);
            if let Err(e) = BrokerClient::from_inner(inner).channel().await {
                debug!(error = %e, "scheduled reconnect failed");
            }
        });
    }
}
