//! The per-context invalidation bus.
//!
//! A bus owns the context's listening handle and the retry chain that keeps
//! it alive. `listen()` spawns a driver task that constructs the transport,
//! retrying failures on the [`next_delay`] schedule, and then applies every
//! received payload to the local store. `publish()` is fire-and-forget on a
//! fresh handle.
//!
//! Every `listen()` and `teardown()` bumps a generation counter. A driver
//! only touches shared state while its generation is current, so at most one
//! retry chain is ever effective even if an aborted task is still unwinding.
//!
//! Both `listen()` and `publish()` spawn onto the ambient tokio runtime.

use haul_cache::CacheStore;
use haul_core::{BusConfig, InvalidationMessage, InvalidationPublisher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_stream::StreamExt;
use tracing::{debug, info};
use uuid::Uuid;

use crate::backoff::next_delay;
use crate::receive::{deliver, Delivery};
use crate::state::ChannelState;
use crate::transport::{Transport, TransportFactory};

// ============================================================================
// METRICS
// ============================================================================

/// Counters maintained by a bus.
#[derive(Debug, Default)]
pub struct BusMetrics {
    pub received: AtomicU64,
    pub applied: AtomicU64,
    pub malformed: AtomicU64,
    pub own_origin: AtomicU64,
    pub published: AtomicU64,
    pub publish_failures: AtomicU64,
    pub construction_failures: AtomicU64,
    pub heartbeats: AtomicU64,
}

impl BusMetrics {
    pub fn snapshot(&self) -> BusMetricsSnapshot {
        BusMetricsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            own_origin: self.own_origin.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            construction_failures: self.construction_failures.load(Ordering::Relaxed),
            heartbeats: self.heartbeats.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of bus metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusMetricsSnapshot {
    pub received: u64,
    pub applied: u64,
    pub malformed: u64,
    pub own_origin: u64,
    pub published: u64,
    pub publish_failures: u64,
    pub construction_failures: u64,
    pub heartbeats: u64,
}

// ============================================================================
// BUS
// ============================================================================

/// Cross-context invalidation bus for one context.
///
/// Dropping the bus tears it down.
pub struct InvalidationBus<S> {
    inner: Arc<BusInner<S>>,
}

struct BusInner<S> {
    config: BusConfig,
    store: S,
    factory: Arc<dyn TransportFactory>,
    origin: String,
    state: watch::Sender<ChannelState>,
    control: Mutex<Control>,
    metrics: BusMetrics,
}

#[derive(Default)]
struct Control {
    generation: u64,
    driver: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    transport: Option<Arc<dyn Transport>>,
}

impl Control {
    fn release(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
    }
}

impl<S> BusInner<S> {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `next` if `generation` is still current.
    fn transition(&self, generation: u64, next: ChannelState) -> bool {
        let control = self.control();
        if control.generation != generation {
            return false;
        }
        self.state.send_replace(next);
        true
    }

    fn attach(&self, generation: u64, transport: Arc<dyn Transport>) -> bool {
        let mut control = self.control();
        if control.generation != generation {
            transport.close();
            return false;
        }
        control.transport = Some(transport);
        self.state.send_replace(ChannelState::Open);
        true
    }

    fn detach(&self, generation: u64) {
        let mut control = self.control();
        if control.generation != generation {
            return;
        }
        if let Some(transport) = control.transport.take() {
            transport.close();
        }
        self.state.send_replace(ChannelState::Closed);
    }
}

impl<S: CacheStore> BusInner<S> {
    fn receive(&self, payload: &serde_json::Value) {
        self.metrics.received.fetch_add(1, Ordering::Relaxed);
        let counter = match deliver(&self.store, &self.origin, payload) {
            Delivery::Applied { .. } => &self.metrics.applied,
            Delivery::OwnOrigin => &self.metrics.own_origin,
            Delivery::Malformed => &self.metrics.malformed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl<S> InvalidationBus<S> {
    /// Identifier stamped on every message this bus publishes.
    pub fn origin(&self) -> &str {
        &self.inner.origin
    }

    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &S {
        &self.inner.store
    }

    pub fn state(&self) -> ChannelState {
        *self.inner.state.borrow()
    }

    /// Subscribe to state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.inner.state.subscribe()
    }

    pub fn heartbeats(&self) -> u64 {
        self.inner.metrics.heartbeats.load(Ordering::Relaxed)
    }

    pub fn metrics(&self) -> BusMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Stop listening, close the transport, cancel any pending retry and
    /// reset to `Absent`.
    pub fn teardown(&self) {
        let mut control = self.inner.control();
        control.generation += 1;
        control.release();
        self.inner.state.send_replace(ChannelState::Absent);
        debug!(channel = %self.inner.config.channel_name, "Invalidation bus torn down");
    }
}

impl<S: CacheStore + 'static> InvalidationBus<S> {
    pub fn new(store: S, factory: Arc<dyn TransportFactory>, config: BusConfig) -> Self {
        let (state, _) = watch::channel(ChannelState::Absent);
        Self {
            inner: Arc::new(BusInner {
                config,
                store,
                factory,
                origin: Uuid::now_v7().to_string(),
                state,
                control: Mutex::new(Control::default()),
                metrics: BusMetrics::default(),
            }),
        }
    }

    /// Start listening.
    ///
    /// A no-op while a channel is open or a retry chain is still running,
    /// including while it waits out a backoff delay. From `Absent`, `Closed`
    /// or a terminal `Error` a new chain starts at attempt zero.
    pub fn listen(&self) {
        let mut control = self.inner.control();
        let current = *self.inner.state.borrow();
        if current.is_open() || current.is_connecting() {
            return;
        }

        control.generation += 1;
        let generation = control.generation;
        control.release();
        self.inner
            .state
            .send_replace(ChannelState::Initializing { attempt: 0 });
        control.driver = Some(tokio::spawn(drive(Arc::clone(&self.inner), generation)));
        control.heartbeat = Some(tokio::spawn(heartbeat(Arc::clone(&self.inner))));
        debug!(channel = %self.inner.config.channel_name, previous = %current, "Listening for invalidations");
    }

    /// Broadcast `message` to sibling contexts.
    ///
    /// Opens a fresh handle, posts, and closes it after the configured
    /// release delay. Failures are logged and otherwise ignored.
    pub fn publish(&self, message: InvalidationMessage) {
        let message = match message.origin() {
            Some(_) => message,
            None => message.with_origin(self.inner.origin.clone()),
        };
        let channel = &self.inner.config.channel_name;

        let transport = match self.inner.factory.open(channel) {
            Ok(transport) => transport,
            Err(err) => {
                self.inner.metrics.publish_failures.fetch_add(1, Ordering::Relaxed);
                debug!(channel = %channel, error = %err, "Publish skipped, transport unavailable");
                return;
            }
        };

        match transport.post(message.to_wire()) {
            Ok(()) => {
                self.inner.metrics.published.fetch_add(1, Ordering::Relaxed);
                debug!(
                    channel = %channel,
                    keys = ?message.target_keys(),
                    correlation_id = message.correlation_id().unwrap_or("-"),
                    "Published invalidation"
                );
            }
            Err(err) => {
                self.inner.metrics.publish_failures.fetch_add(1, Ordering::Relaxed);
                debug!(channel = %channel, error = %err, "Publish failed");
            }
        }

        let release = self.inner.config.publish_release();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    tokio::time::sleep(release).await;
                    transport.close();
                });
            }
            Err(_) => transport.close(),
        }
    }
}

impl<S: CacheStore + 'static> InvalidationPublisher for InvalidationBus<S> {
    fn publish(&self, message: InvalidationMessage) {
        InvalidationBus::publish(self, message)
    }
}

impl<S> Drop for InvalidationBus<S> {
    fn drop(&mut self) {
        self.teardown();
    }
}

// ============================================================================
// BACKGROUND TASKS
// ============================================================================

async fn drive<S: CacheStore + 'static>(inner: Arc<BusInner<S>>, generation: u64) {
    let channel = inner.config.channel_name.clone();
    let mut attempt: u32 = 0;

    loop {
        if !inner.transition(generation, ChannelState::Initializing { attempt }) {
            return;
        }

        match inner.factory.open(&channel) {
            Ok(transport) => {
                let mut payloads = transport.subscribe();
                if !inner.attach(generation, transport) {
                    return;
                }
                info!(channel = %channel, attempts = attempt + 1, "Invalidation channel open");

                while let Some(payload) = payloads.next().await {
                    inner.receive(&payload);
                }

                debug!(channel = %channel, "Invalidation channel stopped delivering");
                inner.detach(generation);
                return;
            }
            Err(err) => {
                inner
                    .metrics
                    .construction_failures
                    .fetch_add(1, Ordering::Relaxed);
                let failures = attempt.saturating_add(1);
                debug!(channel = %channel, attempt = failures, error = %err, "Invalidation channel construction failed");

                if failures >= inner.config.max_retry_attempts {
                    debug!(
                        channel = %channel,
                        attempts = failures,
                        "Giving up on invalidation channel until the next listen"
                    );
                    inner.transition(
                        generation,
                        ChannelState::Error {
                            attempts: failures,
                            retry_in: None,
                        },
                    );
                    return;
                }

                let delay = next_delay(attempt, &inner.config);
                let waiting = ChannelState::Error {
                    attempts: failures,
                    retry_in: Some(delay),
                };
                if !inner.transition(generation, waiting) {
                    return;
                }
                tokio::time::sleep(delay).await;
                attempt = failures;
            }
        }
    }
}

async fn heartbeat<S>(inner: Arc<BusInner<S>>) {
    let mut ticker = interval(inner.config.heartbeat_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let beats = inner.metrics.heartbeats.fetch_add(1, Ordering::Relaxed) + 1;
        let state = *inner.state.borrow();
        debug!(channel = %inner.config.channel_name, state = %state, beats, "Invalidation bus heartbeat");
    }
}

// ============================================================================
// TESTS
// ============================================================================
