//! In-process broadcast hub.
//!
//! Each channel name maps to one `tokio::sync::broadcast` channel. Every
//! handle gets its own id and never receives its own posts, matching the
//! semantics of a browser broadcast channel.

use haul_core::TransportError;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::debug;
use uuid::Uuid;

use crate::transport::{PayloadStream, Transport, TransportFactory};

/// Default per-channel buffer.
pub const DEFAULT_HUB_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct Envelope {
    sender: Uuid,
    payload: Value,
}

/// Shared medium connecting every context in the process.
#[derive(Clone)]
pub struct BroadcastHub {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<Envelope>>>>,
    capacity: usize,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_HUB_CAPACITY)
    }
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Open a concrete handle on `channel`.
    pub fn handle(&self, channel: &str) -> Result<HubTransport, TransportError> {
        if channel.is_empty() {
            return Err(TransportError::ConstructionFailed {
                channel: channel.to_string(),
                reason: "channel name must not be empty".to_string(),
            });
        }
        let sender = {
            let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
            channels
                .entry(channel.to_string())
                .or_insert_with(|| broadcast::channel(self.capacity).0)
                .clone()
        };
        Ok(HubTransport {
            id: Uuid::now_v7(),
            channel: channel.to_string(),
            sender,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Number of live subscriptions on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(channel)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

impl TransportFactory for BroadcastHub {
    fn open(&self, channel: &str) -> Result<Arc<dyn Transport>, TransportError> {
        Ok(Arc::new(self.handle(channel)?))
    }
}

/// One handle on a hub channel.
pub struct HubTransport {
    id: Uuid,
    channel: String,
    sender: broadcast::Sender<Envelope>,
    closed: Arc<AtomicBool>,
}

impl HubTransport {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Transport for HubTransport {
    fn channel(&self) -> &str {
        &self.channel
    }

    fn post(&self, payload: Value) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed {
                channel: self.channel.clone(),
            });
        }
        // No receivers is not an error: nobody else is listening yet.
        let _ = self.sender.send(Envelope {
            sender: self.id,
            payload,
        });
        Ok(())
    }

    fn subscribe(&self) -> PayloadStream {
        let own = self.id;
        let closed = Arc::clone(&self.closed);
        let channel = self.channel.clone();
        let stream = BroadcastStream::new(self.sender.subscribe())
            .take_while(move |_| !closed.load(Ordering::Acquire))
            .filter_map(move |result| match result {
                Ok(envelope) if envelope.sender != own => Some(envelope.payload),
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    debug!(channel = %channel, skipped, "Hub subscriber lagged");
                    None
                }
            });
        Box::pin(stream)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
