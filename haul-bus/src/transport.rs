//! Cross-context transport abstraction.
//!
//! A transport is a named, same-origin medium that carries JSON payloads
//! between contexts. Payloads are plain values, so everything that crosses
//! the boundary is a deep copy with no shared references.

use haul_core::TransportError;
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;

/// Stream of payloads delivered to one transport handle.
pub type PayloadStream = Pin<Box<dyn Stream<Item = Value> + Send>>;

/// An open handle on a named channel.
pub trait Transport: Send + Sync {
    /// Channel name this handle was opened on.
    fn channel(&self) -> &str;

    /// Post a payload to every other handle on the channel.
    fn post(&self, payload: Value) -> Result<(), TransportError>;

    /// Payloads posted by other handles from now on.
    fn subscribe(&self) -> PayloadStream;

    /// Release the handle. Further posts fail with `TransportError::Closed`.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Opens transport handles.
///
/// Construction is synchronous and may fail; the bus retries failures on its
/// backoff schedule.
pub trait TransportFactory: Send + Sync {
    fn open(&self, channel: &str) -> Result<Arc<dyn Transport>, TransportError>;
}

impl<T: TransportFactory + ?Sized> TransportFactory for Arc<T> {
    fn open(&self, channel: &str) -> Result<Arc<dyn Transport>, TransportError> {
        (**self).open(channel)
    }
}
