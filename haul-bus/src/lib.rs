//! Haul Bus - Cross-Context Invalidation
//!
//! Keeps one self-healing listening channel per context and applies received
//! invalidations to that context's cache store.
//!
//! - [`InvalidationBus`]: `listen`/`publish`/`teardown` and channel state
//! - [`ChannelState`]: explicit lifecycle, observable through a watch channel
//! - [`BroadcastHub`]: in-process medium shared by every context
//! - [`next_delay`]: the pure reconnect backoff policy

pub mod backoff;
pub mod bus;
pub mod hub;
pub mod receive;
pub mod state;
pub mod transport;

pub use backoff::{delay_schedule, next_delay};
pub use bus::{BusMetrics, BusMetricsSnapshot, InvalidationBus};
pub use hub::{BroadcastHub, HubTransport, DEFAULT_HUB_CAPACITY};
pub use receive::{deliver, Delivery};
pub use state::ChannelState;
pub use transport::{PayloadStream, Transport, TransportFactory};
