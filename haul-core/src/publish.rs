//! Publishing seam between the mutation executor and the invalidation bus.

use crate::message::InvalidationMessage;

/// Something that can fan an invalidation out to sibling contexts.
///
/// Publishing is fire-and-forget: implementations must not block and must not
/// surface transport failures to the caller.
pub trait InvalidationPublisher: Send + Sync {
    fn publish(&self, message: InvalidationMessage);
}

/// Publisher for contexts with no cross-context channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalOnly;

impl InvalidationPublisher for LocalOnly {
    fn publish(&self, message: InvalidationMessage) {
        tracing::debug!(
            keys = ?message.target_keys(),
            "No cross-context channel, invalidation stays local"
        );
    }
}
