//! Refetch scheduling.
//!
//! Invalidation never fetches inline. The store hands keys to a
//! [`RefetchScheduler`]; the default [`RefetchQueue`] buffers them for a
//! [`RefetchWorker`], which pulls fresh values through a [`QueryFetcher`] and
//! writes them back, clearing the stale flag. A result is dropped if the key
//! was written or held after the fetch started.

use async_trait::async_trait;
use haul_core::{CacheError, QueryKey};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::store::CacheStore;

/// Receives keys that need a fresh server read.
pub trait RefetchScheduler: Send + Sync {
    fn schedule(&self, key: &QueryKey) -> Result<(), CacheError>;
}

/// Fetches the server's current view of a query.
///
/// `Ok(None)` means the resource no longer exists and the entry is dropped.
#[async_trait]
pub trait QueryFetcher: Send + Sync {
    async fn fetch(&self, key: &QueryKey) -> Result<Option<Value>, CacheError>;
}

/// Bounded queue feeding a [`RefetchWorker`].
#[derive(Debug, Clone)]
pub struct RefetchQueue {
    tx: mpsc::Sender<QueryKey>,
}

/// Receiving half of a [`RefetchQueue`].
#[derive(Debug)]
pub struct RefetchReceiver {
    rx: mpsc::Receiver<QueryKey>,
}

impl RefetchQueue {
    pub fn new(capacity: usize) -> (Self, RefetchReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, RefetchReceiver { rx })
    }
}

impl RefetchScheduler for RefetchQueue {
    fn schedule(&self, key: &QueryKey) -> Result<(), CacheError> {
        self.tx.try_send(key.clone()).map_err(|err| match err {
            mpsc::error::TrySendError::Full(key) => CacheError::RefetchQueueFull { key },
            mpsc::error::TrySendError::Closed(key) => CacheError::RefetchQueueClosed { key },
        })
    }
}

impl RefetchReceiver {
    pub async fn recv(&mut self) -> Option<QueryKey> {
        self.rx.recv().await
    }
}

/// Drains a [`RefetchQueue`] into a store.
pub struct RefetchWorker<S, F> {
    receiver: RefetchReceiver,
    store: Arc<S>,
    fetcher: Arc<F>,
}

impl<S, F> RefetchWorker<S, F>
where
    S: CacheStore + 'static,
    F: QueryFetcher + 'static,
{
    pub fn new(receiver: RefetchReceiver, store: Arc<S>, fetcher: Arc<F>) -> Self {
        Self {
            receiver,
            store,
            fetcher,
        }
    }

    /// Process queued refetches until the queue closes.
    pub async fn run(mut self) {
        while let Some(key) = self.receiver.recv().await {
            self.refresh(&key).await;
        }
        debug!("Refetch queue closed, worker exiting");
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn refresh(&self, key: &QueryKey) {
        let ticket = self.store.refetch_ticket();
        match self.fetcher.fetch(key).await {
            Ok(fetched) => {
                let found = fetched.is_some();
                if !self.store.apply_refetch(key, fetched, ticket) {
                    debug!(key = %key, "Discarded superseded refetch");
                } else if found {
                    debug!(key = %key, "Refetched query");
                } else {
                    debug!(key = %key, "Query no longer exists, dropping entry");
                }
            }
            Err(err) => {
                // Entry stays stale; the next invalidation or read retries.
                warn!(key = %key, error = %err, "Refetch failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_delivers_in_order() {
        let (queue, mut rx) = RefetchQueue::new(4);
        queue.schedule(&QueryKey::from("a")).unwrap();
        queue.schedule(&QueryKey::from("b")).unwrap();
        assert_eq!(rx.recv().await, Some(QueryKey::from("a")));
        assert_eq!(rx.recv().await, Some(QueryKey::from("b")));
    }

    #[test]
    fn test_queue_full_reports_key() {
        let (queue, _rx) = RefetchQueue::new(1);
        queue.schedule(&QueryKey::from("a")).unwrap();
        assert_eq!(
            queue.schedule(&QueryKey::from("b")),
            Err(CacheError::RefetchQueueFull {
                key: QueryKey::from("b")
            })
        );
    }

    #[test]
    fn test_queue_closed_reports_key() {
        let (queue, rx) = RefetchQueue::new(1);
        drop(rx);
        assert!(matches!(
            queue.schedule(&QueryKey::from("a")),
            Err(CacheError::RefetchQueueClosed { .. })
        ));
    }
}
