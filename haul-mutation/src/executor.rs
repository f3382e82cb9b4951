//! The optimistic mutation executor.
//!
//! `Idle → Speculating → Sent → {Committed | RolledBack} → Settled`
//!
//! Speculation happens synchronously inside [`MutationExecutor::execute`], so
//! readers see the speculative value before the write is issued. Refetch
//! results for the key are held off from speculation until settlement, so
//! a refetch that is already in flight cannot overwrite the speculative value.
//! The rest of the lifecycle runs on a spawned task owned by the executor;
//! dropping the returned [`MutationHandle`] never cancels the write or the
//! reconciliation. A write that panics is rolled back like any other failure.

use chrono::Utc;
use haul_cache::{CacheStore, InvalidateOptions};
use haul_core::{
    classify, correlation_id, Classification, InvalidationMessage, InvalidationPublisher, QueryKey,
    RawError, RefetchScope,
};
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::report::{ErrorReporter, ReportSummary};
use crate::request::{MutationContext, MutationRequest, Speculation};
use crate::sink::{ErrorSinks, Notification, Severity};

/// Mutation errors.
#[derive(Debug, Error)]
pub enum MutationError {
    #[error("Mutation already in flight for {key}")]
    KeyBusy { key: QueryKey },

    #[error("Write for {key} failed: {source}")]
    WriteFailed {
        key: QueryKey,
        source: RawError,
        classification: Classification,
        report: ReportSummary,
    },

    #[error("Mutation task for {key} ended without an outcome")]
    Abandoned { key: QueryKey },
}

/// Result type alias for mutation outcomes.
pub type MutationResult<T> = Result<T, MutationError>;

// ============================================================================
// IN-FLIGHT REGISTRY
// ============================================================================

type InFlight = Arc<Mutex<HashSet<QueryKey>>>;

fn lock(in_flight: &InFlight) -> MutexGuard<'_, HashSet<QueryKey>> {
    in_flight.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Exclusive claim on a key; released on drop.
struct KeyClaim {
    key: QueryKey,
    in_flight: InFlight,
}

impl KeyClaim {
    fn acquire(in_flight: &InFlight, key: &QueryKey) -> Option<Self> {
        lock(in_flight).insert(key.clone()).then(|| Self {
            key: key.clone(),
            in_flight: Arc::clone(in_flight),
        })
    }
}

impl Drop for KeyClaim {
    fn drop(&mut self) {
        lock(&self.in_flight).remove(&self.key);
    }
}

/// Keeps refetch results for a key out of the store until released.
struct RefetchHold<S: CacheStore> {
    store: S,
    key: QueryKey,
    released: bool,
}

impl<S: CacheStore> RefetchHold<S> {
    fn acquire(store: S, key: &QueryKey) -> Self {
        store.hold_refetches(key);
        Self {
            store,
            key: key.clone(),
            released: false,
        }
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.store.release_refetches(&self.key);
        }
    }
}

impl<S: CacheStore> Drop for RefetchHold<S> {
    fn drop(&mut self) {
        self.release();
    }
}

// ============================================================================
// HANDLE
// ============================================================================

/// A view of a running mutation.
#[derive(Debug)]
pub struct MutationHandle {
    key: QueryKey,
    context: MutationContext,
    outcome: oneshot::Receiver<MutationResult<Value>>,
}

impl MutationHandle {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Snapshot captured while speculating.
    pub fn context(&self) -> &MutationContext {
        &self.context
    }

    /// Wait for settlement: the server response on success.
    pub async fn outcome(self) -> MutationResult<Value> {
        match self.outcome.await {
            Ok(result) => result,
            Err(_) => Err(MutationError::Abandoned { key: self.key }),
        }
    }
}

// ============================================================================
// EXECUTOR
// ============================================================================

/// Runs optimistic writes against one context's cache.
pub struct MutationExecutor<S> {
    store: S,
    publisher: Arc<dyn InvalidationPublisher>,
    reporter: ErrorReporter,
    in_flight: InFlight,
}

impl<S: CacheStore + Clone + 'static> MutationExecutor<S> {
    pub fn new(store: S, publisher: Arc<dyn InvalidationPublisher>) -> Self {
        Self {
            store,
            publisher,
            reporter: ErrorReporter,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn is_in_flight(&self, key: &QueryKey) -> bool {
        lock(&self.in_flight).contains(key)
    }

    /// Start a mutation.
    ///
    /// Fails immediately with [`MutationError::KeyBusy`] if another mutation
    /// on the same key has not settled. Must be called within a tokio
    /// runtime.
    pub fn execute<W, Fut>(
        &self,
        request: MutationRequest,
        sinks: ErrorSinks,
        write: W,
    ) -> MutationResult<MutationHandle>
    where
        W: FnOnce(Value) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, RawError>> + Send + 'static,
    {
        let MutationRequest {
            resource,
            key,
            variables,
            speculation,
            broadcast,
            related,
            success_message,
        } = request;

        let claim = KeyClaim::acquire(&self.in_flight, &key)
            .ok_or_else(|| MutationError::KeyBusy { key: key.clone() })?;

        let hold = RefetchHold::acquire(self.store.clone(), &key);
        let context = self.speculate(&key, &variables, speculation);
        debug!(resource = %resource, key = %key, speculated = context.speculated(), "Mutation started");

        let (tx, rx) = oneshot::channel();
        let task = Settle {
            store: self.store.clone(),
            publisher: Arc::clone(&self.publisher),
            reporter: self.reporter,
            resource,
            key: key.clone(),
            context: context.clone(),
            broadcast: InvalidationMessage::new([key.token()])
                .with_match_mode(broadcast.mode)
                .with_refetch_scope(broadcast.scope),
            related,
            success_message,
            sinks,
            hold,
        };

        let write = tokio::spawn(async move { write(variables).await });
        tokio::spawn(async move {
            let result = task.run(write).await;
            drop(claim);
            // The caller may have dropped its handle.
            let _ = tx.send(result);
        });

        Ok(MutationHandle {
            key,
            context,
            outcome: rx,
        })
    }

    fn speculate(&self, key: &QueryKey, variables: &Value, speculation: Speculation) -> MutationContext {
        let previous = self.store.get(key);
        let applied = match speculation {
            Speculation::Variables => Some(variables.clone()),
            Speculation::Transform(transform) => transform(variables, previous.as_ref()),
            Speculation::Skip => None,
        };
        if let Some(value) = &applied {
            self.store.set(key, value.clone());
        }
        MutationContext { previous, applied }
    }
}

/// Everything the spawned half of a mutation owns.
struct Settle<S: CacheStore> {
    store: S,
    publisher: Arc<dyn InvalidationPublisher>,
    reporter: ErrorReporter,
    resource: String,
    key: QueryKey,
    context: MutationContext,
    broadcast: InvalidationMessage,
    related: Vec<QueryKey>,
    success_message: Option<String>,
    sinks: ErrorSinks,
    hold: RefetchHold<S>,
}

impl<S: CacheStore> Settle<S> {
    async fn run(mut self, write: JoinHandle<Result<Value, RawError>>) -> MutationResult<Value> {
        let outcome = match write.await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(resource = %self.resource, key = %self.key, error = %err, "Write task did not complete");
                Err(RawError::network(format!("Write did not complete: {}", err)))
            }
        };

        let result = match outcome {
            Ok(response) => {
                self.commit();
                Ok(response)
            }
            Err(raw) => Err(self.roll_back(raw)),
        };

        // Settle: the speculative or restored value is never final.
        self.hold.release();
        self.store.refetch(&self.key);
        result
    }

    fn commit(&self) {
        let correlation = correlation_id(&self.resource, Utc::now());
        info!(resource = %self.resource, key = %self.key, correlation_id = %correlation, "Mutation committed");

        self.publisher
            .publish(self.broadcast.clone().with_correlation_id(correlation));

        for related in &self.related {
            self.store
                .invalidate(&[related.token()], InvalidateOptions::exact(RefetchScope::All));
        }

        if let Some(form) = &self.sinks.form {
            form.clear_errors();
        }
        if let Some(message) = &self.success_message {
            self.sinks.notifier.notify(Notification::new(
                Severity::Success,
                "Changes have been saved",
                message.clone(),
            ));
        }
    }

    fn roll_back(&self, raw: RawError) -> MutationError {
        if self.context.speculated() {
            match &self.context.previous {
                Some(previous) => self.store.set(&self.key, previous.clone()),
                None => {
                    self.store.remove(&self.key);
                }
            }
        }

        let classification = classify(&raw);
        let report = self.reporter.report(&classification, &self.sinks);
        info!(
            resource = %self.resource,
            key = %self.key,
            status = ?raw.status,
            tags = classification.tags().len(),
            "Mutation rolled back"
        );

        MutationError::WriteFailed {
            key: self.key.clone(),
            source: raw,
            classification,
            report,
        }
    }
}
