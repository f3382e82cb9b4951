//! Haul walkthrough.
//!
//! Two contexts share one broadcast hub and one pretend server. The first
//! context commits an order update and then attempts a rejected one; the
//! second context picks up the committed change through the invalidation bus
//! and its refetch worker.

use async_trait::async_trait;
use haul_bus::{BroadcastHub, ChannelState, InvalidationBus};
use haul_cache::{CacheStore, InMemoryCacheStore, Observer, QueryFetcher, RefetchQueue, RefetchWorker};
use haul_core::{CacheError, HaulConfig, HaulError, QueryKey, RawError};
use haul_mutation::{
    ErrorSinks, FieldMessage, FormErrorSink, MutationError, MutationExecutor, MutationRequest,
    Notification, NotificationSink, Severity,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const ORDER_KEY: &str = "order-1";

#[derive(Debug, Error)]
enum DemoError {
    #[error(transparent)]
    Haul(#[from] HaulError),

    #[error(transparent)]
    Mutation(#[from] MutationError),

    #[error("Failed to init subscriber: {0}")]
    Subscriber(String),

    #[error("Bus for {context} stopped before opening")]
    BusNeverOpened { context: &'static str },
}

// ============================================================================
// PRETEND SERVER
// ============================================================================

#[derive(Default)]
struct OrderServer {
    records: Mutex<HashMap<QueryKey, Value>>,
}

impl OrderServer {
    fn seed(&self, key: &QueryKey, value: Value) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), value);
    }

    fn read(&self, key: &QueryKey) -> Option<Value> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Merge `changes` into the stored order, enforcing one business rule.
    fn update(&self, key: &QueryKey, changes: Value) -> Result<Value, RawError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(record) = records.get_mut(key) else {
            return Err(RawError::with_body(404, json!({"type": "not-found", "detail": "Order not found"})));
        };

        if record["status"] == "DONE" && changes["status"] == "CANCELLED" {
            return Err(RawError::with_body(
                422,
                json!({
                    "type": "business-rule-violation",
                    "detail": "Delivered orders cannot be cancelled"
                }),
            ));
        }

        if let (Some(target), Some(changes)) = (record.as_object_mut(), changes.as_object()) {
            for (field, value) in changes {
                target.insert(field.clone(), value.clone());
            }
            let version = target.get("version").and_then(Value::as_u64).unwrap_or(0);
            target.insert("version".to_string(), json!(version + 1));
        }
        Ok(record.clone())
    }
}

#[async_trait]
impl QueryFetcher for OrderServer {
    async fn fetch(&self, key: &QueryKey) -> Result<Option<Value>, CacheError> {
        Ok(self.read(key))
    }
}

// ============================================================================
// SINKS
// ============================================================================

struct LogSink {
    context: &'static str,
}

impl NotificationSink for LogSink {
    fn notify(&self, notification: Notification) {
        match notification.severity {
            Severity::Error | Severity::Warning => warn!(
                context = self.context,
                title = %notification.title,
                "{}",
                notification.message
            ),
            Severity::Success | Severity::Info => info!(
                context = self.context,
                title = %notification.title,
                "{}",
                notification.message
            ),
        }
    }
}

impl FormErrorSink for LogSink {
    fn set_field_error(&self, path: &str, message: FieldMessage) {
        warn!(context = self.context, field = path, kind = %message.kind, "{}", message.message);
    }

    fn clear_errors(&self) {}
}

// ============================================================================
// CONTEXTS
// ============================================================================

struct Context {
    name: &'static str,
    store: InMemoryCacheStore,
    bus: Arc<InvalidationBus<InMemoryCacheStore>>,
    worker: JoinHandle<()>,
    _views: Vec<Observer>,
}

impl Context {
    async fn open(
        name: &'static str,
        config: &HaulConfig,
        hub: &BroadcastHub,
        server: &Arc<OrderServer>,
    ) -> Result<Self, DemoError> {
        let (queue, receiver) = RefetchQueue::new(config.cache.refetch_queue_capacity);
        let store = InMemoryCacheStore::new(Arc::new(queue));
        let worker = RefetchWorker::new(receiver, Arc::new(store.clone()), Arc::clone(server)).spawn();

        let key = QueryKey::from(ORDER_KEY);
        if let Some(value) = server.read(&key) {
            store.set(&key, value);
        }
        let views = vec![store.observe(&key)];

        let bus = Arc::new(InvalidationBus::new(
            store.clone(),
            Arc::new(hub.clone()),
            config.bus.clone(),
        ));
        bus.listen();
        bus.watch_state()
            .wait_for(ChannelState::is_open)
            .await
            .map_err(|_| DemoError::BusNeverOpened { context: name })?;

        Ok(Self {
            name,
            store,
            bus,
            worker,
            _views: views,
        })
    }

    fn sinks(&self) -> ErrorSinks {
        let sink = Arc::new(LogSink { context: self.name });
        ErrorSinks::new(sink.clone()).with_form(sink)
    }

    fn show(&self, label: &str) {
        let key = QueryKey::from(ORDER_KEY);
        let value = self.store.get(&key).unwrap_or(serde_json::Value::Null);
        info!(
            context = self.name,
            stale = self.store.is_stale(&key),
            value = %value,
            "{label}"
        );
    }

    fn close(self) {
        self.bus.teardown();
        self.worker.abort();
        info!(context = self.name, metrics = ?self.bus.metrics(), stats = ?self.store.stats(), "Context closed");
    }
}

/// Speculate by copying the requested status onto the cached order.
fn apply_status(vars: &Value, current: Option<&Value>) -> Option<Value> {
    let mut next = current.cloned()?;
    let status = vars.get("status")?.clone();
    next.as_object_mut()?.insert("status".to_string(), status);
    Some(next)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::main]
async fn main() -> Result<(), DemoError> {
    let config = HaulConfig::load().map_err(HaulError::from)?;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("haul_core=debug,haul_cache=debug,haul_bus=debug,haul_mutation=debug,haul_demo=debug,info")
    });
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| DemoError::Subscriber(e.to_string()))?;

    let server = Arc::new(OrderServer::default());
    let key = QueryKey::from(ORDER_KEY);
    server.seed(&key, json!({"id": 1, "status": "NEW", "version": 1}));

    let hub = BroadcastHub::default();
    let dispatch = Context::open("dispatch", &config, &hub, &server).await?;
    let tracking = Context::open("tracking", &config, &hub, &server).await?;
    info!(channel = %config.bus.channel_name, "Both contexts listening");

    let executor = MutationExecutor::new(dispatch.store.clone(), dispatch.bus.clone());

    // A write the server accepts.
    let writer = Arc::clone(&server);
    let handle = executor.execute(
        MutationRequest::new("order", ORDER_KEY, json!({"status": "DONE"}))
            .with_transform(apply_status)
            .with_success_message("Order updated successfully"),
        dispatch.sinks(),
        move |vars| async move { writer.update(&QueryKey::from(ORDER_KEY), vars) },
    )?;
    dispatch.show("Speculative value");
    let committed = handle.outcome().await?;
    info!(response = %committed, "Write committed");
    settle().await;
    dispatch.show("After commit");
    tracking.show("Sibling after invalidation");

    // A write the server rejects.
    let writer = Arc::clone(&server);
    let handle = executor.execute(
        MutationRequest::new("order", ORDER_KEY, json!({"status": "CANCELLED"})).with_transform(apply_status),
        dispatch.sinks(),
        move |vars| async move { writer.update(&QueryKey::from(ORDER_KEY), vars) },
    )?;
    dispatch.show("Speculative value");
    match handle.outcome().await {
        Ok(response) => warn!(response = %response, "Rejected write unexpectedly committed"),
        Err(err) => error!(error = %err, "Write rolled back"),
    }
    settle().await;
    dispatch.show("After rollback");
    tracking.show("Sibling unchanged");

    dispatch.close();
    tracking.close();
    Ok(())
}
