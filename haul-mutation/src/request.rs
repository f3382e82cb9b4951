//! Mutation requests.

use haul_core::{MatchMode, QueryKey, RefetchScope};
use serde_json::Value;
use std::fmt;

/// Computes the speculative value from the variables and the cached value.
///
/// Returning `None` leaves the cache untouched.
pub type OptimisticTransform = Box<dyn FnOnce(&Value, Option<&Value>) -> Option<Value> + Send>;

/// How the executor writes ahead of the server.
pub enum Speculation {
    /// Cache the variables themselves.
    Variables,
    Transform(OptimisticTransform),
    /// No speculative write.
    Skip,
}

impl fmt::Debug for Speculation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speculation::Variables => f.write_str("Variables"),
            Speculation::Transform(_) => f.write_str("Transform(..)"),
            Speculation::Skip => f.write_str("Skip"),
        }
    }
}

/// Match mode and refetch scope of the broadcast sent on success.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastConfig {
    pub mode: MatchMode,
    pub scope: RefetchScope,
}

/// One optimistic write.
#[derive(Debug)]
pub struct MutationRequest {
    pub(crate) resource: String,
    pub(crate) key: QueryKey,
    pub(crate) variables: Value,
    pub(crate) speculation: Speculation,
    pub(crate) broadcast: BroadcastConfig,
    pub(crate) related: Vec<QueryKey>,
    pub(crate) success_message: Option<String>,
}

impl MutationRequest {
    /// `resource` names the entity in correlation ids and messages.
    pub fn new(resource: impl Into<String>, key: impl Into<QueryKey>, variables: Value) -> Self {
        Self {
            resource: resource.into(),
            key: key.into(),
            variables,
            speculation: Speculation::Variables,
            broadcast: BroadcastConfig::default(),
            related: Vec::new(),
            success_message: None,
        }
    }

    pub fn with_transform<F>(mut self, transform: F) -> Self
    where
        F: FnOnce(&Value, Option<&Value>) -> Option<Value> + Send + 'static,
    {
        self.speculation = Speculation::Transform(Box::new(transform));
        self
    }

    pub fn without_speculation(mut self) -> Self {
        self.speculation = Speculation::Skip;
        self
    }

    pub fn with_broadcast(mut self, mode: MatchMode, scope: RefetchScope) -> Self {
        self.broadcast = BroadcastConfig { mode, scope };
        self
    }

    /// Additional key invalidated locally on success, e.g. a detail view of
    /// the record behind a list key.
    pub fn with_related_key(mut self, key: impl Into<QueryKey>) -> Self {
        self.related.push(key.into());
        self
    }

    /// Shown as a success notification once the server confirms.
    pub fn with_success_message(mut self, message: impl Into<String>) -> Self {
        self.success_message = Some(message.into());
        self
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn variables(&self) -> &Value {
        &self.variables
    }

    pub fn broadcast(&self) -> BroadcastConfig {
        self.broadcast
    }
}

/// Snapshot taken while speculating.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationContext {
    /// Cached value before the speculative write; `None` if absent.
    pub previous: Option<Value>,
    /// Speculative value written, if any.
    pub applied: Option<Value>,
}

impl MutationContext {
    pub fn speculated(&self) -> bool {
        self.applied.is_some()
    }
}
