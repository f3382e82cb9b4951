//! Invalidation messages and their cross-context wire contract.
//!
//! Messages cross the context boundary as plain JSON values, the
//! structured-clone equivalent of this workspace: no closures, no handles.
//!
//! ```text
//! {
//!   "type": "invalidate",
//!   "queryKeys": ["order-list"],
//!   "config": { "exact": false, "refetchType": "all", "predicate": true },
//!   "correlationId": "update-order-1718000000000",
//!   "origin": "0190..."
//! }
//! ```
//!
//! Extra fields are ignored. Anything without `type: "invalidate"` and an
//! array of string `queryKeys` is rejected by [`InvalidationMessage::from_wire`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Discriminator value of an invalidation message.
pub const INVALIDATE_TYPE: &str = "invalidate";

/// How target keys select cache entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MatchMode {
    /// A cache key matches when its token equals a target.
    #[default]
    Exact,
    /// A cache key matches when the store's predicate matcher accepts it.
    Predicate,
}

/// Which matching entries get refetched after being marked stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefetchScope {
    /// Only entries with at least one observer.
    #[default]
    Active,
    /// Only entries nobody is observing.
    Inactive,
    /// Every matching entry.
    All,
}

impl RefetchScope {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(RefetchScope::Active),
            "inactive" => Some(RefetchScope::Inactive),
            "all" => Some(RefetchScope::All),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RefetchScope::Active => "active",
            RefetchScope::Inactive => "inactive",
            RefetchScope::All => "all",
        }
    }

    /// Whether an entry with `observers` subscribers falls in this scope.
    pub fn includes(&self, observers: usize) -> bool {
        match self {
            RefetchScope::Active => observers > 0,
            RefetchScope::Inactive => observers == 0,
            RefetchScope::All => true,
        }
    }
}

/// Build the correlation id attached to a mutation's broadcast.
pub fn correlation_id(resource: &str, at: DateTime<Utc>) -> String {
    format!("update-{}-{}", resource, at.timestamp_millis())
}

/// A notice that some cached queries are stale. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationMessage {
    target_keys: Vec<String>,
    match_mode: MatchMode,
    refetch_scope: RefetchScope,
    correlation_id: Option<String>,
    origin: Option<String>,
}

impl InvalidationMessage {
    pub fn new<I, S>(target_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            target_keys: target_keys.into_iter().map(Into::into).collect(),
            match_mode: MatchMode::Exact,
            refetch_scope: RefetchScope::Active,
            correlation_id: None,
            origin: None,
        }
    }

    pub fn with_match_mode(mut self, mode: MatchMode) -> Self {
        self.match_mode = mode;
        self
    }

    pub fn with_refetch_scope(mut self, scope: RefetchScope) -> Self {
        self.refetch_scope = scope;
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Tag the message with the publishing context.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn target_keys(&self) -> &[String] {
        &self.target_keys
    }

    pub fn match_mode(&self) -> MatchMode {
        self.match_mode
    }

    pub fn refetch_scope(&self) -> RefetchScope {
        self.refetch_scope
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    /// Encode for the cross-context channel.
    pub fn to_wire(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("type".to_string(), json!(INVALIDATE_TYPE));
        obj.insert("queryKeys".to_string(), json!(self.target_keys));
        obj.insert(
            "config".to_string(),
            json!({
                "exact": self.match_mode == MatchMode::Exact,
                "predicate": self.match_mode == MatchMode::Predicate,
                "refetchType": self.refetch_scope.as_str(),
            }),
        );
        if let Some(id) = &self.correlation_id {
            obj.insert("correlationId".to_string(), json!(id));
        }
        if let Some(origin) = &self.origin {
            obj.insert("origin".to_string(), json!(origin));
        }
        Value::Object(obj)
    }

    /// Decode and validate an inbound payload.
    ///
    /// Returns `None` for anything malformed; never panics. Within `config`,
    /// values of the wrong type fall back to their defaults.
    pub fn from_wire(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        if obj.get("type").and_then(Value::as_str) != Some(INVALIDATE_TYPE) {
            return None;
        }
        let target_keys = obj
            .get("queryKeys")?
            .as_array()?
            .iter()
            .map(|key| key.as_str().map(str::to_string))
            .collect::<Option<Vec<String>>>()?;

        let config = obj.get("config").and_then(Value::as_object);
        let flag = |name: &str| {
            config
                .and_then(|c| c.get(name))
                .and_then(Value::as_bool)
                .unwrap_or(false)
        };
        let match_mode = if flag("predicate") {
            MatchMode::Predicate
        } else {
            MatchMode::Exact
        };
        let refetch_scope = config
            .and_then(|c| c.get("refetchType"))
            .and_then(Value::as_str)
            .and_then(RefetchScope::parse)
            .unwrap_or_default();

        Some(Self {
            target_keys,
            match_mode,
            refetch_scope,
            correlation_id: obj
                .get("correlationId")
                .and_then(Value::as_str)
                .map(str::to_string),
            origin: obj.get("origin").and_then(Value::as_str).map(str::to_string),
        })
    }
}
