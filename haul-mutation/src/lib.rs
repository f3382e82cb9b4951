//! Haul Mutation - Optimistic Writes
//!
//! [`MutationExecutor`] applies a write to the local cache before the server
//! confirms it, restores the previous value exactly if the write fails, and
//! always finishes with a reconciling refetch. Failures are classified and
//! routed to the caller's form and notification sinks by [`ErrorReporter`].

pub mod executor;
pub mod report;
pub mod request;
pub mod rest;
pub mod sink;

pub use executor::{MutationError, MutationExecutor, MutationHandle, MutationResult};
pub use report::{ErrorReporter, ReportSummary};
pub use request::{BroadcastConfig, MutationContext, MutationRequest, OptimisticTransform, Speculation};
pub use rest::{RestWriter, WriteFuture};
pub use sink::{
    ErrorSinks, FieldMessage, FormErrorSink, Notification, NotificationSink, Severity, SubmitMode,
    WarningHandler,
};
