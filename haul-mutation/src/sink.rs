//! Where failures are shown.
//!
//! Forms receive field errors through a [`FormErrorSink`]; everything global
//! goes to a [`NotificationSink`]. Both are supplied per mutation in an
//! [`ErrorSinks`] bundle.

use haul_core::FieldError;
use std::fmt;
use std::sync::Arc;

/// A field error as handed to a form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMessage {
    pub message: String,
    /// Error code from the server, or `"server"`.
    pub kind: String,
}

impl From<&FieldError> for FieldMessage {
    fn from(error: &FieldError) -> Self {
        Self {
            message: error.reason.clone(),
            kind: error.code.clone().unwrap_or_else(|| "server".to_string()),
        }
    }
}

/// The invoking form's error state.
pub trait FormErrorSink: Send + Sync {
    fn set_field_error(&self, path: &str, error: FieldMessage);

    /// Reset error state after a confirmed write.
    fn clear_errors(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Success,
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Success => "success",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub severity: Severity,
    pub title: String,
    pub message: String,
}

impl Notification {
    pub fn new(severity: Severity, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            title: title.into(),
            message: message.into(),
        }
    }
}

/// Global toast/notification surface.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Receives LOW priority field errors in "submit anyway" flows.
pub trait WarningHandler: Send + Sync {
    fn on_warnings(&self, warnings: Vec<FieldError>);
}

/// Whether LOW priority validation errors block the form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SubmitMode {
    /// Every field error is shown on the form.
    #[default]
    Strict,
    /// LOW priority errors go to the warning handler instead.
    AllowWarnings,
}

/// Sinks for one mutation.
#[derive(Clone)]
pub struct ErrorSinks {
    pub form: Option<Arc<dyn FormErrorSink>>,
    pub notifier: Arc<dyn NotificationSink>,
    pub warnings: Option<Arc<dyn WarningHandler>>,
    pub mode: SubmitMode,
}

impl ErrorSinks {
    pub fn new(notifier: Arc<dyn NotificationSink>) -> Self {
        Self {
            form: None,
            notifier,
            warnings: None,
            mode: SubmitMode::Strict,
        }
    }

    pub fn with_form(mut self, form: Arc<dyn FormErrorSink>) -> Self {
        self.form = Some(form);
        self
    }

    /// Defer LOW priority errors to `handler`.
    pub fn with_warnings(mut self, handler: Arc<dyn WarningHandler>) -> Self {
        self.warnings = Some(handler);
        self.mode = SubmitMode::AllowWarnings;
        self
    }

    /// LOW priority errors are deferred only with a handler to receive them.
    pub fn defers_low_priority(&self) -> bool {
        self.mode == SubmitMode::AllowWarnings && self.warnings.is_some()
    }
}

impl fmt::Debug for ErrorSinks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorSinks")
            .field("form", &self.form.is_some())
            .field("warnings", &self.warnings.is_some())
            .field("mode", &self.mode)
            .finish()
    }
}
