//! Routing classified failures to sinks.
//!
//! - Validation: field errors on the form, never a notification.
//! - Version conflict: one notification asking for a refresh, no field errors.
//! - Rate limit and business rule: one notification each.
//! - Unknown: logged, one generic notification.
//!
//! A validation failure without any field errors, or one raised with no form
//! attached, falls back to a single notification so no failure is silent.

use haul_core::{Classification, ClassifiedError, FieldBuckets, FieldError};
use tracing::warn;

use crate::sink::{ErrorSinks, FieldMessage, Notification, Severity};

pub const VERSION_CONFLICT_TITLE: &str = "Record out of date";
pub const VERSION_CONFLICT_MESSAGE: &str =
    "This record was changed by someone else. Refresh to load the latest version and try again.";
pub const RATE_LIMIT_TITLE: &str = "Rate limit exceeded";
pub const RATE_LIMIT_MESSAGE: &str = "You have exceeded the rate limit. Please try again later.";
pub const BUSINESS_RULE_TITLE: &str = "Request rejected";
pub const VALIDATION_TITLE: &str = "Validation failed";
pub const GENERIC_TITLE: &str = "Something went wrong";
pub const GENERIC_MESSAGE: &str = "An unexpected error occurred. Please try again.";

/// What a report produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportSummary {
    pub field_errors: usize,
    pub deferred_warnings: usize,
    pub notifications: usize,
}

impl ReportSummary {
    pub fn is_silent(&self) -> bool {
        self.field_errors == 0 && self.deferred_warnings == 0 && self.notifications == 0
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorReporter;

impl ErrorReporter {
    pub fn report(&self, classification: &Classification, sinks: &ErrorSinks) -> ReportSummary {
        let mut summary = ReportSummary::default();

        for tag in classification.tags() {
            match tag {
                ClassifiedError::Validation { fields, detail } => {
                    self.report_validation(fields, detail.as_deref(), sinks, &mut summary);
                }
                ClassifiedError::VersionConflict { .. } => {
                    notify(
                        sinks,
                        &mut summary,
                        Notification::new(
                            Severity::Error,
                            VERSION_CONFLICT_TITLE,
                            VERSION_CONFLICT_MESSAGE,
                        ),
                    );
                }
                ClassifiedError::RateLimit { detail } => {
                    let message = detail.clone().unwrap_or_else(|| RATE_LIMIT_MESSAGE.to_string());
                    notify(
                        sinks,
                        &mut summary,
                        Notification::new(Severity::Error, RATE_LIMIT_TITLE, message),
                    );
                }
                ClassifiedError::BusinessRule { detail } => {
                    let message = if detail.is_empty() {
                        GENERIC_MESSAGE.to_string()
                    } else {
                        detail.clone()
                    };
                    notify(
                        sinks,
                        &mut summary,
                        Notification::new(Severity::Error, BUSINESS_RULE_TITLE, message),
                    );
                }
                ClassifiedError::Unknown {
                    status,
                    detail,
                    reason,
                } => {
                    warn!(status = ?status, reason = ?reason, detail = %detail, "Unclassified mutation failure");
                    notify(
                        sinks,
                        &mut summary,
                        Notification::new(Severity::Error, GENERIC_TITLE, GENERIC_MESSAGE),
                    );
                }
            }
        }

        if summary.is_silent() {
            notify(
                sinks,
                &mut summary,
                Notification::new(Severity::Error, GENERIC_TITLE, GENERIC_MESSAGE),
            );
        }
        summary
    }

    fn report_validation(
        &self,
        fields: &FieldBuckets,
        detail: Option<&str>,
        sinks: &ErrorSinks,
        summary: &mut ReportSummary,
    ) {
        let Some(form) = sinks.form.as_ref().filter(|_| !fields.is_empty()) else {
            let message = detail
                .filter(|d| !d.is_empty())
                .map(str::to_string)
                .or_else(|| fields.iter().next().map(|e| format!("{}: {}", e.name, e.reason)))
                .unwrap_or_else(|| "The submitted values were rejected.".to_string());
            notify(
                sinks,
                summary,
                Notification::new(Severity::Error, VALIDATION_TITLE, message),
            );
            return;
        };

        let defer_low = sinks.defers_low_priority() && !fields.low.is_empty();
        let low: &[FieldError] = if defer_low { &[] } else { &fields.low };

        let shown = fields
            .high
            .iter()
            .chain(&fields.medium)
            .chain(low)
            .chain(&fields.unconditional);
        for error in shown {
            form.set_field_error(&error.name, FieldMessage::from(error));
            summary.field_errors += 1;
        }

        if let Some(handler) = sinks.warnings.as_ref().filter(|_| defer_low) {
            summary.deferred_warnings += fields.low.len();
            handler.on_warnings(fields.low.clone());
        }
    }
}

fn notify(sinks: &ErrorSinks, summary: &mut ReportSummary, notification: Notification) {
    sinks.notifier.notify(notification);
    summary.notifications += 1;
}
