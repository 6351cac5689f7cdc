use std::sync::Arc;

use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "params.page", "cache_time")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected type, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "key_generator", "query_builder")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Why an in-flight attempt was signalled to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// A newer `execute()` on the same query replaced this attempt.
    Superseded,
    /// The caller cancelled explicitly (`cancel()` or `reset()`).
    Cancelled,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::Superseded => write!(f, "superseded by a newer execution"),
            AbortReason::Cancelled => write!(f, "cancelled by caller"),
        }
    }
}

/// Unified error type for the query runtime.
///
/// The enum is `Clone` so a single outcome can be handed to every caller
/// joined on a deduplicated in-flight request; foreign error sources are
/// held behind `Arc` for that reason.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("request aborted: {reason}")]
    Aborted { reason: AbortReason },

    #[error("query has been torn down")]
    TornDown,

    #[error("operation failed: {0}")]
    Operation(Arc<anyhow::Error>),

    #[error("serialization error: {0}")]
    Serialization(Arc<serde_json::Error>),

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Wrap a failure of the caller-supplied operation.
    pub fn operation(err: impl Into<anyhow::Error>) -> Self {
        Error::Operation(Arc::new(err.into()))
    }

    /// Create an abort error for the given reason.
    pub fn aborted(reason: AbortReason) -> Self {
        Error::Aborted { reason }
    }

    /// Create a new validation error with structured context
    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } | Error::Validation { context, .. } => {
                Some(context)
            }
            _ => None,
        }
    }

    /// True for cancellation-class errors (supersession or explicit cancel).
    ///
    /// These are never written to visible query state and never retried.
    pub fn is_abort(&self) -> bool {
        matches!(self, Error::Aborted { .. })
    }

    /// True when the owning query was torn down mid-flight.
    pub fn is_teardown(&self) -> bool {
        matches!(self, Error::TornDown)
    }

    /// Whether the retry policy may attempt this failure again.
    ///
    /// Only operation failures qualify; aborts, teardown and deterministic
    /// serialization faults propagate immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Operation(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(Arc::new(err))
    }
}
