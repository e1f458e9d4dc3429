use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "messages[0].role", "upstream.base_url")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected type, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "normalizer", "upstream_client")
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

/// Unified error type for the gateway.
///
/// The first group of variants is what a client can observe; the second group
/// covers ambient failures (configuration, I/O, shared cache) that are either
/// startup-only or are absorbed before reaching a response.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid request: {message}{}", format_context(.context))]
    InvalidRequest {
        message: String,
        context: ErrorContext,
    },

    #[error("Upstream unavailable after {attempts} attempt(s): {last}")]
    UpstreamUnavailable { attempts: u32, last: Box<Error> },

    #[error("Malformed upstream response: {message}{}", format_context(.context))]
    MalformedUpstreamResponse {
        message: String,
        context: ErrorContext,
    },

    #[error("Timed out: {message}")]
    Timeout { message: String },

    #[error("Cancelled: {message}")]
    Cancelled { message: String },

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Internal error: {message}{}", format_context(.context))]
    Internal {
        message: String,
        context: ErrorContext,
    },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Cache error: {message}{}", format_context(.context))]
    Cache {
        message: String,
        context: ErrorContext,
    },

    #[error("Network transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
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
    /// Create a new invalid-request error with structured context
    pub fn invalid_request_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::InvalidRequest {
            message: msg.into(),
            context,
        }
    }

    /// Create a new malformed-response error with structured context
    pub fn malformed_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::MalformedUpstreamResponse {
            message: msg.into(),
            context,
        }
    }

    /// Create a new internal error with structured context
    pub fn internal_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Internal {
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

    /// Create a new cache error with structured context
    pub fn cache_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Cache {
            message: msg.into(),
            context,
        }
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Error::Timeout {
            message: msg.into(),
        }
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Error::Cancelled {
            message: msg.into(),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound {
            message: msg.into(),
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::InvalidRequest { context, .. }
            | Error::MalformedUpstreamResponse { context, .. }
            | Error::Internal { context, .. }
            | Error::Configuration { context, .. }
            | Error::Cache { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Whether an upstream attempt that failed with this error may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::MalformedUpstreamResponse { .. } | Error::Timeout { .. }
        )
    }

    /// HTTP status a client sees for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::InvalidRequest { .. } => 400,
            Error::NotFound { .. } => 404,
            Error::Timeout { .. } => 408,
            Error::Cancelled { .. } => 503,
            _ => 500,
        }
    }

    /// Short, client-facing label. Never carries upstream or internal detail.
    pub fn public_message(&self) -> String {
        match self {
            Error::InvalidRequest { message, .. } => message.clone(),
            Error::NotFound { .. } => "Not Found".to_string(),
            Error::Timeout { .. } => "Request timeout".to_string(),
            Error::Cancelled { .. } => "Service is shutting down".to_string(),
            Error::UpstreamUnavailable { .. } | Error::MalformedUpstreamResponse { .. } => {
                "Upstream service unavailable".to_string()
            }
            _ => "Internal server error".to_string(),
        }
    }
}
