//! Error types for the FieldSage domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each failure family of the answer pipeline has its own variant.

use thiserror::Error;

/// The top-level error type for all FieldSage operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Request errors ---
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // --- Provider (transport) errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Output schema errors ---
    #[error("Schema violation: {0}")]
    Schema(#[from] SchemaViolation),
}

impl Error {
    /// Short, stable label for the failure family, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::Provider(_) => "transport",
            Self::Schema(_) => "schema_violation",
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures reaching or reading from the model provider.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Classify a `reqwest`-style failure message as timeout or network error.
    pub fn from_transport(is_timeout: bool, message: impl Into<String>) -> Self {
        if is_timeout {
            Self::Timeout(message.into())
        } else {
            Self::Network(message.into())
        }
    }
}

/// Model output that does not conform to its declared output schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaViolation {
    #[error("output is not valid JSON: {0}")]
    MalformedJson(String),

    #[error("unexpected field `{field}` for schema `{schema}`")]
    UnknownField { schema: &'static str, field: String },

    #[error("missing required field `{field}` for schema `{schema}`")]
    MissingField { schema: &'static str, field: String },

    #[error("field `{field}` must be {expected}")]
    WrongType { field: String, expected: &'static str },

    #[error("assumption {index} has invalid source `{value}` (expected om, industry or mixed)")]
    InvalidSource { index: usize, value: String },
}
