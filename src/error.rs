//! Error types for omnichat.

/// Top-level error type for the dispatch core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Connector error: {0}")]
    Connector(#[from] ConnectorError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors raised by the resilient HTTP transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The request never produced a response (DNS, connect, TLS, reset).
    #[error("Network error: {0}")]
    Network(String),

    /// The backend answered with a non-success status. Retryable statuses
    /// only surface here once the retry budget is spent.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The request body is a stream and cannot be replayed for a retry.
    #[error("Request cannot be cloned for retry")]
    NotCloneable,
}

impl TransportError {
    /// Status code carried by an [`TransportError::Http`] failure.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Generation provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("{provider} API key missing. Please check your settings.")]
    MissingCredential { provider: String },

    #[error("Model {model} is not in the catalog")]
    UnknownModel { model: String },

    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} unavailable (HTTP {status}): {reason}")]
    Transient {
        provider: String,
        status: u16,
        reason: String,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("{provider} generation failed: {reason}")]
    Generation { provider: String, reason: String },

    #[error("Generation cancelled")]
    Cancelled,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    /// Whether the failure came from a missing API key rather than the backend.
    pub fn is_missing_credential(&self) -> bool {
        matches!(self, Self::MissingCredential { .. })
    }
}

/// Context connector errors. The enrichment pipeline never propagates these.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("Connector {connector} request failed: {reason}")]
    RequestFailed { connector: String, reason: String },

    #[error("Invalid response from connector {connector}: {reason}")]
    InvalidResponse { connector: String, reason: String },

    #[error("Connector {connector} is not configured")]
    NotConfigured { connector: String },
}

/// Persistence errors from a [`crate::sink::MessageStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Message {message_id} not found in conversation {conversation_id}")]
    NotFound {
        conversation_id: String,
        message_id: String,
    },

    #[error("Write failed: {0}")]
    WriteFailed(String),
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
