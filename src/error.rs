//! Common error types for the generation orchestrator

use thiserror::Error;

use crate::domain::TaskStatus;

/// Failure talking to the external generation provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed provider response: {0}")]
    Malformed(String),

    #[error("artifact exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

impl ProviderError {
    /// Whether a submission that failed this way may be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Status { status, .. } => *status == 429 || (500..600).contains(status),
            ProviderError::Transport(e) => e.is_connect() || e.is_timeout(),
            ProviderError::Malformed(_) | ProviderError::TooLarge { .. } => false,
        }
    }
}

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Insufficient funds: balance={balance}, delta={delta}, user={user_id}")]
    InsufficientFunds {
        user_id: i64,
        balance: i64,
        delta: i64,
    },

    #[error("Ledger rule not available: {0}")]
    UnknownRule(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Invalid status transition {from:?} -> {to:?}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("Worker queue is full")]
    QueueFull,

    #[error("Worker pool is shutting down")]
    ShuttingDown,

    #[error("Provider {operation} failed: {source}")]
    Provider {
        operation: &'static str,
        #[source]
        source: ProviderError,
    },

    #[error("Provider {operation} failed after {attempts} attempts: {source}")]
    ProviderExhausted {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl AppError {
    /// Stable machine-readable code for API layers.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config_error",
            AppError::Io(_) => "io_error",
            AppError::Json(_) => "invalid_json",
            AppError::InvalidRequest(_) => "invalid_request",
            AppError::InsufficientFunds { .. } => "insufficient_funds",
            AppError::UnknownRule(_) => "unknown_rule",
            AppError::NotFound(_) => "not_found",
            AppError::AccessDenied(_) => "access_denied",
            AppError::InvalidTransition { .. } => "invalid_transition",
            AppError::QueueFull => "queue_full",
            AppError::ShuttingDown => "shutting_down",
            AppError::Provider { .. } => "provider_error",
            AppError::ProviderExhausted { .. } => "provider_exhausted",
            AppError::Storage(_) => "storage_error",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;
