use thiserror::Error;

/// Application-wide error types for Arachne.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request failed (fetching a page).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network/connection error while fetching a page.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// The coordination broker is unreachable or rejected an operation.
    #[error("Broker error: {0}")]
    BrokerError(String),

    /// A queue, control or acknowledgment payload had an unexpected shape.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// No worker node acknowledged the start command in time.
    #[error("No {role} acknowledgment within {seconds} seconds")]
    AckTimeout { role: String, seconds: u64 },

    /// Lifecycle operation not allowed in the current phase.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Writing the exported result files failed.
    #[error("Export error: {0}")]
    ExportError(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) | AppError::BrokerError(_) => true,
            AppError::HttpError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("reset")
            }
            _ => false,
        }
    }

    /// Returns true if the error means the broker connection is gone.
    pub fn is_broker_loss(&self) -> bool {
        matches!(self, AppError::BrokerError(_))
    }
}
