use thiserror::Error;

/// Main error type for the execution gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    // Network errors (5xx / transport failure) - retryable
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    // 429 (and 418 on Binance) or local gate timeout - retryable with backoff
    #[error("Rate limited: {0}")]
    RateLimited(String),

    // 401/403 - fatal, never retried
    #[error("Authentication error: {0}")]
    Auth(String),

    // Validation errors - never retried
    #[error("Validation failed: {0}")]
    Validation(String),

    // Anything else the exchange signals
    #[error("Exchange error: {0}")]
    Exchange(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Whether a retry policy may re-attempt the failed operation.
    ///
    /// Only transient failures qualify; auth and validation errors must
    /// propagate immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::RateLimited(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::WebSocket(_) => true,
            _ => false,
        }
    }
}

/// Result type alias for GatewayError
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(GatewayError::Network("503".into()).is_retryable());
        assert!(GatewayError::RateLimited("429".into()).is_retryable());
    }

    #[test]
    fn fatal_errors_are_not_retryable() {
        assert!(!GatewayError::Auth("401".into()).is_retryable());
        assert!(!GatewayError::Validation("bad timeframe".into()).is_retryable());
        assert!(!GatewayError::Internal("oops".into()).is_retryable());
    }
}
