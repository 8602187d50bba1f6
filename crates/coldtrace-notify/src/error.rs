use coldtrace_common::types::DeliveryOutcome;

/// Classified failure of a single delivery attempt.
///
/// The worker's handling follows the class, not the provider: `Fatal`
/// fails the job immediately, `Retryable` goes through backoff until the
/// attempt budget runs out, and `RateLimited` is requeued after a fixed
/// delay without consuming an attempt.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// Permanent rejection (invalid recipient, auth failure, 4xx).
    #[error("Notify: fatal provider error: {message}")]
    Fatal {
        code: Option<String>,
        message: String,
    },

    /// Transient failure (timeout, connection reset, 5xx).
    #[error("Notify: retryable provider error: {message}")]
    Retryable {
        code: Option<String>,
        message: String,
    },

    /// The provider is throttling us (HTTP 429 or SMTP 4.7.x equivalents).
    #[error("Notify: provider throttled the request")]
    RateLimited { code: Option<String> },
}

impl SendError {
    pub fn outcome(&self) -> DeliveryOutcome {
        match self {
            SendError::Fatal { .. } => DeliveryOutcome::FatalError,
            SendError::Retryable { .. } => DeliveryOutcome::RetryableError,
            SendError::RateLimited { .. } => DeliveryOutcome::RateLimited,
        }
    }

    pub fn provider_code(&self) -> Option<&str> {
        match self {
            SendError::Fatal { code, .. }
            | SendError::Retryable { code, .. }
            | SendError::RateLimited { code } => code.as_deref(),
        }
    }
}
