use coldtrace_common::types::AlertStatus;

/// Errors produced by the alert state machine.
#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    /// The referenced alert does not exist.
    #[error("Alert: alert '{0}' not found")]
    NotFound(String),

    /// The requested lifecycle action is not allowed from the alert's
    /// current status (e.g. acknowledging a resolved alert).
    #[error("Alert: cannot {action} alert '{id}' in status '{status}'")]
    InvalidTransition {
        id: String,
        status: AlertStatus,
        action: &'static str,
    },

    /// An underlying storage failure.
    #[error("Alert: storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

/// Convenience `Result` alias for state-machine operations.
pub type Result<T> = std::result::Result<T, AlertError>;
