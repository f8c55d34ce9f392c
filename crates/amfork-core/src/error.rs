use thiserror::Error;

/// Error returned by any Alertmanager backend, local, remote or forked.
#[derive(Error, Debug)]
pub enum AlertmanagerError {
    // ========================================
    // Context Errors
    // ========================================
    #[error("context cancelled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    // ========================================
    // Request Errors
    // ========================================
    #[error("silence not found: {0}")]
    SilenceNotFound(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid silence: {0}")]
    InvalidSilence(String),

    #[error("invalid matcher: {0}")]
    InvalidMatcher(String),

    #[error("invalid alert: {0}")]
    InvalidAlert(String),

    #[error("{0} is not supported by this alertmanager")]
    Unsupported(&'static str),

    // ========================================
    // Backend Errors
    // ========================================
    #[error("alertmanager is stopped")]
    Stopped,

    #[error("remote alertmanager returned {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // ========================================
    // Routing Errors
    // ========================================
    /// The first backend of a two-step sequence accepted the call, the second did not.
    #[error("{operation} diverged between backends: {source}")]
    Diverged {
        operation: &'static str,
        #[source]
        source: Box<AlertmanagerError>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AlertmanagerError {
    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Cancelled | Self::DeadlineExceeded => ErrorSeverity::Info,
            Self::SilenceNotFound(_)
            | Self::InvalidConfig(_)
            | Self::InvalidSilence(_)
            | Self::InvalidMatcher(_)
            | Self::InvalidAlert(_)
            | Self::Unsupported(_) => ErrorSeverity::Warning,
            Self::Diverged { .. } | Self::Internal(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::Error,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::DeadlineExceeded | Self::Transport(_) => true,
            Self::Remote { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Check if error reports a missing resource
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::SilenceNotFound(_) => true,
            Self::Remote { status, .. } => *status == 404,
            Self::Diverged { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Result type alias for Alertmanager operations
pub type Result<T> = std::result::Result<T, AlertmanagerError>;
