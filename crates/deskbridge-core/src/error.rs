use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),
    /// The remote answered and refused, or answered with something unreadable.
    #[error("remote rejected request: {0}")]
    RemoteRejected(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl CoreError {
    pub fn dependency_unavailable(message: impl Into<String>) -> Self {
        Self::DependencyUnavailable(message.into())
    }

    pub fn remote_rejected(message: impl Into<String>) -> Self {
        Self::RemoteRejected(message.into())
    }

    /// Maps a non-success HTTP status. Only 408, 429 and 5xx are retryable.
    pub fn for_http_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            408 | 429 | 500..=599 => Self::dependency_unavailable(message),
            _ => Self::remote_rejected(message),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }

    /// Transport failures are the only errors a retry can plausibly fix.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::DependencyUnavailable(_))
    }
}
