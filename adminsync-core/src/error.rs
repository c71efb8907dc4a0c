//! Error types for data layer operations

use thiserror::Error;

/// Caller-side validation failures, raised before any request is made.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ValidationError {
    pub fn required(field: impl Into<String>) -> Self {
        Self::RequiredFieldMissing {
            field: field.into(),
        }
    }

    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Normalized failure of a read or write against the admin API.
///
/// `Clone` because a single in-flight fetch fans its result out to every
/// caller waiting on the same cache key.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// A response was received with an error status.
    #[error("Server error ({status_code}): {message}")]
    Server { status_code: u16, message: String },

    /// The request was sent but no response arrived (includes timeouts).
    #[error("Network error: {message}")]
    Network { message: String },

    /// The request could not be constructed or sent, or the response could
    /// not be interpreted.
    #[error("Client error: {message}")]
    Client { message: String },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl SyncError {
    pub fn server(status_code: u16, message: impl Into<String>) -> Self {
        Self::Server {
            status_code,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn client(message: impl Into<String>) -> Self {
        Self::Client {
            message: message.into(),
        }
    }

    /// HTTP status code, when the failure came from a response.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Server { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status_code() == Some(401)
    }

    /// Whether retrying the same request could plausibly succeed.
    ///
    /// Validation failures and 4xx responses are deterministic; everything
    /// else (5xx, network, transient client-side failures) is retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) => false,
            Self::Server { status_code, .. } => !(400..500).contains(status_code),
            Self::Network { .. } | Self::Client { .. } => true,
        }
    }

    /// Short machine-readable kind, used as a tracing field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Server { .. } => "server",
            Self::Network { .. } => "network",
            Self::Client { .. } => "client",
            Self::Validation(_) => "validation",
        }
    }
}

/// Result type alias for data layer operations.
pub type SyncResult<T> = Result<T, SyncError>;
