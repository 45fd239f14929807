use thiserror::Error;

/// Failure below HTTP: nothing came back from the backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// No token present
    #[error("not signed in")]
    Unauthenticated,
    /// Token present but past its expiry
    #[error("session expired")]
    Expired,
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
    #[error("malformed access token")]
    MalformedToken,
    /// The backend answered with a non-2xx status
    #[error("HTTP error {status}: {message}")]
    Http {
        status: u16,
        message: String,
        body: String,
    },
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The backend answered 2xx but its envelope did not report success
    #[error("{message}")]
    Api { status: Option<u16>, message: String },
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("credential storage error: {0}")]
    Storage(String),
}

/// Coarse classification used when routing the user to an error screen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    ServerDown,
    Authentication,
    Permission,
    Network,
    General,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ServerDown => "server-down",
            Self::Authentication => "authentication",
            Self::Permission => "permission",
            Self::Network => "network",
            Self::General => "general",
        }
    }

    pub fn default_message(&self) -> &'static str {
        match self {
            Self::ServerDown => "Unable to connect to the server. Please try again later.",
            Self::Authentication => "Your session has expired. Please sign in again.",
            Self::Permission => "You don't have permission to access this resource.",
            Self::Network => "Network error. Please check your connection and try again.",
            Self::General => "An unexpected error occurred. Please try again.",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AuthError {
    /// HTTP status carried by the error, if the backend produced one
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Api { status, .. } => *status,
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Http { status: 401, .. })
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Unauthenticated
            | Self::Expired
            | Self::RefreshFailed(_)
            | Self::MalformedToken => ErrorCategory::Authentication,
            Self::Transport(TransportError::Network(_)) => ErrorCategory::ServerDown,
            Self::Transport(TransportError::Timeout) => ErrorCategory::Network,
            Self::Http { status, .. } => match *status {
                0 => ErrorCategory::ServerDown,
                401 => ErrorCategory::Authentication,
                403 => ErrorCategory::Permission,
                s if s >= 500 => ErrorCategory::ServerDown,
                _ => ErrorCategory::General,
            },
            Self::Api { .. } | Self::Decode(_) | Self::Storage(_) => ErrorCategory::General,
        }
    }
}
