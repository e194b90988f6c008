//! Error types for the Nyx client.

/// Broad classification of a [`NyxError`], independent of the exact variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or missing arguments, caught locally or reported by the server.
    Validation,
    /// Bad, expired or insufficient credentials.
    Authentication,
    /// The referenced dataset or circle does not exist or is inaccessible.
    NotFound,
    /// The request clashes with existing state, e.g. a duplicate name.
    Conflict,
    /// Network failures, timeouts, unexpected statuses and unreadable bodies.
    Transport,
    /// The client could not be configured.
    Configuration,
}

/// Errors that can occur when using the Nyx client.
#[derive(Debug, thiserror::Error)]
pub enum NyxError {
    /// Invalid arguments (400/422, or rejected before sending)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Authentication failed (401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Permission denied (403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Resource not found (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflict (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// HTTP transport error (connection, DNS, TLS, timeout)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Any other non-success status
    #[error("Unexpected status ({status}): {message}")]
    Status { status: u16, message: String },

    /// The response body did not have the expected shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Downloading the content of a dataset failed
    #[error("Failed to retrieve content of '{title}': {reason}")]
    Retrieval { title: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl NyxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            NyxError::Validation(_) => ErrorKind::Validation,
            NyxError::Unauthorized(_) | NyxError::Forbidden(_) => ErrorKind::Authentication,
            NyxError::NotFound(_) => ErrorKind::NotFound,
            NyxError::Conflict(_) => ErrorKind::Conflict,
            NyxError::Http(_)
            | NyxError::Status { .. }
            | NyxError::InvalidResponse(_)
            | NyxError::Retrieval { .. }
            | NyxError::Serialization(_) => ErrorKind::Transport,
            NyxError::Config(_) | NyxError::Io(_) => ErrorKind::Configuration,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, NyxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            NyxError::Validation("x".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            NyxError::Forbidden("x".into()).kind(),
            ErrorKind::Authentication
        );
        assert_eq!(
            NyxError::Unauthorized("x".into()).kind(),
            ErrorKind::Authentication
        );
        assert_eq!(
            NyxError::Status {
                status: 502,
                message: "bad gateway".into()
            }
            .kind(),
            ErrorKind::Transport
        );
        assert!(NyxError::NotFound("ds".into()).is_not_found());
        assert!(!NyxError::Conflict("ds".into()).is_not_found());
    }

    #[test]
    fn test_retrieval_message_names_dataset() {
        let err = NyxError::Retrieval {
            title: "Weather".into(),
            reason: "404".into(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to retrieve content of 'Weather': 404"
        );
    }
}
