//! Error types for amlreg-state

use thiserror::Error;

/// Result type for capability operations
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Errors reported by a workspace provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The requested object does not exist in the workspace
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// Credential exchange or authorization failed
    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    /// The workspace refused the request
    #[error("Request rejected by workspace (status {status}): {message}")]
    Rejected { status: u16, message: String },

    /// Transport level failure
    #[error("HTTP error: {0}")]
    Http(String),

    /// Response body could not be decoded
    #[error("Failed to decode provider response: {0}")]
    Decode(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProviderError {
    /// Shorthand for a `NotFound` error.
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        ProviderError::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Whether this error means the object is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound { .. })
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Decode(err.to_string())
    }
}
