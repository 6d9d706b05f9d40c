//! Error types for amlreg-azure

use amlreg_state::ProviderError;
use thiserror::Error;

/// Errors raised while talking to the workspace APIs
#[derive(Error, Debug)]
pub enum AzureError {
    /// The identity provider refused the credential exchange
    #[error("Token request failed: {0}")]
    Token(String),

    /// A workspace API answered with a non-success status
    #[error("{resource} '{name}' request returned {status}: {message}")]
    Status {
        resource: &'static str,
        name: String,
        status: u16,
        message: String,
    },

    /// A response lacked a field the binding relies on
    #[error("Workspace response is missing '{0}'")]
    MissingField(&'static str),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for AzureError {
    fn from(err: reqwest::Error) -> Self {
        // URLs carry subscription and tenant ids
        AzureError::Http(err.without_url().to_string())
    }
}

impl From<AzureError> for ProviderError {
    fn from(err: AzureError) -> Self {
        match err {
            AzureError::Token(message) => ProviderError::Unauthorized(message),
            AzureError::Status {
                resource,
                name,
                status,
                message,
            } => match status {
                401 | 403 => ProviderError::Unauthorized(format!(
                    "access to {} '{}' denied: {}",
                    resource, name, message
                )),
                404 => ProviderError::not_found(resource, name),
                400..=499 => ProviderError::Rejected { status, message },
                _ => ProviderError::Http(format!(
                    "{} '{}' request returned {}: {}",
                    resource, name, status, message
                )),
            },
            AzureError::MissingField(field) => {
                ProviderError::Decode(format!("response is missing '{}'", field))
            }
            AzureError::Http(message) => ProviderError::Http(message),
            AzureError::Json(e) => ProviderError::Decode(e.to_string()),
            AzureError::Io(e) => ProviderError::Io(e),
        }
    }
}

/// Result type for the binding
pub type Result<T> = std::result::Result<T, AzureError>;
