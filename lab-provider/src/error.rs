//! Errors raised by control-plane calls.

use lab_core::LabError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("{resource} not found")]
    NotFound { resource: String },

    /// The control plane refused the request (bad input, missing permission, conflict).
    #[error("Rejected ({status} {code}): {message}")]
    Rejected {
        status: u16,
        code: String,
        message: String,
    },

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Authentication error: {0}")]
    Auth(String),
}

impl ClientError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        ClientError::NotFound {
            resource: resource.into(),
        }
    }

    pub fn rejected(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        ClientError::Rejected {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Single predicate for "already absent" in teardown and "must create" in setup.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound { .. })
    }
}

impl From<ClientError> for LabError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::NotFound { resource } => LabError::NotFound(resource),
            rejected @ ClientError::Rejected { .. } => LabError::Rejected(rejected.to_string()),
            other => LabError::Client(other.to_string()),
        }
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejections_keep_the_platform_message() {
        let err = ClientError::rejected(403, "PERMISSION_DENIED", "User is not an admin");
        let lab: LabError = err.into();
        assert!(matches!(lab, LabError::Rejected(_)));
        assert!(lab.to_string().contains("User is not an admin"));
    }

    #[test]
    fn not_found_maps_to_not_found() {
        let err = ClientError::not_found("volume c.s.v");
        assert!(err.is_not_found());
        assert!(LabError::from(err).is_not_found());
    }
}
