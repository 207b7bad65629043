use thiserror::Error;

/// Error taxonomy shared by every stage of the lab tool.
///
/// Partial batch failures (one library, one table, one user) are not represented
/// here; they are recorded per item in the stage reports and never abort siblings.
#[derive(Error, Debug)]
pub enum LabError {
    /// The target resource does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An asynchronous operation never reached a terminal state in the allotted window.
    #[error("Timed out after {waited_secs}s waiting for {operation}")]
    Timeout { operation: String, waited_secs: u64 },

    /// The control plane refused the request outright.
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// A read-back after a mutation did not show the expected state.
    #[error("Verification failed: {0}")]
    Verification(String),

    #[error("Statement failed: {0}")]
    StatementFailed(String),

    #[error("Statement {0} was canceled")]
    StatementCanceled(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Control plane error: {0}")]
    Client(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LabError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, LabError::NotFound(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, LabError::Timeout { .. })
    }

    pub fn timeout(operation: impl Into<String>, waited_secs: u64) -> Self {
        LabError::Timeout {
            operation: operation.into(),
            waited_secs,
        }
    }
}

pub type Result<T> = std::result::Result<T, LabError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_operation() {
        let err = LabError::timeout("cluster to start", 600);
        assert!(err.is_timeout());
        assert_eq!(
            err.to_string(),
            "Timed out after 600s waiting for cluster to start"
        );
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: LabError = io.into();
        assert!(matches!(err, LabError::Io(_)));
        assert!(!err.is_not_found());
    }
}
