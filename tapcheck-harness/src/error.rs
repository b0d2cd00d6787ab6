use tapcheck_node::SubstrateError;
use thiserror::Error;

/// Error types for the harness
///
/// Every variant is fatal for a run: the harness reports the first deviation
/// and stops.
#[derive(Error, Debug)]
pub enum HarnessError {
    /// Invalid settings, detected before any service is created
    #[error("Configuration error: {0}")]
    Config(String),

    /// The system under test deviated from the expected protocol
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// A substrate operation failed
    #[error("Substrate error: {0}")]
    Substrate(SubstrateError),
}

impl From<SubstrateError> for HarnessError {
    fn from(err: SubstrateError) -> Self {
        // a handler failure raised inside poll() carries the handler's own error
        match err {
            SubstrateError::Handler { path, source } => match source.downcast::<HarnessError>() {
                Ok(inner) => inner,
                Err(source) => HarnessError::Substrate(SubstrateError::Handler { path, source }),
            },
            other => HarnessError::Substrate(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;

/// Shorthand for building a protocol violation
pub(crate) fn violation(message: impl Into<String>) -> HarnessError {
    HarnessError::ProtocolViolation(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_error_is_unwrapped() {
        let err = SubstrateError::Handler {
            path: "/pubunistr0/äta".into(),
            source: violation("expected 3, got 4").into(),
        };
        match HarnessError::from(err) {
            HarnessError::ProtocolViolation(msg) => assert_eq!(msg, "expected 3, got 4"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_foreign_handler_error_stays_wrapped() {
        let err = SubstrateError::Handler {
            path: "/svc/äta".into(),
            source: anyhow::anyhow!("boom"),
        };
        assert!(matches!(
            HarnessError::from(err),
            HarnessError::Substrate(SubstrateError::Handler { .. })
        ));
    }
}
