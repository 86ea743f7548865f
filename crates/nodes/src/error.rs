//! Node-level error type.

use thiserror::Error;

/// Errors returned by a dispatcher's `execute` method.
///
/// The engine uses the variant to decide retry behaviour:
/// - `Retryable`: dispatch is attempted again with exponential back-off.
/// - `Fatal`    : the node is marked as failed immediately.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Transient failure; the engine may re-try the dispatch.
    #[error("retryable node error: {0}")]
    Retryable(String),

    /// Permanent failure; no retry should be attempted.
    #[error("fatal node error: {0}")]
    Fatal(String),
}

impl NodeError {
    /// The message carried by the error, without the variant prefix.
    ///
    /// This is what ends up in `NodeExecution::error` and, for a fatal
    /// node, in the run-level error.
    pub fn message(&self) -> &str {
        match self {
            Self::Retryable(msg) | Self::Fatal(msg) => msg,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_strips_variant_prefix() {
        let err = NodeError::Fatal("smtp refused".into());
        assert_eq!(err.message(), "smtp refused");
        assert_eq!(err.to_string(), "fatal node error: smtp refused");
        assert!(!err.is_retryable());
        assert!(NodeError::Retryable("503".into()).is_retryable());
    }
}
