//! Crate-level error type.
//!
//! Nothing in this crate retries. A failed weight transfer or a failed wake-up leaves the
//! two replicas in an unknown relative state, so every error is surfaced to the caller.

use crate::tensor::TensorError;
use rollout_sync_kernels::KernelError;
use thiserror::Error;

/// Result type used throughout `rollout-sync`.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Tensor(#[from] TensorError),

    #[error(transparent)]
    Kernel(#[from] KernelError),

    /// The memory pool cannot satisfy an allocation.
    #[error("Insufficient device memory: requested {requested} bytes, {available} bytes available")]
    ResourceExhausted { requested: u64, available: u64 },

    /// A collective could not complete (peer gone, payload mismatch, caller not in group).
    #[error("Collective error: {0}")]
    Collective(String),

    #[error("Inference engine error: {0}")]
    Engine(String),

    #[error("Training replica error: {0}")]
    Training(String),

    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    #[error("Invalid RNG state: {0}")]
    InvalidRngState(String),

    /// `enter`/`exit` called out of order.
    #[error("Invalid manager state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to extract configuration: {0}")]
    ConfigExtraction(#[from] Box<figment::Error>),

    #[error("Configuration validation failed: {0}")]
    ConfigValidation(#[from] validator::ValidationErrors),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether this is the out-of-memory class of failure.
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(self, Error::ResourceExhausted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::ResourceExhausted {
            requested: 4096,
            available: 1024,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient device memory: requested 4096 bytes, 1024 bytes available"
        );
        assert!(err.is_resource_exhaustion());
        assert!(!Error::Engine("boom".into()).is_resource_exhaustion());
    }

    #[test]
    fn test_tensor_error_is_transparent() {
        let err: Error = TensorError::Unsupported("foo".into()).into();
        assert_eq!(err.to_string(), "Unsupported operation: foo");
    }
}
