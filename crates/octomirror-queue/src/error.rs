//! Error types for queue operations.

use thiserror::Error;

/// Error type for all queue store and processor operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue item not found: {id}")]
    ItemNotFound { id: String },

    #[error("Queue item {id} is not in a state that allows {operation}")]
    InvalidTransition { id: String, operation: String },

    #[error("Queue storage failed: {message}")]
    Storage { message: String },

    #[error("Payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl QueueError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ItemNotFound { .. } => false,
            Self::InvalidTransition { .. } => false,
            Self::Storage { .. } => true,
            Self::Serialization(_) => false,
        }
    }
}
