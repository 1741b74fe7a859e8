//! Collaborator error types

use thiserror::Error;

/// Error returned by handlers, retrievers and summarizers
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    #[error("handler failed: {0}")]
    Failed(String),

    #[error("timeout after {0} seconds")]
    Timeout(u64),

    #[error("internal error: {0}")]
    Internal(String),
}
