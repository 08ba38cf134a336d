//! Error types for HiveDB

use thiserror::Error;

/// Result type alias for HiveDB operations
pub type Result<T> = std::result::Result<T, HiveError>;

/// HiveDB error types
#[derive(Error, Debug)]
pub enum HiveError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The embedded engine rejected an operation
    #[error("engine error: {0}")]
    Engine(#[from] rusqlite::Error),

    /// Request rejected before touching storage
    #[error("validation error: {0}")]
    Validation(String),

    /// Tenant has no catalog entry
    #[error("tenant not found: {0}")]
    TenantNotFound(String),

    /// Write queue depth cap exceeded
    #[error("write queue saturated at depth {0}")]
    QueueSaturated(usize),

    /// Deadline elapsed while the operation was still queued
    #[error("operation deadline elapsed before execution started")]
    Timeout,

    /// Data corruption detected
    #[error("data corruption: {0}")]
    Corruption(String),

    /// Handle was closed while the operation was in flight
    #[error("handle closed: {0}")]
    HandleClosed(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl HiveError {
    /// Check if the caller may safely retry the operation
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HiveError::Io(_) | HiveError::QueueSaturated(_) | HiveError::Timeout
        )
    }

    /// Check if error indicates corruption
    pub fn is_corruption(&self) -> bool {
        matches!(self, HiveError::Corruption(_))
    }
}
