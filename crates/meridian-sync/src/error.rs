//! # Sync Error Types
//!
//! Failures here are confined to the sync side: they mark queue entries,
//! get logged and retried, and never roll back or block the local mutation
//! they describe.

use thiserror::Error;

use meridian_db::DbError;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering delivery and pull failures.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The remote gateway reported a failure for one call.
    #[error("Gateway error: {0}")]
    Gateway(String),

    /// A gateway call exceeded the configured per-call timeout.
    #[error("Gateway call timed out after {0} seconds")]
    Timeout(u64),

    /// Local database access failed.
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Failed to load the sync configuration file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// A worker control channel closed unexpectedly.
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// Payload (de)serialization failed.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message() {
        let err = SyncError::Timeout(10);
        assert_eq!(err.to_string(), "Gateway call timed out after 10 seconds");
    }
}
