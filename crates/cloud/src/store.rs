use std::path::Path;

use async_trait::async_trait;

/// Errors from the object storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("Storage request failed for {bucket}/{key}: {message}")]
    Request {
        bucket: String,
        key: String,
        message: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Minimal object storage surface used by jobs.
///
/// Implementations are cheap to share; each call is an independent
/// request, there is no per-job connection state.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Download `bucket/key` into the file at `dest`, replacing it.
    async fn get_object(&self, bucket: &str, key: &str, dest: &Path) -> Result<(), StorageError>;

    /// Upload the file at `source` as `bucket/key`.
    async fn put_object(&self, bucket: &str, key: &str, source: &Path) -> Result<(), StorageError>;
}
