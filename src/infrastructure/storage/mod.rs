use crate::common::retry::Retryable;
use async_trait::async_trait;
use std::path::Path;

pub mod s3;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("object {bucket}/{key} not found")]
    NotFound { bucket: String, key: String },

    #[error("{operation} failed: {message}")]
    Request {
        operation: &'static str,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Retryable for StorageError {
    fn is_retryable(&self) -> bool {
        !matches!(self, StorageError::NotFound { .. })
    }
}

/// Blob storage holding uploaded sources and published variants.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Downloads `bucket/key` into `dest`, returning the number of bytes written.
    async fn fetch(&self, bucket: &str, key: &str, dest: &Path) -> Result<u64, StorageError>;

    /// Uploads the file at `src` as `bucket/key`.
    async fn publish(&self, bucket: &str, key: &str, src: &Path) -> Result<(), StorageError>;
}
