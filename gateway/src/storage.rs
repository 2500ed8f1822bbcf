//! Persistence seam for validated upload bodies.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("upload sink unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Destination for fully received, size-checked upload bodies.
///
/// Invoked once per successful upload with the complete buffer, after the
/// client response has been built. A failing sink is logged and does not
/// change the response.
#[async_trait]
pub trait UploadSink: Send + Sync {
    async fn store(&self, request_id: &str, body: Bytes) -> Result<(), StorageError>;
}

/// Discards uploads. Stands in until a real store is wired up.
pub struct NoopSink;

#[async_trait]
impl UploadSink for NoopSink {
    async fn store(&self, request_id: &str, body: Bytes) -> Result<(), StorageError> {
        tracing::debug!(request_id, bytes = body.len(), "upload discarded by noop sink");
        Ok(())
    }
}
