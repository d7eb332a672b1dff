//! Blob store trait definitions.

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use sha2::{Digest, Sha384};
use std::pin::Pin;

/// A boxed stream of bytes for streaming reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Streamed, content-checked object store for archive blobs.
///
/// Blobs are addressed by an opaque name allocated by the caller; the store
/// itself holds no revision or identity logic.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Check whether a blob exists.
    async fn exists(&self, name: &str) -> StorageResult<bool>;

    /// Get a blob's size in bytes without fetching content.
    async fn size(&self, name: &str) -> StorageResult<u64>;

    /// Get a blob's full content.
    async fn get(&self, name: &str) -> StorageResult<Bytes>;

    /// Get a blob as a byte stream.
    async fn get_stream(&self, name: &str) -> StorageResult<ByteStream>;

    /// Get the half-open byte range `[start, end)` of a blob.
    async fn get_range(&self, name: &str, start: u64, end: u64) -> StorageResult<Bytes>;

    /// Start a streaming upload. Fails with [`StorageError::AlreadyExists`]
    /// when the name is taken.
    async fn put_stream(&self, name: &str) -> StorageResult<Box<dyn StreamingUpload>>;

    /// Remove a blob. Removing a missing blob is not an error.
    async fn remove(&self, name: &str) -> StorageResult<()>;

    /// A static identifier for the backend type, used in logs.
    fn backend_name(&self) -> &'static str;

    /// Verify backend availability.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Trait for streaming uploads.
#[async_trait]
pub trait StreamingUpload: Send {
    /// Write a chunk of data.
    async fn write(&mut self, data: Bytes) -> StorageResult<()>;

    /// Finish the upload and return the total bytes written.
    async fn finish(self: Box<Self>) -> StorageResult<u64>;

    /// Abort the upload, discarding any bytes written so far.
    async fn abort(self: Box<Self>) -> StorageResult<()>;
}

/// A streaming upload that verifies a declared SHA-384 digest and byte
/// count as data arrives.
///
/// The upload is rejected as soon as it exceeds the declared size; the
/// digest is checked at [`CheckedUpload::finish`]. On any failure the inner
/// upload is aborted so no partial blob is left behind.
pub struct CheckedUpload {
    inner: Box<dyn StreamingUpload>,
    hasher: Sha384,
    declared_size: u64,
    declared_hash: String,
    written: u64,
}

impl CheckedUpload {
    /// Wrap an upload with a declared lowercase-hex SHA-384 digest and size.
    pub fn new(inner: Box<dyn StreamingUpload>, declared_hash: &str, declared_size: u64) -> Self {
        Self {
            inner,
            hasher: Sha384::new(),
            declared_size,
            declared_hash: declared_hash.to_ascii_lowercase(),
            written: 0,
        }
    }

    /// Write a chunk of data.
    pub async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        let next = self.written + data.len() as u64;
        if next > self.declared_size {
            return Err(StorageError::SizeMismatch {
                declared: self.declared_size,
                actual: next,
            });
        }
        self.hasher.update(&data);
        self.written = next;
        self.inner.write(data).await
    }

    /// Verify the declared size and digest, then commit the upload.
    pub async fn finish(self) -> StorageResult<u64> {
        if self.written != self.declared_size {
            if let Err(e) = self.inner.abort().await {
                tracing::warn!(error = %e, "cannot abort failed upload");
            }
            return Err(StorageError::SizeMismatch {
                declared: self.declared_size,
                actual: self.written,
            });
        }
        let actual: String = self
            .hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        if actual != self.declared_hash {
            if let Err(e) = self.inner.abort().await {
                tracing::warn!(error = %e, "cannot abort failed upload");
            }
            return Err(StorageError::HashMismatch {
                expected: self.declared_hash,
                actual,
            });
        }
        self.inner.finish().await
    }

    /// Abort the upload.
    pub async fn abort(self) -> StorageResult<()> {
        self.inner.abort().await
    }
}

/// Drive a byte stream through a checked upload against the store.
///
/// Verifies the declared hash and size as bytes arrive; on any error,
/// including a failed source stream (client disconnect), the partial upload
/// is aborted and no blob is left under `name`.
pub async fn put_checked<S>(
    store: &dyn BlobStore,
    name: &str,
    mut body: S,
    declared_hash: &str,
    declared_size: u64,
) -> StorageResult<()>
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin,
{
    use futures::StreamExt;

    let mut upload = CheckedUpload::new(
        store.put_stream(name).await?,
        declared_hash,
        declared_size,
    );
    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                abort_quietly(upload).await;
                return Err(StorageError::Aborted(format!("upload stream failed: {e}")));
            }
        };
        if let Err(e) = upload.write(chunk).await {
            abort_quietly(upload).await;
            return Err(e);
        }
    }
    upload.finish().await?;
    Ok(())
}

/// Abort an upload, keeping the original failure as the reported error.
async fn abort_quietly(upload: CheckedUpload) {
    if let Err(e) = upload.abort().await {
        tracing::warn!(error = %e, "cannot abort failed upload");
    }
}
