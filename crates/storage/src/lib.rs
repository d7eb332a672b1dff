//! Blob storage abstraction and implementations for Emporium.
//!
//! The blob store holds one opaque byte container per uploaded archive,
//! addressed by a server-allocated name and authenticated by a SHA-384
//! digest verified as the bytes arrive.

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::filesystem::FilesystemStore;
pub use error::{StorageError, StorageResult};
pub use traits::{BlobStore, ByteStream, CheckedUpload, StreamingUpload, put_checked};

use std::sync::Arc;

/// Create a blob store from configuration.
pub async fn from_config(
    config: &emporium_core::config::StorageConfig,
) -> StorageResult<Arc<dyn BlobStore>> {
    match config {
        emporium_core::config::StorageConfig::Filesystem { path } => {
            let store = FilesystemStore::new(path).await?;
            Ok(Arc::new(store) as Arc<dyn BlobStore>)
        }
    }
}
