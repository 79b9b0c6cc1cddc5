use std::io::Cursor;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::error::StorageError;
use super::hash::ContentHash;

/// Type alias for a boxed async reader.
pub type BoxReader = Box<dyn AsyncRead + Unpin + Send>;

/// Result of writing an object into the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Path relative to the storage root, e.g. `uploads/chat/photo/abc.png`.
    pub path: String,
    pub hash: ContentHash,
    pub size: u64,
}

/// Path-addressed storage for user uploads and generated media.
///
/// All paths are relative to the storage root and use `/` separators.
#[async_trait]
pub trait UploadStore: Send + Sync {
    /// Store bytes at `path`, replacing anything already there.
    async fn put(&self, path: &str, data: &[u8]) -> Result<StoredObject, StorageError> {
        let reader: BoxReader = Box::new(Cursor::new(data.to_vec()));
        self.put_stream(path, reader).await
    }

    /// Store data from an async reader at `path`.
    async fn put_stream(&self, path: &str, reader: BoxReader)
    -> Result<StoredObject, StorageError>;

    /// Retrieve all bytes stored at `path`.
    async fn get(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let mut reader = self.get_stream(path).await?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        Ok(buf)
    }

    async fn get_stream(&self, path: &str) -> Result<BoxReader, StorageError>;

    async fn exists(&self, path: &str) -> Result<bool, StorageError>;

    /// Delete a single object.
    ///
    /// Returns `true` if the object was deleted, `false` if it did not exist.
    async fn delete(&self, path: &str) -> Result<bool, StorageError>;

    /// Recursively delete a directory of generated variants.
    async fn delete_dir(&self, path: &str) -> Result<bool, StorageError>;
}
