mod error;
mod hash;
mod traits;

pub mod filesystem;

pub use error::StorageError;
pub use filesystem::{FilesystemUploadStore, StagedFile, Stager};
pub use hash::{ContentHash, ContentHasher};
pub use traits::{BoxReader, StoredObject, UploadStore};
