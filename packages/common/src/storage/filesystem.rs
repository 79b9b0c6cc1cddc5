use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};

use super::error::StorageError;
use super::hash::{ContentHash, ContentHasher};
use super::traits::{BoxReader, StoredObject, UploadStore};

/// Number of leading bytes a [`Stager`] keeps for content sniffing.
pub const HEAD_LEN: usize = 4096;

/// Filesystem-backed upload store rooted at the static directory.
///
/// Writes go to `{root}/.tmp` first and are renamed into place so readers
/// never observe a partial file.
#[derive(Debug, Clone)]
pub struct FilesystemUploadStore {
    root: PathBuf,
    max_size: u64,
}

impl FilesystemUploadStore {
    pub async fn new(root: PathBuf, max_size: u64) -> Result<Self, StorageError> {
        fs::create_dir_all(&root).await?;
        fs::create_dir_all(root.join(".tmp")).await?;
        Ok(Self { root, max_size })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative storage path, rejecting absolute paths and `..`.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let rel = Path::new(path);
        if path.is_empty() {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        for component in rel.components() {
            match component {
                Component::Normal(_) => {}
                _ => return Err(StorageError::InvalidPath(path.to_string())),
            }
        }
        Ok(self.root.join(rel))
    }

    fn temp_path(&self) -> PathBuf {
        self.root
            .join(".tmp")
            .join(uuid::Uuid::new_v4().to_string())
    }

    /// Begin a chunked upload capped at `max_size` bytes.
    pub async fn stager(&self, max_size: u64) -> Result<Stager, StorageError> {
        let temp_path = self.temp_path();
        let file = fs::File::create(&temp_path).await?;
        Ok(Stager {
            file: Some(file),
            staged: StagedFile {
                temp_path,
                hash: None,
                size: 0,
                head: Vec::with_capacity(HEAD_LEN),
                persisted: false,
            },
            hasher: ContentHasher::new(),
            max_size,
        })
    }

    /// Move a staged upload to `path`, creating parent directories.
    pub async fn persist(
        &self,
        mut staged: StagedFile,
        path: &str,
    ) -> Result<StoredObject, StorageError> {
        let dest = self.resolve(path)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&staged.temp_path, &dest).await?;
        staged.persisted = true;
        Ok(StoredObject {
            path: path.to_string(),
            hash: staged.hash(),
            size: staged.size,
        })
    }
}

#[async_trait]
impl UploadStore for FilesystemUploadStore {
    async fn put_stream(
        &self,
        path: &str,
        mut reader: BoxReader,
    ) -> Result<StoredObject, StorageError> {
        let mut stager = self.stager(self.max_size).await?;
        let mut buf = vec![0u8; 64 * 1024]; // 64KB read buffer
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            stager.write(&buf[..n]).await?;
        }
        let staged = stager.finish().await?;
        self.persist(staged, path).await
    }

    async fn get_stream(&self, path: &str) -> Result<BoxReader, StorageError> {
        let full = self.resolve(path)?;
        match fs::File::open(&full).await {
            Ok(file) => Ok(Box::new(BufReader::new(file))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        Ok(fs::try_exists(self.resolve(path)?).await?)
    }

    async fn delete(&self, path: &str) -> Result<bool, StorageError> {
        match fs::remove_file(self.resolve(path)?).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_dir(&self, path: &str) -> Result<bool, StorageError> {
        match fs::remove_dir_all(self.resolve(path)?).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Incremental writer for one upload field: hashes, counts and keeps the
/// first [`HEAD_LEN`] bytes while spooling to a temp file.
pub struct Stager {
    file: Option<fs::File>,
    staged: StagedFile,
    hasher: ContentHasher,
    max_size: u64,
}

impl Stager {
    pub async fn write(&mut self, chunk: &[u8]) -> Result<(), StorageError> {
        let actual = self.hasher.len() + chunk.len() as u64;
        if actual > self.max_size {
            // Dropping the staged file removes the partial write.
            self.file = None;
            return Err(StorageError::SizeLimitExceeded {
                actual,
                limit: self.max_size,
            });
        }
        let Some(file) = self.file.as_mut() else {
            return Err(StorageError::Io(std::io::Error::other("stager already closed")));
        };
        if self.staged.head.len() < HEAD_LEN {
            let take = (HEAD_LEN - self.staged.head.len()).min(chunk.len());
            self.staged.head.extend_from_slice(&chunk[..take]);
        }
        self.hasher.update(chunk);
        file.write_all(chunk).await?;
        Ok(())
    }

    pub async fn finish(mut self) -> Result<StagedFile, StorageError> {
        let Some(mut file) = self.file.take() else {
            return Err(StorageError::Io(std::io::Error::other("stager already closed")));
        };
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        let mut staged = std::mem::replace(
            &mut self.staged,
            StagedFile {
                temp_path: PathBuf::new(),
                hash: None,
                size: 0,
                head: Vec::new(),
                persisted: true,
            },
        );
        staged.size = self.hasher.len();
        staged.hash = Some(std::mem::take(&mut self.hasher).finish());
        Ok(staged)
    }
}

/// A fully written upload waiting in the temp area.
///
/// The temp file is removed on drop unless it was persisted.
#[derive(Debug)]
pub struct StagedFile {
    temp_path: PathBuf,
    hash: Option<ContentHash>,
    size: u64,
    head: Vec<u8>,
    persisted: bool,
}

impl StagedFile {
    pub fn hash(&self) -> ContentHash {
        self.hash.unwrap_or_else(|| ContentHash::compute(&[]))
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Leading bytes of the content, at most [`HEAD_LEN`].
    pub fn head(&self) -> &[u8] {
        &self.head
    }

    pub fn path(&self) -> &Path {
        &self.temp_path
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.persisted {
            let _ = std::fs::remove_file(&self.temp_path);
        }
    }
}
