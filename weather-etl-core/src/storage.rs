use async_trait::async_trait;
use std::{
    fmt::Debug,
    path::{Component, Path, PathBuf},
};
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};

/// Location of one object: `s3://<bucket>/<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub bucket: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(bucket: impl Into<String>, name: impl Into<String>) -> Self {
        Self { bucket: bucket.into(), name: name.into() }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.name)
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid object key '{0}'")]
    InvalidKey(String),

    #[error("{0}")]
    Backend(String),
}

/// The one call the pipeline makes against object storage.
#[async_trait]
pub trait ObjectStore: Send + Sync + Debug {
    async fn put(&self, key: &ObjectKey, body: Vec<u8>) -> Result<(), StorageError>;
}

/// Object store backed by a directory: `s3://b/n` lands at `<root>/b/n`.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, key: &ObjectKey) -> Result<PathBuf, StorageError> {
        let safe = |part: &str| {
            !part.is_empty()
                && Path::new(part).components().all(|c| matches!(c, Component::Normal(_)))
        };

        if !safe(&key.bucket) || !safe(&key.name) || key.bucket.contains('/') {
            return Err(StorageError::InvalidKey(key.to_string()));
        }

        Ok(self.root.join(&key.bucket).join(&key.name))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &ObjectKey, body: Vec<u8>) -> Result<(), StorageError> {
        let path = self.path_for(key)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&path).await?;
        file.write_all(&body).await?;
        file.flush().await?;

        tracing::debug!(path = %path.display(), bytes = body.len(), "object stored");
        Ok(())
    }
}
