//! Filesystem-backed blob store, served back over HTTP by `media_router`.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use slipscan_core::{BlobStore, SlipError, SlipResult, StoredBlob};
use tracing::info;

/// Map a blob key onto a path under `root`, refusing anything that could
/// escape it.
pub fn resolve_key(root: &Path, key: &str) -> SlipResult<PathBuf> {
    if key.is_empty() || key.contains('\\') {
        return Err(SlipError::Storage(format!("invalid blob key '{key}'")));
    }
    let relative = Path::new(key);
    let mut path = root.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => path.push(part),
            _ => return Err(SlipError::Storage(format!("invalid blob key '{key}'"))),
        }
    }
    if key.split('/').any(str::is_empty) {
        return Err(SlipError::Storage(format!("invalid blob key '{key}'")));
    }
    Ok(path)
}

pub struct LocalBlobStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn public_url(&self, key: &str) -> String {
        format!("{}/media/{key}", self.public_base_url)
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn put(&self, key: &str, data: Bytes, _content_type: &str) -> SlipResult<StoredBlob> {
        let path = resolve_key(&self.root, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &data).await?;
        info!(key, bytes = data.len(), path = %path.display(), "Stored receipt image on disk");
        Ok(StoredBlob {
            key: key.to_string(),
            url: self.public_url(key),
        })
    }

    async fn get(&self, key: &str) -> SlipResult<Bytes> {
        let path = resolve_key(&self.root, key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SlipError::NotFound(format!("blob '{key}'")))
            }
            Err(e) => Err(e.into()),
        }
    }
}
