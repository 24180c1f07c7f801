//! Local artifact cache backed by the filesystem

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::error::{AppError, ProviderError, Result};
use crate::provider::{shorten_url, GenerationProvider};

/// Locally stored copy of a provider artifact
#[derive(Debug, Clone, PartialEq)]
pub struct CachedArtifact {
    pub id: Uuid,
    pub local_url: String,
    pub format: String,
}

/// Copies remote artifacts into storage the service controls.
#[async_trait]
pub trait ArtifactCache: Send + Sync {
    async fn store(&self, remote_url: &str) -> Result<CachedArtifact>;
}

/// Writes `{uuid}.{ext}` files under a directory and serves them under a URL prefix.
pub struct FileArtifactCache {
    storage_path: PathBuf,
    url_prefix: String,
    max_bytes: usize,
    provider: Arc<dyn GenerationProvider>,
}

impl FileArtifactCache {
    pub fn new(config: &StorageConfig, provider: Arc<dyn GenerationProvider>) -> Self {
        Self {
            storage_path: PathBuf::from(&config.base_path),
            url_prefix: config.url_prefix.trim_end_matches('/').to_string(),
            max_bytes: config.max_artifact_bytes,
            provider,
        }
    }

    /// Ensure the storage directory exists
    pub async fn ensure_storage_dir(&self) -> Result<()> {
        if !self.storage_path.exists() {
            fs::create_dir_all(&self.storage_path).await?;
            debug!(path = ?self.storage_path, "Created storage directory");
        }
        Ok(())
    }

    pub fn path_of(&self, artifact: &CachedArtifact) -> PathBuf {
        self.storage_path
            .join(format!("{}.{}", artifact.id, artifact.format))
    }
}

#[async_trait]
impl ArtifactCache for FileArtifactCache {
    async fn store(&self, remote_url: &str) -> Result<CachedArtifact> {
        let data = self.provider.download_artifact(remote_url, self.max_bytes).await?;
        let format = detect_image_format(&data).ok_or_else(|| AppError::Provider {
            operation: "download",
            source: ProviderError::Malformed("artifact is not a recognised image".to_string()),
        })?;

        self.ensure_storage_dir().await?;

        let id = Uuid::new_v4();
        let filename = format!("{}.{}", id, format);
        let file_path = self.storage_path.join(&filename);
        fs::write(&file_path, &data).await?;

        debug!(
            source = %shorten_url(remote_url),
            path = ?file_path,
            size = data.len(),
            "Cached artifact"
        );

        Ok(CachedArtifact {
            id,
            local_url: format!("{}/{}", self.url_prefix, filename),
            format: format.to_string(),
        })
    }
}

/// Detect image format from binary data using magic bytes
pub fn detect_image_format(data: &[u8]) -> Option<&'static str> {
    if data.len() < 8 {
        return None;
    }

    // PNG: 89 50 4E 47 0D 0A 1A 0A
    if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some("png");
    }

    // JPEG: FF D8 FF
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("jpg");
    }

    // WebP: RIFF....WEBP
    if data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
        return Some("webp");
    }

    if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        return Some("gif");
    }

    None
}
