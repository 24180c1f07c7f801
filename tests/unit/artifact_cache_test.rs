//! Unit tests for the filesystem artifact cache

use base64::Engine;
use gen_orchestrator::collaborators::{ArtifactCache, FileArtifactCache};
use gen_orchestrator::config::{ProviderConfig, StorageConfig};
use gen_orchestrator::provider::HttpProvider;
use std::sync::Arc;

fn cache(dir: &tempfile::TempDir, max_bytes: usize) -> FileArtifactCache {
    let provider = HttpProvider::new(&ProviderConfig {
        api_key: "unused".to_string(),
        ..Default::default()
    })
    .unwrap();
    let storage = StorageConfig {
        base_path: dir.path().join("images").to_string_lossy().to_string(),
        url_prefix: "http://localhost/images/".to_string(),
        max_artifact_bytes: max_bytes,
    };
    FileArtifactCache::new(&storage, Arc::new(provider))
}

fn data_url(bytes: &[u8]) -> String {
    format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

fn jpeg() -> Vec<u8> {
    let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0];
    bytes.extend_from_slice(&[0u8; 28]);
    bytes
}

#[test]
fn test_inline_artifact_is_written_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let cache = cache(&dir, 1024);

    let cached = tokio_test::block_on(cache.store(&data_url(&jpeg()))).unwrap();

    // Format comes from the bytes, not the declared media type
    assert_eq!(cached.format, "jpg");
    assert_eq!(
        cached.local_url,
        format!("http://localhost/images/{}.jpg", cached.id)
    );
    assert_eq!(std::fs::read(cache.path_of(&cached)).unwrap(), jpeg());
}

#[test]
fn test_non_image_payload_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let cache = cache(&dir, 1024);

    let result = tokio_test::block_on(cache.store(&data_url(b"<html>not an image</html>")));

    assert!(result.is_err());
    assert!(!dir.path().join("images").exists());
}

#[test]
fn test_oversized_artifact_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let cache = cache(&dir, 16);

    assert!(tokio_test::block_on(cache.store(&data_url(&jpeg()))).is_err());
}
