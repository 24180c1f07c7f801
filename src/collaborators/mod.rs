//! Collaborators consumed by the pipeline: prompt enrichment and artifact caching

pub mod cache;
pub mod prompt;

pub use cache::{detect_image_format, ArtifactCache, CachedArtifact, FileArtifactCache};
pub use prompt::{PresetPromptProcessor, PromptProcessor};
