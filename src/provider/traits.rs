//! Common traits and types for the generation provider

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Job submitted to the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobRequest {
    TextToImage {
        prompt: String,
        size: String,
        output_format: String,
        /// -1 lets the provider pick
        seed: i64,
        num_images: u32,
        strength: f64,
    },
    RemoveBackground {
        image_url: String,
    },
}

impl JobRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            JobRequest::TextToImage { .. } => "text_to_image",
            JobRequest::RemoveBackground { .. } => "remove_background",
        }
    }
}

/// Provider-side job state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Created,
    Processing,
    Completed,
    Failed,
    /// No usable answer yet (not found, transport error, garbage)
    Unknown,
}

impl JobStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "created" | "queued" | "pending" => JobStatus::Created,
            "processing" | "running" | "in_progress" => JobStatus::Processing,
            "completed" | "succeeded" => JobStatus::Completed,
            "failed" | "error" => JobStatus::Failed,
            _ => JobStatus::Unknown,
        }
    }
}

/// Snapshot returned by one poll
#[derive(Debug, Clone, PartialEq)]
pub struct PollResult {
    pub status: JobStatus,
    pub outputs: Vec<String>,
    pub error: Option<String>,
}

impl PollResult {
    pub fn unknown() -> Self {
        Self {
            status: JobStatus::Unknown,
            outputs: Vec::new(),
            error: None,
        }
    }

    pub fn first_output(&self) -> Option<&str> {
        self.outputs.first().map(String::as_str)
    }
}

/// External image generation provider
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Submit a job and return the provider request id. Retries transient
    /// failures internally.
    async fn submit_job(&self, job: &JobRequest) -> Result<String>;

    /// Single best-effort status read. Never fails: anything that is not a
    /// well-formed answer comes back as [`JobStatus::Unknown`].
    async fn poll_result(&self, request_id: &str) -> PollResult;

    /// Fetch an artifact, refusing payloads larger than `max_bytes`.
    async fn download_artifact(&self, url: &str, max_bytes: usize) -> Result<Vec<u8>>;
}
