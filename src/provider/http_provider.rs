//! HTTP provider client implementation

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::ProviderConfig;
use crate::error::{AppError, ProviderError, Result};
use crate::provider::data_url;
use crate::provider::retry::RetryPolicy;
use crate::provider::shorten_url;
use crate::provider::traits::{GenerationProvider, JobRequest, JobStatus, PollResult};

/// Client for a WaveSpeed-style asynchronous prediction API
pub struct HttpProvider {
    client: Client,
    base_url: String,
    api_key: String,
    text_to_image_model: String,
    background_removal_model: String,
    retry: RetryPolicy,
}

impl HttpProvider {
    /// Create a new provider client from configuration
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.read_timeout_ms))
            .build()
            .map_err(|e| AppError::Provider {
                operation: "build_client",
                source: ProviderError::Transport(e),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            text_to_image_model: config.text_to_image_model.clone(),
            background_removal_model: config.background_removal_model.clone(),
            retry: RetryPolicy::new(
                config.submit_attempts,
                Duration::from_millis(config.backoff_unit_ms),
            ),
        })
    }

    fn submit_url(&self, job: &JobRequest) -> String {
        let model = match job {
            JobRequest::TextToImage { .. } => &self.text_to_image_model,
            JobRequest::RemoveBackground { .. } => &self.background_removal_model,
        };
        format!("{}/{}", self.base_url, model.trim_matches('/'))
    }

    fn result_url(&self, request_id: &str) -> String {
        format!("{}/predictions/{}/result", self.base_url, request_id)
    }

    async fn submit_once(&self, url: &str, payload: &Value) -> std::result::Result<String, ProviderError> {
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response.json().await?;
        extract_request_id(&body)
            .ok_or_else(|| ProviderError::Malformed("response carries no request id".to_string()))
    }

    async fn fetch(&self, url: &str, max_bytes: usize) -> std::result::Result<Vec<u8>, ProviderError> {
        let mut response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        if let Some(length) = response.content_length() {
            if length > max_bytes as u64 {
                return Err(ProviderError::TooLarge { limit: max_bytes });
            }
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if bytes.len() + chunk.len() > max_bytes {
                return Err(ProviderError::TooLarge { limit: max_bytes });
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok(bytes)
    }
}

/// Wire payload for a job
fn build_payload(job: &JobRequest) -> Value {
    match job {
        JobRequest::TextToImage {
            prompt,
            size,
            output_format,
            seed,
            num_images,
            strength,
        } => json!({
            "enable_base64_output": false,
            "enable_sync_mode": false,
            "image": "",
            "num_images": num_images,
            "output_format": output_format,
            "prompt": prompt,
            "seed": seed,
            "size": size,
            "strength": strength,
        }),
        JobRequest::RemoveBackground { image_url } => json!({
            "enable_base64_output": false,
            "enable_sync_mode": false,
            "image": image_url,
        }),
    }
}

/// Request id from `data.id`, `data.requestId`, `id` or `requestId`
fn extract_request_id(body: &Value) -> Option<String> {
    let candidates = [
        body.pointer("/data/id"),
        body.pointer("/data/requestId"),
        body.get("id"),
        body.get("requestId"),
    ];
    candidates
        .into_iter()
        .flatten()
        .find_map(|v| v.as_str().filter(|s| !s.is_empty()).map(str::to_string))
}

/// Poll body, with fields optionally nested under `data`
fn parse_poll_body(body: &Value) -> PollResult {
    let inner = body.get("data").filter(|d| d.is_object()).unwrap_or(body);

    let status = inner
        .get("status")
        .and_then(Value::as_str)
        .map(JobStatus::parse)
        .unwrap_or(JobStatus::Unknown);
    let outputs = inner
        .get("outputs")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    let error = inner
        .get("error")
        .and_then(Value::as_str)
        .filter(|e| !e.is_empty())
        .map(str::to_string);

    PollResult {
        status,
        outputs,
        error,
    }
}

#[async_trait]
impl GenerationProvider for HttpProvider {
    async fn submit_job(&self, job: &JobRequest) -> Result<String> {
        let url = self.submit_url(job);
        let payload = build_payload(job);

        debug!(kind = job.kind(), url = %url, "Submitting provider job");

        let request_id = self
            .retry
            .run("submit", || self.submit_once(&url, &payload))
            .await?;

        info!(kind = job.kind(), request_id = %request_id, "Provider job submitted");
        Ok(request_id)
    }

    async fn poll_result(&self, request_id: &str) -> PollResult {
        let response = match self
            .client
            .get(self.result_url(request_id))
            .bearer_auth(&self.api_key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                debug!(request_id, error = %e, "Poll transport error");
                return PollResult::unknown();
            }
        };

        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!(request_id, "Provider job not visible yet");
                return PollResult::unknown();
            }
            status if !status.is_success() => {
                debug!(request_id, status = status.as_u16(), "Poll returned non-success");
                return PollResult::unknown();
            }
            _ => {}
        }

        match response.json::<Value>().await {
            Ok(body) => {
                let result = parse_poll_body(&body);
                debug!(
                    request_id,
                    status = ?result.status,
                    outputs = result.outputs.len(),
                    "Polled provider job"
                );
                result
            }
            Err(e) => {
                warn!(request_id, error = %e, "Unreadable poll response");
                PollResult::unknown()
            }
        }
    }

    async fn download_artifact(&self, url: &str, max_bytes: usize) -> Result<Vec<u8>> {
        let result = if data_url::is_data_url(url) {
            data_url::decode(url, max_bytes)
        } else {
            self.fetch(url, max_bytes).await
        };

        match result {
            Ok(bytes) => {
                debug!(url = %shorten_url(url), size = bytes.len(), "Downloaded artifact");
                Ok(bytes)
            }
            Err(e) => Err(AppError::Provider {
                operation: "download",
                source: e,
            }),
        }
    }
}
