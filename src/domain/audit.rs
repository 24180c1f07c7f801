//! Audit session and event records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{TaskId, UserId};

/// Pipeline stage an audit event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStage {
    RequestAccepted,
    PromptProcessingSucceeded,
    PromptProcessingFailed,
    ProviderSubmit,
    ProviderResult,
    BackgroundRemove,
    ImageCache,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventOutcome {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditFinalStatus {
    Completed,
    Failed,
}

/// Stage-specific failure codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    PromptProcessingError,
    ProviderSubmitError,
    ProviderTimeout,
    ProviderFailed,
    ImageCacheError,
    BackgroundRemoveError,
    GenerationError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::PromptProcessingError => "PROMPT_PROCESSING_ERROR",
            ErrorCode::ProviderSubmitError => "PROVIDER_SUBMIT_ERROR",
            ErrorCode::ProviderTimeout => "PROVIDER_TIMEOUT",
            ErrorCode::ProviderFailed => "PROVIDER_FAILED",
            ErrorCode::ImageCacheError => "IMAGE_CACHE_ERROR",
            ErrorCode::BackgroundRemoveError => "BACKGROUND_REMOVE_ERROR",
            ErrorCode::GenerationError => "GENERATION_ERROR",
        }
    }
}

/// Forensic record of one task, keyed 1:1 by task id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditSession {
    pub task_id: TaskId,
    pub user_id: UserId,
    pub raw_prompt: String,
    pub processed_prompt: Option<String>,
    pub request_params: serde_json::Value,
    pub provider_ids: Option<serde_json::Value>,
    pub final_status: Option<AuditFinalStatus>,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

impl AuditSession {
    pub fn has_error(&self) -> bool {
        self.error_code.is_some()
    }
}

/// Append-only stage event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    /// Store-assigned, monotonic; breaks timestamp ties
    pub sequence: u64,
    pub task_id: TaskId,
    pub stage: AuditStage,
    pub outcome: EventOutcome,
    pub payload: Option<serde_json::Value>,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Event before the store has sequenced it.
#[derive(Debug, Clone)]
pub struct NewAuditEvent {
    pub task_id: TaskId,
    pub stage: AuditStage,
    pub outcome: EventOutcome,
    pub payload: Option<serde_json::Value>,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
}

impl NewAuditEvent {
    pub fn succeeded(task_id: &TaskId, stage: AuditStage, payload: Option<serde_json::Value>) -> Self {
        Self {
            task_id: task_id.clone(),
            stage,
            outcome: EventOutcome::Succeeded,
            payload,
            error_code: None,
            error_message: None,
        }
    }

    pub fn failed(
        task_id: &TaskId,
        stage: AuditStage,
        code: ErrorCode,
        message: impl Into<String>,
        payload: Option<serde_json::Value>,
    ) -> Self {
        Self {
            task_id: task_id.clone(),
            stage,
            outcome: EventOutcome::Failed,
            payload,
            error_code: Some(code),
            error_message: Some(message.into()),
        }
    }
}
