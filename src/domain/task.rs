//! Generation task record and its status graph

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{TaskId, UserId};
use crate::error::{AppError, Result};

/// Lifecycle status of a generation task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    ProcessingPrompt,
    Pending,
    Generating,
    RemovingBackground,
    Completed,
    Failed,
    Timeout,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::ProcessingPrompt => "PROCESSING_PROMPT",
            TaskStatus::Pending => "PENDING",
            TaskStatus::Generating => "GENERATING",
            TaskStatus::RemovingBackground => "REMOVING_BACKGROUND",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Timeout => "TIMEOUT",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Timeout
        )
    }

    /// Edges of the forward-only status graph.
    pub fn can_advance_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (ProcessingPrompt, Pending | Failed | Timeout) => true,
            (Pending, Generating) => true,
            (Generating, RemovingBackground | Completed | Failed | Timeout) => true,
            (RemovingBackground, Completed | Failed | Timeout) => true,
            _ => false,
        }
    }
}

/// Typed metadata bag carried by a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMetadata {
    /// -1 lets the provider choose
    pub seed: i64,
    pub size: String,
    pub output_format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style_preset_id: Option<i64>,
    pub remove_background: bool,
    pub original_prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_image_url: Option<String>,
    /// Provider- or stage-specific extras
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One user-initiated generation request and its pipeline state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationTask {
    pub task_id: TaskId,
    pub user_id: UserId,
    /// Raw prompt until enrichment completes, processed prompt afterwards
    pub prompt: String,
    pub status: TaskStatus,
    pub metadata: TaskMetadata,
    pub ledger_transaction_id: Option<Uuid>,
    pub cached_image_id: Option<Uuid>,
    pub image_url: Option<String>,
    pub sticker_file_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl GenerationTask {
    pub fn new(
        user_id: UserId,
        prompt: String,
        metadata: TaskMetadata,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id: TaskId::generate(),
            user_id,
            prompt,
            status: TaskStatus::ProcessingPrompt,
            metadata,
            ledger_transaction_id: None,
            cached_image_id: None,
            image_url: None,
            sticker_file_id: None,
            error_message: None,
            created_at: Utc::now(),
            expires_at,
            completed_at: None,
        }
    }

    /// Move to `next`, refusing anything that is not a forward edge.
    pub fn advance(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_advance_to(next) {
            return Err(AppError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Link the funding debit. Set at most once.
    pub fn attach_ledger_transaction(&mut self, id: Uuid) -> Result<()> {
        match self.ledger_transaction_id {
            Some(existing) if existing != id => Err(AppError::InvalidRequest(format!(
                "task {} is already funded by transaction {}",
                self.task_id, existing
            ))),
            _ => {
                self.ledger_transaction_id = Some(id);
                Ok(())
            }
        }
    }

    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.user_id == user_id
    }
}

/// Caller-facing projection of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub image_url: Option<String>,
    pub original_image_url: Option<String>,
    pub image_id: Option<String>,
    pub image_format: Option<String>,
    pub sticker_file_id: Option<String>,
    pub metadata: TaskMetadata,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&GenerationTask> for TaskView {
    fn from(task: &GenerationTask) -> Self {
        let image_format = task.cached_image_id.and_then(|_| {
            let url = task.image_url.as_deref()?;
            let file_name = url.rsplit('/').next()?;
            let (stem, ext) = file_name.rsplit_once('.')?;
            (!stem.is_empty()).then(|| ext.to_string())
        });

        Self {
            task_id: task.task_id.clone(),
            status: task.status,
            image_url: task.image_url.clone(),
            original_image_url: task.metadata.original_image_url.clone(),
            image_id: task.cached_image_id.map(|id| id.to_string()),
            image_format,
            sticker_file_id: task.sticker_file_id.clone(),
            metadata: task.metadata.clone(),
            error_message: task.error_message.clone(),
            created_at: task.created_at,
            completed_at: task.completed_at,
        }
    }
}
