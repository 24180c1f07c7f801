//! Generation task orchestrator
//!
//! A task moves through
//! `PROCESSING_PROMPT -> PENDING -> GENERATING -> [REMOVING_BACKGROUND] -> COMPLETED`,
//! with `FAILED` and `TIMEOUT` as the other terminals. Each stage runs as its
//! own job on the [`WorkerPool`] and schedules the next one only after its
//! task and audit writes are done, so transitions of one task are strictly
//! ordered.

use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::audit::AuditTrail;
use crate::collaborators::{ArtifactCache, PromptProcessor};
use crate::config::GenerationConfig;
use crate::domain::{
    AuditStage, ErrorCode, GenerationTask, NewAuditEvent, Page, TaskId, TaskMetadata, TaskStatus,
    TaskView, UserId,
};
use crate::error::{AppError, Result};
use crate::ledger::{AwardRequest, Ledger};
use crate::pipeline::poller::{poll_until, EmptyCompletion, PollCadence, PollOutcome};
use crate::pipeline::worker_pool::WorkerPool;
use crate::provider::{shorten_url, GenerationProvider, JobRequest};
use crate::store::TaskStore;

/// Caller-chosen options of a generation request
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    pub seed: Option<i64>,
    pub style_preset_id: Option<i64>,
    /// Falls back to the configured default
    pub remove_background: Option<bool>,
}

/// Components the orchestrator drives
pub struct PipelineDeps {
    pub tasks: Arc<dyn TaskStore>,
    pub ledger: Arc<Ledger>,
    pub audit: AuditTrail,
    pub provider: Arc<dyn GenerationProvider>,
    pub prompts: Arc<dyn PromptProcessor>,
    pub cache: Arc<dyn ArtifactCache>,
    pub pool: Arc<WorkerPool>,
}

/// One unit of work on the pool
#[derive(Debug)]
enum Stage {
    ProcessPrompt {
        task_id: TaskId,
    },
    Generate {
        task_id: TaskId,
    },
    RemoveBackground {
        task_id: TaskId,
        source_url: String,
        deadline: Instant,
        provider_ids: Value,
    },
    Finalize {
        task_id: TaskId,
        artifact_url: String,
        provider_ids: Value,
    },
}

impl Stage {
    fn task_id(&self) -> &TaskId {
        match self {
            Stage::ProcessPrompt { task_id }
            | Stage::Generate { task_id }
            | Stage::RemoveBackground { task_id, .. }
            | Stage::Finalize { task_id, .. } => task_id,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Stage::ProcessPrompt { .. } => "process_prompt",
            Stage::Generate { .. } => "generate",
            Stage::RemoveBackground { .. } => "remove_background",
            Stage::Finalize { .. } => "finalize",
        }
    }
}

/// Drives generation tasks through their state machine.
#[derive(Clone)]
pub struct Orchestrator {
    tasks: Arc<dyn TaskStore>,
    ledger: Arc<Ledger>,
    audit: AuditTrail,
    provider: Arc<dyn GenerationProvider>,
    prompts: Arc<dyn PromptProcessor>,
    cache: Arc<dyn ArtifactCache>,
    pool: Arc<WorkerPool>,
    config: Arc<GenerationConfig>,
    audit_retention: chrono::Duration,
}

impl Orchestrator {
    pub fn new(
        deps: PipelineDeps,
        config: GenerationConfig,
        audit_retention_days: i64,
    ) -> Self {
        Self {
            tasks: deps.tasks,
            ledger: deps.ledger,
            audit: deps.audit,
            provider: deps.provider,
            prompts: deps.prompts,
            cache: deps.cache,
            pool: deps.pool,
            config: Arc::new(config),
            audit_retention: chrono::Duration::days(audit_retention_days),
        }
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Create and fund a task, then schedule prompt processing.
    ///
    /// Validation and funding failures leave nothing behind. Everything after
    /// the returned id is observable only through [`Orchestrator::get_status`].
    pub async fn submit(
        &self,
        user_id: UserId,
        prompt: &str,
        options: SubmitOptions,
    ) -> Result<TaskId> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(AppError::InvalidRequest("prompt must not be empty".to_string()));
        }
        if prompt.chars().count() > self.config.max_prompt_length {
            return Err(AppError::InvalidRequest(format!(
                "prompt exceeds {} characters",
                self.config.max_prompt_length
            )));
        }
        self.prompts.check_preset(user_id, options.style_preset_id)?;
        if !self.pool.has_capacity() {
            return Err(if self.pool.is_accepting() {
                AppError::QueueFull
            } else {
                AppError::ShuttingDown
            });
        }

        let metadata = TaskMetadata {
            seed: options.seed.unwrap_or(-1),
            size: self.config.output_size.clone(),
            output_format: self.config.output_format.clone(),
            style_preset_id: options.style_preset_id,
            remove_background: options
                .remove_background
                .unwrap_or(self.config.remove_background_default),
            original_prompt: prompt.to_string(),
            processed_prompt: None,
            original_image_url: None,
            extra: Default::default(),
        };
        let expires_at = Utc::now() + chrono::Duration::hours(self.config.task_retention_hours);
        let mut task = GenerationTask::new(user_id, prompt.to_string(), metadata, expires_at);
        let task_id = task.task_id.clone();

        self.tasks.insert(&task).await?;

        let debit = AwardRequest::new(user_id, self.config.debit_rule.as_str(), task_id.as_str())
            .metadata(json!({ "taskId": task_id }));
        let transaction = match self.ledger.award(debit).await {
            Ok(transaction) => transaction,
            Err(e) => {
                if let Err(delete_err) = self.tasks.delete(&task_id).await {
                    error!(task_id = %task_id, error = %delete_err, "Failed to remove unfunded task");
                }
                info!(task_id = %task_id, user_id, error = %e, "Submission rejected by ledger");
                return Err(e);
            }
        };

        task.attach_ledger_transaction(transaction.id)?;
        self.tasks.update(&task).await?;

        let request_params = json!({
            "seed": task.metadata.seed,
            "size": task.metadata.size,
            "outputFormat": task.metadata.output_format,
            "stylePresetId": task.metadata.style_preset_id,
            "removeBackground": task.metadata.remove_background,
        });
        self.audit
            .start_session(
                &task_id,
                user_id,
                prompt,
                request_params,
                Utc::now() + self.audit_retention,
            )
            .await;

        info!(
            task_id = %task_id,
            user_id,
            prompt_len = prompt.len(),
            remove_background = task.metadata.remove_background,
            "Generation task accepted"
        );

        if let Err(e) = self.dispatch(Stage::ProcessPrompt {
            task_id: task_id.clone(),
        }) {
            if let Err(fail_err) = self
                .fail(
                    &mut task,
                    TaskStatus::Failed,
                    ErrorCode::GenerationError,
                    "task could not be scheduled",
                    None,
                )
                .await
            {
                error!(task_id = %task_id, error = %fail_err, "Failed to mark unscheduled task as failed");
            }
            return Err(e);
        }

        Ok(task_id)
    }

    /// Current state of a task, visible to its owner and to admins.
    pub async fn get_status(
        &self,
        task_id: &TaskId,
        requester_id: UserId,
        is_admin: bool,
    ) -> Result<TaskView> {
        let task = self
            .tasks
            .get(task_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("task {}", task_id)))?;

        if !is_admin && !task.is_owned_by(requester_id) {
            return Err(AppError::AccessDenied(format!("task {}", task_id)));
        }
        Ok(TaskView::from(&task))
    }

    /// Tasks of a user, newest first.
    pub async fn list_history(&self, user_id: UserId, page: Page) -> Result<Vec<TaskView>> {
        let tasks = self.tasks.list_by_user(user_id, page).await?;
        Ok(tasks.iter().map(TaskView::from).collect())
    }

    /// Attach the identifier of the published sticker to a completed task.
    pub async fn record_published_sticker(
        &self,
        task_id: &TaskId,
        requester_id: UserId,
        sticker_file_id: &str,
    ) -> Result<TaskView> {
        let mut task = self
            .tasks
            .get(task_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("task {}", task_id)))?;

        if !task.is_owned_by(requester_id) {
            return Err(AppError::AccessDenied(format!("task {}", task_id)));
        }
        if task.status != TaskStatus::Completed {
            return Err(AppError::InvalidRequest(format!(
                "task {} is {}, not COMPLETED",
                task_id,
                task.status.as_str()
            )));
        }

        task.sticker_file_id = Some(sticker_file_id.to_string());
        self.tasks.update(&task).await?;
        Ok(TaskView::from(&task))
    }

    fn dispatch(&self, stage: Stage) -> Result<()> {
        debug!(task_id = %stage.task_id(), stage = stage.name(), "Dispatching stage");
        let this = self.clone();
        self.pool.spawn(async move { this.run(stage).await })
    }

    /// Run a stage and turn unexpected errors into a failed task.
    async fn run(self, stage: Stage) {
        let task_id = stage.task_id().clone();
        let name = stage.name();

        let result = match stage {
            Stage::ProcessPrompt { task_id } => self.process_prompt(&task_id).await,
            Stage::Generate { task_id } => self.generate(&task_id).await,
            Stage::RemoveBackground {
                task_id,
                source_url,
                deadline,
                provider_ids,
            } => {
                self.remove_background(&task_id, source_url, deadline, provider_ids)
                    .await
            }
            Stage::Finalize {
                task_id,
                artifact_url,
                provider_ids,
            } => self.finalize(&task_id, artifact_url, provider_ids).await,
        };

        if let Err(e) = result {
            error!(task_id = %task_id, stage = name, error = %e, "Stage failed unexpectedly");
            self.abort(&task_id, &e).await;
        }
    }

    async fn load(&self, task_id: &TaskId) -> Result<GenerationTask> {
        self.tasks
            .get(task_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("task {}", task_id)))
    }

    async fn process_prompt(&self, task_id: &TaskId) -> Result<()> {
        let mut task = self.load(task_id).await?;

        let processed = match self
            .prompts
            .process(
                &task.metadata.original_prompt,
                task.user_id,
                task.metadata.style_preset_id,
            )
            .await
        {
            Ok(processed) => processed,
            Err(e) => {
                let message = format!("prompt processing failed: {}", e);
                self.audit
                    .record_stage(NewAuditEvent::failed(
                        task_id,
                        AuditStage::PromptProcessingFailed,
                        ErrorCode::PromptProcessingError,
                        message.as_str(),
                        None,
                    ))
                    .await;
                return self
                    .fail(
                        &mut task,
                        TaskStatus::Failed,
                        ErrorCode::PromptProcessingError,
                        &message,
                        None,
                    )
                    .await;
            }
        };

        task.prompt = processed.clone();
        task.metadata.processed_prompt = Some(processed.clone());
        task.advance(TaskStatus::Pending)?;
        self.tasks.update(&task).await?;

        self.audit
            .mark_prompt_processed(
                task_id,
                &processed,
                Some(json!({ "promptLength": processed.len() })),
            )
            .await;
        debug!(task_id = %task_id, prompt_len = processed.len(), "Prompt processed");

        self.dispatch_or_log(Stage::Generate {
            task_id: task_id.clone(),
        });
        Ok(())
    }

    async fn generate(&self, task_id: &TaskId) -> Result<()> {
        let mut task = self.load(task_id).await?;
        task.advance(TaskStatus::Generating)?;
        self.tasks.update(&task).await?;

        // One window covers submission, generation and background removal
        let deadline = Instant::now() + self.config.max_poll();
        let job = JobRequest::TextToImage {
            prompt: task.prompt.clone(),
            size: task.metadata.size.clone(),
            output_format: task.metadata.output_format.clone(),
            seed: task.metadata.seed,
            num_images: 1,
            strength: self.config.strength,
        };

        let request_id = match self.provider.submit_job(&job).await {
            Ok(request_id) => request_id,
            Err(e) => {
                let message = e.to_string();
                self.audit
                    .record_stage(NewAuditEvent::failed(
                        task_id,
                        AuditStage::ProviderSubmit,
                        ErrorCode::ProviderSubmitError,
                        message.as_str(),
                        None,
                    ))
                    .await;
                return self
                    .fail(
                        &mut task,
                        TaskStatus::Failed,
                        ErrorCode::ProviderSubmitError,
                        &message,
                        None,
                    )
                    .await;
            }
        };
        self.audit
            .record_stage(NewAuditEvent::succeeded(
                task_id,
                AuditStage::ProviderSubmit,
                Some(json!({ "requestId": request_id })),
            ))
            .await;

        let provider_ids = json!({ "generation": request_id });
        let mut shutdown = self.pool.subscribe_shutdown();

        let outcome = poll_until(
            self.provider.as_ref(),
            &request_id,
            deadline,
            PollCadence::from_config(&self.config),
            EmptyCompletion::Settle,
            &mut shutdown,
        )
        .await;

        match outcome {
            PollOutcome::Completed { output_url, polls } => {
                info!(
                    task_id = %task_id,
                    request_id = %request_id,
                    polls,
                    output = %shorten_url(&output_url),
                    "Generation completed"
                );
                self.audit
                    .record_stage(NewAuditEvent::succeeded(
                        task_id,
                        AuditStage::ProviderResult,
                        Some(json!({ "requestId": request_id, "outputUrl": output_url, "polls": polls })),
                    ))
                    .await;

                let next = if task.metadata.remove_background {
                    Stage::RemoveBackground {
                        task_id: task_id.clone(),
                        source_url: output_url,
                        deadline,
                        provider_ids,
                    }
                } else {
                    Stage::Finalize {
                        task_id: task_id.clone(),
                        artifact_url: output_url,
                        provider_ids,
                    }
                };
                self.dispatch_or_log(next);
                Ok(())
            }
            PollOutcome::Failed(reason) => {
                warn!(task_id = %task_id, request_id = %request_id, reason = %reason, "Generation failed");
                self.audit
                    .record_stage(NewAuditEvent::failed(
                        task_id,
                        AuditStage::ProviderResult,
                        ErrorCode::ProviderFailed,
                        reason.as_str(),
                        Some(json!({ "requestId": request_id })),
                    ))
                    .await;
                self.fail(
                    &mut task,
                    TaskStatus::Failed,
                    ErrorCode::ProviderFailed,
                    &reason,
                    Some(provider_ids),
                )
                .await
            }
            PollOutcome::TimedOut { polls } => {
                let message = format!(
                    "generation did not finish within {}s",
                    self.config.max_poll_secs
                );
                self.time_out(&mut task, &request_id, polls, &message, provider_ids)
                    .await
            }
            PollOutcome::NoOutputs { polls } => {
                self.time_out(
                    &mut task,
                    &request_id,
                    polls,
                    "generation completed without an image",
                    provider_ids,
                )
                .await
            }
            PollOutcome::Interrupted => {
                info!(task_id = %task_id, request_id = %request_id, "Generation polling interrupted");
                Ok(())
            }
        }
    }

    /// Generation produced no usable image before giving up.
    async fn time_out(
        &self,
        task: &mut GenerationTask,
        request_id: &str,
        polls: u32,
        message: &str,
        provider_ids: Value,
    ) -> Result<()> {
        warn!(task_id = %task.task_id, request_id, polls, reason = message, "Generation timed out");
        self.audit
            .record_stage(NewAuditEvent::failed(
                &task.task_id,
                AuditStage::ProviderResult,
                ErrorCode::ProviderTimeout,
                message,
                Some(json!({ "requestId": request_id, "polls": polls })),
            ))
            .await;
        self.fail(
            task,
            TaskStatus::Timeout,
            ErrorCode::ProviderTimeout,
            message,
            Some(provider_ids),
        )
        .await
    }

    async fn remove_background(
        &self,
        task_id: &TaskId,
        source_url: String,
        deadline: Instant,
        mut provider_ids: Value,
    ) -> Result<()> {
        let mut task = self.load(task_id).await?;
        task.advance(TaskStatus::RemovingBackground)?;
        self.tasks.update(&task).await?;

        let job = JobRequest::RemoveBackground {
            image_url: source_url.clone(),
        };

        let outcome = match self.provider.submit_job(&job).await {
            Ok(request_id) => {
                provider_ids["backgroundRemoval"] = json!(request_id);
                let mut shutdown = self.pool.subscribe_shutdown();
                let outcome = poll_until(
                    self.provider.as_ref(),
                    &request_id,
                    deadline,
                    PollCadence::from_config(&self.config),
                    EmptyCompletion::KeepPolling,
                    &mut shutdown,
                )
                .await;
                if outcome == PollOutcome::Interrupted {
                    info!(task_id = %task_id, "Background removal polling interrupted");
                    return Ok(());
                }
                outcome
            }
            Err(e) => PollOutcome::Failed(e.to_string()),
        };

        let artifact_url = match outcome {
            PollOutcome::Completed { output_url, .. } => {
                self.audit
                    .record_stage(NewAuditEvent::succeeded(
                        task_id,
                        AuditStage::BackgroundRemove,
                        Some(json!({ "outputUrl": output_url })),
                    ))
                    .await;
                output_url
            }
            other => {
                let reason = match other {
                    PollOutcome::TimedOut { polls } => {
                        format!("background removal timed out after {} polls", polls)
                    }
                    PollOutcome::Failed(reason) => reason,
                    _ => "background removal did not complete".to_string(),
                };
                warn!(
                    task_id = %task_id,
                    reason = %reason,
                    "Background removal failed, keeping generated artifact"
                );
                self.audit
                    .record_stage(NewAuditEvent::failed(
                        task_id,
                        AuditStage::BackgroundRemove,
                        ErrorCode::BackgroundRemoveError,
                        reason.as_str(),
                        Some(json!({ "fallbackUrl": source_url })),
                    ))
                    .await;
                source_url
            }
        };

        self.dispatch_or_log(Stage::Finalize {
            task_id: task_id.clone(),
            artifact_url,
            provider_ids,
        });
        Ok(())
    }

    async fn finalize(&self, task_id: &TaskId, artifact_url: String, provider_ids: Value) -> Result<()> {
        let mut task = self.load(task_id).await?;

        match self.cache.store(&artifact_url).await {
            Ok(cached) => {
                self.audit
                    .record_stage(NewAuditEvent::succeeded(
                        task_id,
                        AuditStage::ImageCache,
                        Some(json!({ "imageId": cached.id, "format": cached.format })),
                    ))
                    .await;
                task.cached_image_id = Some(cached.id);
                task.image_url = Some(cached.local_url);
            }
            Err(e) => {
                warn!(
                    task_id = %task_id,
                    url = %shorten_url(&artifact_url),
                    error = %e,
                    "Artifact caching failed, serving provider URL"
                );
                self.audit
                    .record_stage(NewAuditEvent::failed(
                        task_id,
                        AuditStage::ImageCache,
                        ErrorCode::ImageCacheError,
                        e.to_string(),
                        None,
                    ))
                    .await;
                task.image_url = Some(artifact_url.clone());
            }
        }

        task.metadata.original_image_url = Some(artifact_url);
        task.advance(TaskStatus::Completed)?;
        task.completed_at = Some(Utc::now());
        self.tasks.update(&task).await?;

        self.audit.finish_success(task_id, provider_ids).await;
        info!(task_id = %task_id, user_id = task.user_id, "Generation task completed");
        Ok(())
    }

    /// Move `task` to a failure terminal and close its audit session.
    async fn fail(
        &self,
        task: &mut GenerationTask,
        terminal: TaskStatus,
        code: ErrorCode,
        message: &str,
        provider_ids: Option<Value>,
    ) -> Result<()> {
        task.advance(terminal)?;
        task.error_message = Some(message.to_string());
        task.completed_at = Some(Utc::now());
        self.tasks.update(task).await?;

        let payload = json!({
            "status": terminal.as_str(),
            "providerIds": provider_ids,
        });
        self.audit
            .finish_failure(&task.task_id, code, message, Some(payload))
            .await;
        warn!(
            task_id = %task.task_id,
            status = terminal.as_str(),
            code = code.as_str(),
            "Generation task failed"
        );
        Ok(())
    }

    /// Best-effort FAILED transition after an unexpected stage error.
    async fn abort(&self, task_id: &TaskId, cause: &AppError) {
        let mut task = match self.tasks.get(task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => return,
            Err(e) => {
                error!(task_id = %task_id, error = %e, "Cannot load task to abort it");
                return;
            }
        };
        if !task.status.can_advance_to(TaskStatus::Failed) {
            return;
        }
        let message = format!("internal error: {}", cause);
        if let Err(e) = self
            .fail(&mut task, TaskStatus::Failed, ErrorCode::GenerationError, &message, None)
            .await
        {
            error!(task_id = %task_id, error = %e, "Failed to mark task as failed");
        }
    }

    /// Schedule the next stage from inside a running one. A refusal leaves
    /// the task at its last persisted status.
    fn dispatch_or_log(&self, stage: Stage) {
        let task_id = stage.task_id().clone();
        let name = stage.name();
        if let Err(e) = self.dispatch(stage) {
            warn!(task_id = %task_id, stage = name, error = %e, "Next stage not scheduled");
        }
    }
}
