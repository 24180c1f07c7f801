//! Audit trail recorder
//!
//! [`AuditTrail`] has no error channel: every store failure is logged and
//! dropped so the generation flow never depends on audit persistence.
//! Read access lives in [`query::AuditQuery`].

pub mod query;

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::{
    AuditFinalStatus, AuditSession, AuditStage, ErrorCode, NewAuditEvent, TaskId, UserId,
};
use crate::error::Result;
use crate::store::AuditStore;

pub use query::AuditQuery;

/// Best-effort writer of audit sessions and events.
#[derive(Clone)]
pub struct AuditTrail {
    store: Arc<dyn AuditStore>,
}

impl AuditTrail {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// Open the session of a task and record `REQUEST_ACCEPTED`.
    pub async fn start_session(
        &self,
        task_id: &TaskId,
        user_id: UserId,
        raw_prompt: &str,
        request_params: Value,
        expires_at: DateTime<Utc>,
    ) {
        let result = self
            .try_start_session(task_id, user_id, raw_prompt, request_params, expires_at)
            .await;
        log_failure(task_id, "start_session", result);
    }

    /// Store the enriched prompt and record `PROMPT_PROCESSING_SUCCEEDED`.
    pub async fn mark_prompt_processed(
        &self,
        task_id: &TaskId,
        processed_prompt: &str,
        payload: Option<Value>,
    ) {
        let result = self
            .try_mark_prompt_processed(task_id, processed_prompt, payload)
            .await;
        log_failure(task_id, "mark_prompt_processed", result);
    }

    /// Append one stage event. No-op when the task has no session.
    pub async fn record_stage(&self, event: NewAuditEvent) {
        let task_id = event.task_id.clone();
        let result = self.try_record_stage(event).await;
        log_failure(&task_id, "record_stage", result);
    }

    /// Close the session as COMPLETED. `final_payload` becomes the provider id snapshot.
    pub async fn finish_success(&self, task_id: &TaskId, final_payload: Value) {
        let result = self.try_finish_success(task_id, final_payload).await;
        log_failure(task_id, "finish_success", result);
    }

    /// Close the session as FAILED with a stage error code.
    pub async fn finish_failure(
        &self,
        task_id: &TaskId,
        code: ErrorCode,
        message: &str,
        payload: Option<Value>,
    ) {
        let result = self.try_finish_failure(task_id, code, message, payload).await;
        log_failure(task_id, "finish_failure", result);
    }

    /// Delete sessions past their expiry. Returns 0 when the sweep fails.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        match self.store.delete_expired(now).await {
            Ok(deleted) => deleted,
            Err(e) => {
                warn!(error = %e, "Audit retention sweep failed");
                0
            }
        }
    }

    async fn try_start_session(
        &self,
        task_id: &TaskId,
        user_id: UserId,
        raw_prompt: &str,
        request_params: Value,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let session = AuditSession {
            task_id: task_id.clone(),
            user_id,
            raw_prompt: raw_prompt.to_string(),
            processed_prompt: None,
            request_params: request_params.clone(),
            provider_ids: None,
            final_status: None,
            error_code: None,
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
            expires_at,
        };
        self.store.insert_session(&session).await?;
        self.store
            .append_event(NewAuditEvent::succeeded(
                task_id,
                AuditStage::RequestAccepted,
                Some(request_params),
            ))
            .await?;
        Ok(())
    }

    async fn try_mark_prompt_processed(
        &self,
        task_id: &TaskId,
        processed_prompt: &str,
        payload: Option<Value>,
    ) -> Result<()> {
        let Some(mut session) = self.store.find_session(task_id).await? else {
            debug!(task_id = %task_id, "No audit session, skipping prompt update");
            return Ok(());
        };
        session.processed_prompt = Some(processed_prompt.to_string());
        self.store.update_session(&session).await?;
        self.store
            .append_event(NewAuditEvent::succeeded(
                task_id,
                AuditStage::PromptProcessingSucceeded,
                payload,
            ))
            .await?;
        Ok(())
    }

    async fn try_record_stage(&self, event: NewAuditEvent) -> Result<()> {
        if self.store.find_session(&event.task_id).await?.is_none() {
            debug!(task_id = %event.task_id, stage = ?event.stage, "No audit session, event dropped");
            return Ok(());
        }
        self.store.append_event(event).await?;
        Ok(())
    }

    async fn try_finish_success(&self, task_id: &TaskId, final_payload: Value) -> Result<()> {
        let Some(mut session) = self.store.find_session(task_id).await? else {
            return Ok(());
        };
        session.final_status = Some(AuditFinalStatus::Completed);
        session.provider_ids = Some(final_payload.clone());
        session.completed_at = Some(Utc::now());
        self.store.update_session(&session).await?;
        self.store
            .append_event(NewAuditEvent::succeeded(
                task_id,
                AuditStage::Completed,
                Some(final_payload),
            ))
            .await?;
        Ok(())
    }

    async fn try_finish_failure(
        &self,
        task_id: &TaskId,
        code: ErrorCode,
        message: &str,
        payload: Option<Value>,
    ) -> Result<()> {
        let Some(mut session) = self.store.find_session(task_id).await? else {
            return Ok(());
        };
        session.final_status = Some(AuditFinalStatus::Failed);
        session.error_code = Some(code);
        session.error_message = Some(message.to_string());
        session.completed_at = Some(Utc::now());
        if let Some(ids) = payload.as_ref().and_then(|p| p.get("providerIds")) {
            session.provider_ids = Some(ids.clone());
        }
        self.store.update_session(&session).await?;
        self.store
            .append_event(NewAuditEvent::failed(
                task_id,
                AuditStage::Failed,
                code,
                message,
                payload,
            ))
            .await?;
        Ok(())
    }
}

fn log_failure(task_id: &TaskId, operation: &'static str, result: Result<()>) {
    if let Err(e) = result {
        warn!(task_id = %task_id, operation, error = %e, "Audit write failed");
    }
}
