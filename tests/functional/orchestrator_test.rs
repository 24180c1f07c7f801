//! Functional tests driving whole tasks through the pipeline

use crate::support::{test_settings, wait_for_terminal, Harness, BACKGROUND_REMOVER, TEXT_TO_IMAGE};
use async_trait::async_trait;
use gen_orchestrator::audit::{AuditQuery, AuditTrail};
use gen_orchestrator::collaborators::{FileArtifactCache, PromptProcessor};
use gen_orchestrator::domain::{
    AuditFinalStatus, AuditStage, ErrorCode, EventOutcome, Page, TaskId, TaskStatus, UserId,
};
use gen_orchestrator::ledger::{AwardRequest, Ledger, RuleBook};
use gen_orchestrator::pipeline::{Orchestrator, PipelineDeps, SubmitOptions, WorkerPool};
use gen_orchestrator::provider::{GenerationProvider, HttpProvider};
use gen_orchestrator::store::{
    AuditStore, MemoryAuditStore, MemoryLedgerStore, MemoryProfileStore, MemoryTaskStore,
};
use gen_orchestrator::AppError;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn without_background_removal() -> SubmitOptions {
    SubmitOptions {
        remove_background: Some(false),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_full_pipeline_with_background_removal() {
    let h = Harness::start().await;
    h.fund(1, 100).await;

    let generated = h.artifact_url("gen.png");
    let cutout = h.artifact_url("cutout.png");

    Mock::given(method("POST"))
        .and(path(TEXT_TO_IMAGE))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({ "prompt": "cat wizard", "seed": 42 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "id": "gen-1" } })))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/predictions/gen-1/result"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "data": { "status": "processing", "outputs": [] } })),
        )
        .up_to_n_times(2)
        .mount(&h.server)
        .await;
    h.mock_completed("gen-1", &generated).await;
    Mock::given(method("POST"))
        .and(path(BACKGROUND_REMOVER))
        .and(body_partial_json(json!({ "image": generated })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "id": "bg-1" } })))
        .expect(1)
        .mount(&h.server)
        .await;
    h.mock_completed("bg-1", &cutout).await;
    h.mock_artifact("cutout.png").await;

    let options = SubmitOptions {
        seed: Some(42),
        remove_background: Some(true),
        ..Default::default()
    };
    let task_id = h.state.orchestrator.submit(1, "cat wizard", options).await.unwrap();
    assert_eq!(h.state.ledger.balance(1).await.unwrap(), 95);

    let view = h.wait_for_terminal(&task_id, 1).await;
    assert_eq!(view.status, TaskStatus::Completed);
    assert_eq!(view.error_message, None);
    assert!(view.completed_at.is_some());
    assert_eq!(view.image_format.as_deref(), Some("png"));
    assert_eq!(view.original_image_url.as_deref(), Some(cutout.as_str()));
    assert_eq!(view.metadata.seed, 42);
    assert_eq!(view.metadata.processed_prompt.as_deref(), Some("cat wizard"));

    let image_url = view.image_url.unwrap();
    assert!(image_url.starts_with("http://localhost/images/"));
    let file_name = image_url.rsplit('/').next().unwrap();
    assert!(h.storage.path().join(file_name).exists());

    let session = h.state.audit_query.session(&task_id).await.unwrap().unwrap();
    assert_eq!(session.final_status, Some(AuditFinalStatus::Completed));
    assert_eq!(session.provider_ids, Some(json!({ "generation": "gen-1", "backgroundRemoval": "bg-1" })));

    let events = h.state.audit_query.events(&task_id).await.unwrap();
    assert!(events.len() >= 4);
    assert!(events.windows(2).all(|w| w[0].sequence < w[1].sequence && w[0].created_at <= w[1].created_at));
    assert!(events.iter().all(|e| e.outcome == EventOutcome::Succeeded));

    let stages: Vec<AuditStage> = events.iter().map(|e| e.stage).collect();
    assert_eq!(stages.first(), Some(&AuditStage::RequestAccepted));
    assert_eq!(stages.last(), Some(&AuditStage::Completed));
    for stage in [
        AuditStage::PromptProcessingSucceeded,
        AuditStage::ProviderResult,
        AuditStage::BackgroundRemove,
        AuditStage::ImageCache,
    ] {
        assert!(stages.contains(&stage), "missing {stage:?}");
    }

    // Debit is booked once, keyed by the task id
    let ledger = h.state.ledger.transactions(1, Page::default()).await.unwrap();
    assert_eq!(ledger[0].idempotency_token, task_id.as_str());
    assert_eq!(ledger[0].delta, -5);
}

#[tokio::test]
async fn test_submit_exhaustion_fails_task_without_refund() {
    let h = Harness::start().await;
    h.fund(1, 100).await;

    Mock::given(method("POST"))
        .and(path(TEXT_TO_IMAGE))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .expect(3)
        .mount(&h.server)
        .await;

    let task_id = h
        .state
        .orchestrator
        .submit(1, "cat wizard", SubmitOptions::default())
        .await
        .unwrap();
    let view = h.wait_for_terminal(&task_id, 1).await;

    assert_eq!(view.status, TaskStatus::Failed);
    assert!(view.error_message.is_some());
    assert_eq!(h.state.ledger.balance(1).await.unwrap(), 95);

    let session = h.state.audit_query.session(&task_id).await.unwrap().unwrap();
    assert_eq!(session.final_status, Some(AuditFinalStatus::Failed));
    assert_eq!(session.error_code, Some(ErrorCode::ProviderSubmitError));
}

#[tokio::test]
async fn test_background_removal_timeout_keeps_generated_artifact() {
    let h = Harness::start().await;
    h.fund(1, 100).await;

    let generated = h.artifact_url("gen.png");
    h.mock_submit(TEXT_TO_IMAGE, "gen-2").await;
    h.mock_completed("gen-2", &generated).await;
    h.mock_submit(BACKGROUND_REMOVER, "bg-2").await;
    h.mock_processing("bg-2").await;
    h.mock_artifact("gen.png").await;

    let task_id = h
        .state
        .orchestrator
        .submit(1, "cat wizard", SubmitOptions::default())
        .await
        .unwrap();
    let view = h.wait_for_terminal(&task_id, 1).await;

    assert_eq!(view.status, TaskStatus::Completed);
    assert_eq!(view.error_message, None);
    assert_eq!(view.original_image_url.as_deref(), Some(generated.as_str()));
    assert!(view.image_id.is_some());

    let events = h.state.audit_query.events(&task_id).await.unwrap();
    let removal = events
        .iter()
        .find(|e| e.stage == AuditStage::BackgroundRemove)
        .unwrap();
    assert_eq!(removal.outcome, EventOutcome::Failed);
    assert_eq!(removal.error_code, Some(ErrorCode::BackgroundRemoveError));

    let session = h.state.audit_query.session(&task_id).await.unwrap().unwrap();
    assert_eq!(session.final_status, Some(AuditFinalStatus::Completed));
}

#[tokio::test]
async fn test_generation_timeout_is_distinct_from_failure() {
    let h = Harness::start().await;
    h.fund(1, 100).await;

    h.mock_submit(TEXT_TO_IMAGE, "gen-3").await;
    h.mock_processing("gen-3").await;

    let task_id = h
        .state
        .orchestrator
        .submit(1, "cat wizard", without_background_removal())
        .await
        .unwrap();
    let view = h.wait_for_terminal(&task_id, 1).await;

    assert_eq!(view.status, TaskStatus::Timeout);
    assert!(view.error_message.is_some());
    assert_eq!(h.state.ledger.balance(1).await.unwrap(), 95);

    let session = h.state.audit_query.session(&task_id).await.unwrap().unwrap();
    assert_eq!(session.error_code, Some(ErrorCode::ProviderTimeout));
}

#[tokio::test]
async fn test_provider_reported_failure() {
    let h = Harness::start().await;
    h.fund(1, 100).await;

    h.mock_submit(TEXT_TO_IMAGE, "gen-4").await;
    h.mock_result(
        "gen-4",
        json!({ "data": { "status": "failed", "outputs": [], "error": "content rejected" } }),
    )
    .await;

    let task_id = h
        .state
        .orchestrator
        .submit(1, "cat wizard", without_background_removal())
        .await
        .unwrap();
    let view = h.wait_for_terminal(&task_id, 1).await;

    assert_eq!(view.status, TaskStatus::Failed);
    assert_eq!(view.error_message.as_deref(), Some("content rejected"));

    let session = h.state.audit_query.session(&task_id).await.unwrap().unwrap();
    assert_eq!(session.error_code, Some(ErrorCode::ProviderFailed));
}

#[tokio::test]
async fn test_cache_failure_falls_back_to_provider_url() {
    let h = Harness::start().await;
    h.fund(1, 100).await;

    let generated = h.artifact_url("missing.png");
    h.mock_submit(TEXT_TO_IMAGE, "gen-5").await;
    h.mock_completed("gen-5", &generated).await;

    let task_id = h
        .state
        .orchestrator
        .submit(1, "cat wizard", without_background_removal())
        .await
        .unwrap();
    let view = h.wait_for_terminal(&task_id, 1).await;

    assert_eq!(view.status, TaskStatus::Completed);
    assert_eq!(view.image_url.as_deref(), Some(generated.as_str()));
    assert_eq!(view.image_id, None);
    assert_eq!(view.image_format, None);

    let events = h.state.audit_query.events(&task_id).await.unwrap();
    assert!(events
        .iter()
        .any(|e| e.stage == AuditStage::ImageCache && e.error_code == Some(ErrorCode::ImageCacheError)));
}

#[tokio::test]
async fn test_style_preset_is_applied_before_generation() {
    let h = Harness::start_with(|settings| {
        settings.style_presets = vec![gen_orchestrator::config::StylePresetConfig {
            id: 3,
            code: "pixel".to_string(),
            prompt_suffix: ", pixel art".to_string(),
            enabled: true,
            owner_id: None,
        }];
    })
    .await;
    h.fund(1, 100).await;

    let generated = h.artifact_url("gen.png");
    Mock::given(method("POST"))
        .and(path(TEXT_TO_IMAGE))
        .and(body_partial_json(json!({ "prompt": "cat wizard, pixel art" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "id": "gen-6" } })))
        .expect(1)
        .mount(&h.server)
        .await;
    h.mock_completed("gen-6", &generated).await;
    h.mock_artifact("gen.png").await;

    let options = SubmitOptions {
        style_preset_id: Some(3),
        remove_background: Some(false),
        ..Default::default()
    };
    let task_id = h.state.orchestrator.submit(1, "cat wizard", options).await.unwrap();
    let view = h.wait_for_terminal(&task_id, 1).await;

    assert_eq!(view.status, TaskStatus::Completed);
    assert_eq!(view.metadata.original_prompt, "cat wizard");
    assert_eq!(view.metadata.processed_prompt.as_deref(), Some("cat wizard, pixel art"));

    let session = h.state.audit_query.session(&task_id).await.unwrap().unwrap();
    assert_eq!(session.raw_prompt, "cat wizard");
    assert_eq!(session.processed_prompt.as_deref(), Some("cat wizard, pixel art"));
}

#[tokio::test]
async fn test_empty_prompt_creates_nothing() {
    let h = Harness::start().await;
    h.fund(1, 100).await;

    for prompt in ["", "   "] {
        let result = h
            .state
            .orchestrator
            .submit(1, prompt, SubmitOptions::default())
            .await;
        assert!(matches!(result, Err(AppError::InvalidRequest(_))));
    }

    assert!(h.state.orchestrator.list_history(1, Page::default()).await.unwrap().is_empty());
    assert_eq!(h.state.ledger.balance(1).await.unwrap(), 100);
    assert_eq!(h.state.ledger.transactions(1, Page::default()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_unknown_style_preset_rejected_synchronously() {
    let h = Harness::start().await;
    h.fund(1, 100).await;

    let options = SubmitOptions {
        style_preset_id: Some(404),
        ..Default::default()
    };
    let result = h.state.orchestrator.submit(1, "cat", options).await;

    assert!(matches!(result, Err(AppError::InvalidRequest(_))));
    assert_eq!(h.state.ledger.balance(1).await.unwrap(), 100);
}

#[tokio::test]
async fn test_insufficient_funds_leaves_no_task() {
    let h = Harness::start().await;
    h.fund(1, 3).await;

    let result = h
        .state
        .orchestrator
        .submit(1, "cat wizard", SubmitOptions::default())
        .await;

    assert!(matches!(result, Err(AppError::InsufficientFunds { balance: 3, delta: -5, .. })));
    assert!(h.state.orchestrator.list_history(1, Page::default()).await.unwrap().is_empty());
    assert_eq!(h.state.ledger.balance(1).await.unwrap(), 3);
}

#[tokio::test]
async fn test_status_visibility() {
    let h = Harness::start().await;
    h.fund(1, 100).await;
    h.mock_submit(TEXT_TO_IMAGE, "gen-7").await;
    h.mock_result("gen-7", json!({ "data": { "status": "failed", "error": "nope" } }))
        .await;

    let task_id = h
        .state
        .orchestrator
        .submit(1, "cat wizard", without_background_removal())
        .await
        .unwrap();
    h.wait_for_terminal(&task_id, 1).await;

    let orchestrator = &h.state.orchestrator;
    assert!(matches!(
        orchestrator.get_status(&task_id, 2, false).await,
        Err(AppError::AccessDenied(_))
    ));
    assert!(orchestrator.get_status(&task_id, 2, true).await.is_ok());
    assert!(matches!(
        orchestrator.get_status(&TaskId::generate(), 1, false).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_history_is_newest_first() {
    let h = Harness::start().await;
    h.fund(1, 100).await;
    h.mock_submit(TEXT_TO_IMAGE, "gen-8").await;
    h.mock_result("gen-8", json!({ "data": { "status": "failed", "error": "nope" } }))
        .await;

    let mut ids = Vec::new();
    for prompt in ["first", "second", "third"] {
        let id = h
            .state
            .orchestrator
            .submit(1, prompt, without_background_removal())
            .await
            .unwrap();
        ids.push(id);
    }
    for id in &ids {
        h.wait_for_terminal(id, 1).await;
    }

    let history = h.state.orchestrator.list_history(1, Page::new(0, 2)).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].task_id, ids[2]);
    assert_eq!(history[1].task_id, ids[1]);

    let rest = h.state.orchestrator.list_history(1, Page::new(1, 2)).await.unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].task_id, ids[0]);
    assert_eq!(h.state.ledger.balance(1).await.unwrap(), 85);
}

#[tokio::test]
async fn test_record_published_sticker() {
    let h = Harness::start().await;
    h.fund(1, 100).await;

    let generated = h.artifact_url("gen.png");
    h.mock_submit(TEXT_TO_IMAGE, "gen-9").await;
    h.mock_completed("gen-9", &generated).await;
    h.mock_artifact("gen.png").await;

    let task_id = h
        .state
        .orchestrator
        .submit(1, "cat wizard", without_background_removal())
        .await
        .unwrap();
    h.wait_for_terminal(&task_id, 1).await;

    assert!(matches!(
        h.state.orchestrator.record_published_sticker(&task_id, 2, "file-1").await,
        Err(AppError::AccessDenied(_))
    ));
    let view = h
        .state
        .orchestrator
        .record_published_sticker(&task_id, 1, "file-1")
        .await
        .unwrap();
    assert_eq!(view.sticker_file_id.as_deref(), Some("file-1"));
}

#[tokio::test]
async fn test_shutdown_interrupts_polling_and_keeps_status() {
    let h = Harness::start_with(|settings| settings.generation.max_poll_secs = 30).await;
    h.fund(1, 100).await;
    h.mock_submit(TEXT_TO_IMAGE, "gen-10").await;
    h.mock_processing("gen-10").await;

    let task_id = h
        .state
        .orchestrator
        .submit(1, "cat wizard", without_background_removal())
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let view = h.state.orchestrator.get_status(&task_id, 1, false).await.unwrap();
        if view.status == TaskStatus::Generating {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "never reached GENERATING");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(h.state.pool.shutdown(Duration::from_secs(2)).await);

    let view = h.state.orchestrator.get_status(&task_id, 1, false).await.unwrap();
    assert_eq!(view.status, TaskStatus::Generating);
    assert!(matches!(
        h.state
            .orchestrator
            .submit(1, "another", SubmitOptions::default())
            .await,
        Err(AppError::ShuttingDown)
    ));
}

/// Enrichment backend that is always down.
struct UnavailablePrompts;

#[async_trait]
impl PromptProcessor for UnavailablePrompts {
    async fn process(
        &self,
        _prompt: &str,
        _user_id: UserId,
        _style_preset_id: Option<i64>,
    ) -> gen_orchestrator::Result<String> {
        Err(AppError::Storage("enrichment backend unavailable".to_string()))
    }

    fn check_preset(
        &self,
        _user_id: UserId,
        _style_preset_id: Option<i64>,
    ) -> gen_orchestrator::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_prompt_failure_stops_before_generation() {
    let server = MockServer::start().await;
    let storage = tempfile::tempdir().unwrap();
    let settings = test_settings(&server.uri(), &storage);

    Mock::given(method("POST"))
        .and(path(TEXT_TO_IMAGE))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "id": "never" } })))
        .expect(0)
        .mount(&server)
        .await;

    let provider: Arc<dyn GenerationProvider> =
        Arc::new(HttpProvider::new(&settings.provider).unwrap());
    let audit_store: Arc<dyn AuditStore> = Arc::new(MemoryAuditStore::new());
    let ledger = Arc::new(Ledger::new(
        RuleBook::new(settings.ledger.rules.clone()),
        Arc::new(MemoryLedgerStore::new()),
        Arc::new(MemoryProfileStore::new()),
    ));
    let orchestrator = Orchestrator::new(
        PipelineDeps {
            tasks: Arc::new(MemoryTaskStore::new()),
            ledger: ledger.clone(),
            audit: AuditTrail::new(audit_store.clone()),
            provider: provider.clone(),
            prompts: Arc::new(UnavailablePrompts),
            cache: Arc::new(FileArtifactCache::new(&settings.storage, provider)),
            pool: Arc::new(WorkerPool::new(settings.worker_pool.clone())),
        },
        settings.generation.clone(),
        settings.audit.retention_days,
    );
    let audit = AuditQuery::new(audit_store);

    ledger
        .award(AwardRequest::new(1, "ADMIN_ADJUSTMENT", "seed-1").amount(100))
        .await
        .unwrap();

    let task_id = orchestrator
        .submit(1, "cat wizard", SubmitOptions::default())
        .await
        .unwrap();
    let view = wait_for_terminal(&orchestrator, &task_id, 1).await;

    assert_eq!(view.status, TaskStatus::Failed);
    assert!(view
        .error_message
        .as_deref()
        .is_some_and(|m| m.contains("enrichment backend unavailable")));
    assert_eq!(view.metadata.processed_prompt, None);
    assert_eq!(ledger.balance(1).await.unwrap(), 95);

    let session = audit.session(&task_id).await.unwrap().unwrap();
    assert_eq!(session.final_status, Some(AuditFinalStatus::Failed));
    assert_eq!(session.error_code, Some(ErrorCode::PromptProcessingError));

    let events = audit.events(&task_id).await.unwrap();
    let failed = events
        .iter()
        .find(|e| e.stage == AuditStage::PromptProcessingFailed)
        .unwrap();
    assert_eq!(failed.outcome, EventOutcome::Failed);
    assert!(events.iter().all(|e| e.stage != AuditStage::ProviderSubmit));
}

#[tokio::test]
async fn test_empty_completion_times_out_generation() {
    let h = Harness::start().await;
    h.fund(1, 100).await;

    h.mock_submit(TEXT_TO_IMAGE, "gen-11").await;
    h.mock_result(
        "gen-11",
        json!({ "data": { "status": "completed", "outputs": [] } }),
    )
    .await;

    let task_id = h
        .state
        .orchestrator
        .submit(1, "cat wizard", without_background_removal())
        .await
        .unwrap();
    let view = h.wait_for_terminal(&task_id, 1).await;

    assert_eq!(view.status, TaskStatus::Timeout);
    assert!(view.error_message.is_some());
    assert_eq!(view.image_url, None);

    let session = h.state.audit_query.session(&task_id).await.unwrap().unwrap();
    assert_eq!(session.error_code, Some(ErrorCode::ProviderTimeout));
}

#[tokio::test]
async fn test_empty_background_removal_result_falls_back_at_deadline() {
    let h = Harness::start().await;
    h.fund(1, 100).await;

    let generated = h.artifact_url("gen.png");
    h.mock_submit(TEXT_TO_IMAGE, "gen-12").await;
    h.mock_completed("gen-12", &generated).await;
    h.mock_submit(BACKGROUND_REMOVER, "bg-12").await;
    h.mock_result(
        "bg-12",
        json!({ "data": { "status": "completed", "outputs": [] } }),
    )
    .await;
    h.mock_artifact("gen.png").await;

    let task_id = h
        .state
        .orchestrator
        .submit(1, "cat wizard", SubmitOptions::default())
        .await
        .unwrap();
    let view = h.wait_for_terminal(&task_id, 1).await;

    assert_eq!(view.status, TaskStatus::Completed);
    assert_eq!(view.original_image_url.as_deref(), Some(generated.as_str()));

    let events = h.state.audit_query.events(&task_id).await.unwrap();
    let removal = events
        .iter()
        .find(|e| e.stage == AuditStage::BackgroundRemove)
        .unwrap();
    assert_eq!(removal.outcome, EventOutcome::Failed);
    assert!(removal
        .error_message
        .as_deref()
        .is_some_and(|m| m.contains("timed out")));
}
