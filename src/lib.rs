//! Generation task orchestrator
//!
//! Drives user generation requests through prompt enrichment, image synthesis,
//! background removal and local caching against an external provider, while
//! metering usage through an idempotent points ledger and recording an
//! append-only audit trail of every stage.

pub mod audit;
pub mod collaborators;
pub mod config;
pub mod domain;
pub mod error;
pub mod ledger;
pub mod pipeline;
pub mod provider;
pub mod retention;
pub mod store;

pub use error::{AppError, Result};

use std::sync::Arc;

use crate::audit::{AuditQuery, AuditTrail};
use crate::collaborators::{FileArtifactCache, PresetPromptProcessor};
use crate::config::Settings;
use crate::ledger::{Ledger, RuleBook};
use crate::pipeline::{Orchestrator, PipelineDeps, WorkerPool};
use crate::provider::{GenerationProvider, HttpProvider};
use crate::retention::RetentionSweeper;
use crate::store::{
    AuditStore, MemoryAuditStore, MemoryLedgerStore, MemoryProfileStore, MemoryTaskStore,
    TaskStore,
};

/// Application state shared by every entry point
pub struct AppState {
    pub settings: Arc<Settings>,
    pub ledger: Arc<Ledger>,
    pub audit_query: AuditQuery,
    pub orchestrator: Orchestrator,
    pub pool: Arc<WorkerPool>,
    pub sweeper: Arc<RetentionSweeper>,
}

impl AppState {
    /// Wire in-memory stores and the HTTP provider. Needs a tokio runtime.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let provider: Arc<dyn GenerationProvider> = Arc::new(HttpProvider::new(&settings.provider)?);
        Ok(Self::with_provider(settings, provider))
    }

    /// Same wiring around a caller-supplied provider.
    pub fn with_provider(settings: Settings, provider: Arc<dyn GenerationProvider>) -> Self {
        let tasks: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
        let audit_store: Arc<dyn AuditStore> = Arc::new(MemoryAuditStore::new());

        let ledger = Arc::new(Ledger::new(
            RuleBook::new(settings.ledger.rules.clone()),
            Arc::new(MemoryLedgerStore::new()),
            Arc::new(MemoryProfileStore::new()),
        ));
        let audit = AuditTrail::new(audit_store.clone());
        let pool = Arc::new(WorkerPool::new(settings.worker_pool.clone()));

        let orchestrator = Orchestrator::new(
            PipelineDeps {
                tasks: tasks.clone(),
                ledger: ledger.clone(),
                audit: audit.clone(),
                provider: provider.clone(),
                prompts: Arc::new(PresetPromptProcessor::new(settings.style_presets.clone())),
                cache: Arc::new(FileArtifactCache::new(&settings.storage, provider)),
                pool: pool.clone(),
            },
            settings.generation.clone(),
            settings.audit.retention_days,
        );

        Self {
            ledger,
            audit_query: AuditQuery::new(audit_store),
            orchestrator,
            pool,
            sweeper: Arc::new(RetentionSweeper::new(tasks, audit)),
            settings: Arc::new(settings),
        }
    }
}
