//! Persistence seams for tasks, audit records, ledger entries and balances.
//!
//! Every store is an async trait so a SQL backend can be dropped in; the
//! [`memory`] module provides the in-process implementations used by the
//! daemon and the tests.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::OwnedMutexGuard;

use crate::domain::{
    AuditEvent, AuditFinalStatus, AuditSession, GenerationTask, LedgerTransaction, NewAuditEvent,
    Page, TaskId, UserId, UserProfile,
};
use crate::error::Result;

pub use memory::{MemoryAuditStore, MemoryLedgerStore, MemoryProfileStore, MemoryTaskStore};

/// Current state of every generation task.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert(&self, task: &GenerationTask) -> Result<()>;

    async fn get(&self, task_id: &TaskId) -> Result<Option<GenerationTask>>;

    /// Overwrite the stored record. Fails if the task does not exist.
    async fn update(&self, task: &GenerationTask) -> Result<()>;

    async fn delete(&self, task_id: &TaskId) -> Result<bool>;

    /// Tasks of one user, newest first.
    async fn list_by_user(&self, user_id: UserId, page: Page) -> Result<Vec<GenerationTask>>;

    /// Delete tasks past `expires_at` that ended COMPLETED or FAILED.
    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// Filter for the administrative audit listing.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub user_id: Option<UserId>,
    pub final_status: Option<AuditFinalStatus>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub errors_only: bool,
    pub task_id: Option<TaskId>,
}

impl AuditFilter {
    pub fn matches(&self, session: &AuditSession) -> bool {
        self.user_id.map_or(true, |id| session.user_id == id)
            && self
                .final_status
                .map_or(true, |status| session.final_status == Some(status))
            && self.date_from.map_or(true, |from| session.started_at >= from)
            && self.date_to.map_or(true, |to| session.started_at <= to)
            && (!self.errors_only || session.has_error())
            && self
                .task_id
                .as_ref()
                .map_or(true, |id| &session.task_id == id)
    }
}

/// Audit sessions and their append-only events.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Fails if a session for the same task already exists.
    async fn insert_session(&self, session: &AuditSession) -> Result<()>;

    async fn find_session(&self, task_id: &TaskId) -> Result<Option<AuditSession>>;

    async fn update_session(&self, session: &AuditSession) -> Result<()>;

    async fn append_event(&self, event: NewAuditEvent) -> Result<AuditEvent>;

    /// Events of one session in ascending order.
    async fn events(&self, task_id: &TaskId) -> Result<Vec<AuditEvent>>;

    /// Sessions matching `filter`, newest first.
    async fn query(&self, filter: &AuditFilter, page: Page) -> Result<Vec<AuditSession>>;

    /// Delete expired sessions together with their events.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// Result of a token-keyed ledger insert.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted(LedgerTransaction),
    /// The token was taken; nothing was written
    Duplicate(LedgerTransaction),
}

/// Append-only ledger entries keyed by idempotency token.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn find_by_token(&self, token: &str) -> Result<Option<LedgerTransaction>>;

    /// Insert a new entry unless its token is already taken.
    async fn insert(&self, transaction: LedgerTransaction) -> Result<InsertOutcome>;

    /// Entries of one user, newest first.
    async fn list_by_user(&self, user_id: UserId, page: Page) -> Result<Vec<LedgerTransaction>>;

    async fn sum_by_user(&self, user_id: UserId) -> Result<i64>;
}

/// User profile rows holding balances.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Exclusive lock on the user's balance row, creating a zero-balance
    /// profile on first use. Held until the guard is dropped.
    async fn lock_for_update(&self, user_id: UserId) -> Result<OwnedMutexGuard<UserProfile>>;

    async fn get(&self, user_id: UserId) -> Result<Option<UserProfile>>;
}
