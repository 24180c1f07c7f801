//! In-memory store implementations backed by `DashMap`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use super::{AuditFilter, AuditStore, InsertOutcome, LedgerStore, ProfileStore, TaskStore};
use crate::domain::{
    AuditEvent, AuditSession, GenerationTask, LedgerTransaction, NewAuditEvent, Page, TaskId,
    TaskStatus, UserId, UserProfile,
};
use crate::error::{AppError, Result};

/// Task records with an insertion counter for stable newest-first ordering.
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: DashMap<TaskId, (u64, GenerationTask)>,
    sequence: AtomicU64,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn insert(&self, task: &GenerationTask) -> Result<()> {
        match self.tasks.entry(task.task_id.clone()) {
            Entry::Occupied(_) => Err(AppError::Storage(format!(
                "task {} already exists",
                task.task_id
            ))),
            Entry::Vacant(slot) => {
                let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
                slot.insert((seq, task.clone()));
                Ok(())
            }
        }
    }

    async fn get(&self, task_id: &TaskId) -> Result<Option<GenerationTask>> {
        Ok(self.tasks.get(task_id).map(|entry| entry.1.clone()))
    }

    async fn update(&self, task: &GenerationTask) -> Result<()> {
        match self.tasks.get_mut(&task.task_id) {
            Some(mut entry) => {
                entry.1 = task.clone();
                Ok(())
            }
            None => Err(AppError::NotFound(format!("task {}", task.task_id))),
        }
    }

    async fn delete(&self, task_id: &TaskId) -> Result<bool> {
        Ok(self.tasks.remove(task_id).is_some())
    }

    async fn list_by_user(&self, user_id: UserId, page: Page) -> Result<Vec<GenerationTask>> {
        let mut owned: Vec<(u64, GenerationTask)> = self
            .tasks
            .iter()
            .filter(|entry| entry.1.user_id == user_id)
            .map(|entry| entry.value().clone())
            .collect();

        owned.sort_by(|a, b| {
            b.1.created_at
                .cmp(&a.1.created_at)
                .then_with(|| b.0.cmp(&a.0))
        });

        Ok(page.apply(owned).into_iter().map(|(_, task)| task).collect())
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let before = self.tasks.len();
        self.tasks.retain(|_, (_, task)| {
            let purgeable = matches!(task.status, TaskStatus::Completed | TaskStatus::Failed);
            !(purgeable && task.expires_at < now)
        });
        let deleted = before.saturating_sub(self.tasks.len());
        debug!(deleted, "Swept expired tasks");
        Ok(deleted)
    }
}

/// Audit sessions plus per-session event logs.
#[derive(Default)]
pub struct MemoryAuditStore {
    sessions: DashMap<TaskId, AuditSession>,
    events: DashMap<TaskId, Vec<AuditEvent>>,
    sequence: AtomicU64,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn insert_session(&self, session: &AuditSession) -> Result<()> {
        match self.sessions.entry(session.task_id.clone()) {
            Entry::Occupied(_) => Err(AppError::Storage(format!(
                "audit session for task {} already exists",
                session.task_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(session.clone());
                Ok(())
            }
        }
    }

    async fn find_session(&self, task_id: &TaskId) -> Result<Option<AuditSession>> {
        Ok(self.sessions.get(task_id).map(|s| s.clone()))
    }

    async fn update_session(&self, session: &AuditSession) -> Result<()> {
        match self.sessions.get_mut(&session.task_id) {
            Some(mut stored) => {
                *stored = session.clone();
                Ok(())
            }
            None => Err(AppError::NotFound(format!(
                "audit session for task {}",
                session.task_id
            ))),
        }
    }

    async fn append_event(&self, event: NewAuditEvent) -> Result<AuditEvent> {
        let mut log = self.events.entry(event.task_id.clone()).or_default();
        let stored = AuditEvent {
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            task_id: event.task_id,
            stage: event.stage,
            outcome: event.outcome,
            payload: event.payload,
            error_code: event.error_code,
            error_message: event.error_message,
            created_at: Utc::now(),
        };
        log.push(stored.clone());
        Ok(stored)
    }

    async fn events(&self, task_id: &TaskId) -> Result<Vec<AuditEvent>> {
        let mut events = self
            .events
            .get(task_id)
            .map(|log| log.clone())
            .unwrap_or_default();
        events.sort_by_key(|e| e.sequence);
        Ok(events)
    }

    async fn query(&self, filter: &AuditFilter, page: Page) -> Result<Vec<AuditSession>> {
        let mut matching: Vec<AuditSession> = self
            .sessions
            .iter()
            .filter(|s| filter.matches(s.value()))
            .map(|s| s.value().clone())
            .collect();
        matching.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(page.apply(matching))
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let expired: Vec<TaskId> = self
            .sessions
            .iter()
            .filter(|s| s.expires_at < now)
            .map(|s| s.key().clone())
            .collect();

        for task_id in &expired {
            self.sessions.remove(task_id);
            self.events.remove(task_id);
        }
        Ok(expired.len())
    }
}

/// Ledger entries indexed by token and by user.
#[derive(Default)]
pub struct MemoryLedgerStore {
    by_token: DashMap<String, LedgerTransaction>,
    by_user: DashMap<UserId, Vec<String>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn find_by_token(&self, token: &str) -> Result<Option<LedgerTransaction>> {
        Ok(self.by_token.get(token).map(|tx| tx.clone()))
    }

    async fn insert(&self, transaction: LedgerTransaction) -> Result<InsertOutcome> {
        match self.by_token.entry(transaction.idempotency_token.clone()) {
            Entry::Occupied(existing) => return Ok(InsertOutcome::Duplicate(existing.get().clone())),
            Entry::Vacant(slot) => {
                slot.insert(transaction.clone());
            }
        }
        self.by_user
            .entry(transaction.user_id)
            .or_default()
            .push(transaction.idempotency_token.clone());
        Ok(InsertOutcome::Inserted(transaction))
    }

    async fn list_by_user(&self, user_id: UserId, page: Page) -> Result<Vec<LedgerTransaction>> {
        let tokens = self
            .by_user
            .get(&user_id)
            .map(|tokens| tokens.clone())
            .unwrap_or_default();

        let newest_first: Vec<LedgerTransaction> = tokens
            .iter()
            .rev()
            .filter_map(|token| self.by_token.get(token).map(|tx| tx.clone()))
            .collect();
        Ok(page.apply(newest_first))
    }

    async fn sum_by_user(&self, user_id: UserId) -> Result<i64> {
        let tokens = self
            .by_user
            .get(&user_id)
            .map(|tokens| tokens.clone())
            .unwrap_or_default();
        Ok(tokens
            .iter()
            .filter_map(|token| self.by_token.get(token).map(|tx| tx.delta))
            .sum())
    }
}

/// Balance rows, each behind its own async mutex.
#[derive(Default)]
pub struct MemoryProfileStore {
    rows: DashMap<UserId, Arc<Mutex<UserProfile>>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn row(&self, user_id: UserId) -> Arc<Mutex<UserProfile>> {
        self.rows
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(UserProfile::new(user_id))))
            .clone()
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn lock_for_update(&self, user_id: UserId) -> Result<OwnedMutexGuard<UserProfile>> {
        let row = self.row(user_id);
        Ok(row.lock_owned().await)
    }

    async fn get(&self, user_id: UserId) -> Result<Option<UserProfile>> {
        let row = match self.rows.get(&user_id) {
            Some(row) => row.clone(),
            None => return Ok(None),
        };
        let profile = *row.lock().await;
        Ok(Some(profile))
    }
}
