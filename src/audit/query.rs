//! Read-side access to audit records for reporting

use std::sync::Arc;

use crate::domain::{AuditEvent, AuditSession, Page, TaskId};
use crate::error::Result;
use crate::store::{AuditFilter, AuditStore};

#[derive(Clone)]
pub struct AuditQuery {
    store: Arc<dyn AuditStore>,
}

impl AuditQuery {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// Sessions matching `filter`, newest first.
    pub async fn find(&self, filter: &AuditFilter, page: Page) -> Result<Vec<AuditSession>> {
        self.store.query(filter, page).await
    }

    pub async fn session(&self, task_id: &TaskId) -> Result<Option<AuditSession>> {
        self.store.find_session(task_id).await
    }

    /// Events of a session in the order they were recorded.
    pub async fn events(&self, task_id: &TaskId) -> Result<Vec<AuditEvent>> {
        self.store.events(task_id).await
    }
}
