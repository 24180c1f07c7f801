//! Domain records: generation tasks, audit sessions and ledger transactions

pub mod audit;
pub mod ledger;
pub mod task;

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub use audit::{
    AuditEvent, AuditFinalStatus, AuditSession, AuditStage, ErrorCode, EventOutcome, NewAuditEvent,
};
pub use ledger::{Direction, LedgerRule, LedgerTransaction, UserProfile};
pub use task::{GenerationTask, TaskMetadata, TaskStatus, TaskView};

/// Identifier of a user profile
pub type UserId = i64;

/// Opaque, caller-visible task identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// One page of a listing, zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub number: usize,
    pub size: usize,
}

impl Page {
    pub const DEFAULT_SIZE: usize = 20;
    pub const MAX_SIZE: usize = 100;

    pub fn new(number: usize, size: usize) -> Self {
        Self {
            number,
            size: size.clamp(1, Self::MAX_SIZE),
        }
    }

    pub fn offset(&self) -> usize {
        self.number.saturating_mul(self.size)
    }

    /// Slice an already sorted listing.
    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        items.into_iter().skip(self.offset()).take(self.size).collect()
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(0, Self::DEFAULT_SIZE)
    }
}
