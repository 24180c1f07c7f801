//! Ledger records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::UserId;

/// Direction in which points move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Credit,
    Debit,
}

impl Direction {
    /// Signed delta for an amount, ignoring the amount's own sign.
    pub fn apply(&self, amount: i64) -> i64 {
        let abs = amount.saturating_abs();
        match self {
            Direction::Credit => abs,
            Direction::Debit => -abs,
        }
    }
}

/// Economic rule a transaction is booked under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRule {
    pub code: String,
    pub direction: Direction,
    #[serde(default)]
    pub amount: i64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_enabled() -> bool {
    true
}

/// Immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerTransaction {
    pub id: Uuid,
    pub user_id: UserId,
    pub rule_code: String,
    pub direction: Direction,
    /// Positive = credit, negative = debit
    pub delta: i64,
    pub balance_after: i64,
    pub idempotency_token: String,
    pub metadata: serde_json::Value,
    pub acting_user_id: UserId,
    pub created_at: DateTime<Utc>,
}

/// Balance row of a user's profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: UserId,
    pub balance: i64,
}

impl UserProfile {
    pub fn new(user_id: UserId) -> Self {
        Self { user_id, balance: 0 }
    }
}
