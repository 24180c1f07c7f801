//! Idempotent points ledger
//!
//! Every balance change is booked as a [`LedgerTransaction`] keyed by a
//! caller-supplied idempotency token. The balance row is mutated only while
//! the profile store's per-user lock is held, and a repeated token returns
//! the original transaction without touching the balance again.

use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{LedgerRule, LedgerTransaction, Page, UserId};
use crate::error::{AppError, Result};
use crate::store::{InsertOutcome, LedgerStore, ProfileStore};

/// Rules indexed by code.
#[derive(Debug, Clone, Default)]
pub struct RuleBook {
    rules: HashMap<String, LedgerRule>,
}

impl RuleBook {
    pub fn new(rules: impl IntoIterator<Item = LedgerRule>) -> Self {
        Self {
            rules: rules.into_iter().map(|r| (r.code.clone(), r)).collect(),
        }
    }

    /// Enabled rule for `code`.
    pub fn resolve(&self, code: &str) -> Result<&LedgerRule> {
        match self.rules.get(code) {
            Some(rule) if rule.enabled => Ok(rule),
            Some(_) => Err(AppError::UnknownRule(format!("{} is disabled", code))),
            None => Err(AppError::UnknownRule(code.to_string())),
        }
    }
}

/// One request to move points.
#[derive(Debug, Clone)]
pub struct AwardRequest {
    pub user_id: UserId,
    pub rule_code: String,
    /// Overrides the rule's default amount
    pub amount: Option<i64>,
    pub metadata: Value,
    pub idempotency_token: String,
    pub acting_user_id: UserId,
}

impl AwardRequest {
    /// Request acting on the user's own behalf with the rule's default amount.
    pub fn new(user_id: UserId, rule_code: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user_id,
            rule_code: rule_code.into(),
            amount: None,
            metadata: Value::Null,
            idempotency_token: token.into(),
            acting_user_id: user_id,
        }
    }

    pub fn amount(mut self, amount: i64) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn acting_user(mut self, acting_user_id: UserId) -> Self {
        self.acting_user_id = acting_user_id;
        self
    }
}

/// Append-only ledger with per-user exclusive balance updates.
pub struct Ledger {
    rules: RuleBook,
    transactions: Arc<dyn LedgerStore>,
    profiles: Arc<dyn ProfileStore>,
}

impl Ledger {
    pub fn new(
        rules: RuleBook,
        transactions: Arc<dyn LedgerStore>,
        profiles: Arc<dyn ProfileStore>,
    ) -> Self {
        Self {
            rules,
            transactions,
            profiles,
        }
    }

    /// Book a transaction, or return the one already booked under the same token.
    ///
    /// A replayed token wins over rule validation: the original transaction
    /// comes back even if the repeat names another rule or amount.
    pub async fn award(&self, request: AwardRequest) -> Result<LedgerTransaction> {
        if let Some(existing) = self.replay(&request).await? {
            return Ok(existing);
        }

        let mut profile = self.profiles.lock_for_update(request.user_id).await?;

        // Re-check under the lock; a concurrent award may have booked it
        if let Some(existing) = self.replay(&request).await? {
            return Ok(existing);
        }

        let rule = self.rules.resolve(&request.rule_code)?;
        let delta = rule.direction.apply(request.amount.unwrap_or(rule.amount));
        if delta == 0 {
            return Err(AppError::InvalidRequest(format!(
                "rule {} resolves to a zero amount",
                rule.code
            )));
        }

        let balance_after = profile.balance.checked_add(delta).ok_or_else(|| {
            AppError::InvalidRequest(format!("balance overflow for user {}", request.user_id))
        })?;

        if delta < 0 && balance_after < 0 {
            warn!(
                user_id = request.user_id,
                balance = profile.balance,
                delta,
                "Insufficient funds"
            );
            return Err(AppError::InsufficientFunds {
                user_id: request.user_id,
                balance: profile.balance,
                delta,
            });
        }

        let transaction = LedgerTransaction {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            rule_code: rule.code.clone(),
            direction: rule.direction,
            delta,
            balance_after,
            idempotency_token: request.idempotency_token,
            metadata: request.metadata,
            acting_user_id: request.acting_user_id,
            created_at: Utc::now(),
        };

        match self.transactions.insert(transaction).await? {
            InsertOutcome::Inserted(booked) => {
                profile.balance = booked.balance_after;
                info!(
                    user_id = booked.user_id,
                    rule = %booked.rule_code,
                    delta = booked.delta,
                    balance = booked.balance_after,
                    "Ledger transaction booked"
                );
                Ok(booked)
            }
            // Same token booked for another user's row
            InsertOutcome::Duplicate(existing) => Ok(existing),
        }
    }

    async fn replay(&self, request: &AwardRequest) -> Result<Option<LedgerTransaction>> {
        let existing = self
            .transactions
            .find_by_token(&request.idempotency_token)
            .await?;
        if existing.is_some() {
            debug!(
                user_id = request.user_id,
                token = %request.idempotency_token,
                "Replaying existing ledger transaction"
            );
        }
        Ok(existing)
    }

    /// Current balance; zero for users that never transacted.
    pub async fn balance(&self, user_id: UserId) -> Result<i64> {
        Ok(self
            .profiles
            .get(user_id)
            .await?
            .map(|p| p.balance)
            .unwrap_or(0))
    }

    /// Transactions of a user, newest first.
    pub async fn transactions(&self, user_id: UserId, page: Page) -> Result<Vec<LedgerTransaction>> {
        self.transactions.list_by_user(user_id, page).await
    }

    /// Sum of all booked deltas for a user.
    pub async fn booked_total(&self, user_id: UserId) -> Result<i64> {
        self.transactions.sum_by_user(user_id).await
    }
}
