//! # Payout Engine
//!
//! Credits a user's balance and appends the matching ledger entry as one
//! unit. Every credit carries a `reference` key; the store keeps at most one
//! transaction per reference, so a replayed credit returns the original
//! transaction instead of paying twice.
//!
//! | Source | Reference | Kind |
//! |--------|-----------|------|
//! | Approved claim | `claim:<claim id>` | `earning` |
//! | Correct quiz answer | `quiz:<user id>:<attempt id>` | `earning` |
//! | Operator adjustment | `adjustment:<user id>:<key>` | `adjustment` |

use crate::error::{MarketError, Result};
use crate::model::{Account, Claim, Money, Transaction, TxKind, TxStatus};
use crate::store::MarketStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditRequest {
    pub user_id: Uuid,
    pub amount: Money,
    pub kind: TxKind,
    pub description: String,
    pub claim_id: Option<Uuid>,
    pub reference: String,
}

impl CreditRequest {
    pub fn for_claim(claim: &Claim, task_title: &str) -> Self {
        CreditRequest {
            user_id: claim.user_id,
            amount: claim.payout,
            kind: TxKind::Earning,
            description: format!("Task completed: {}", task_title),
            claim_id: Some(claim.id),
            reference: claim_reference(claim.id),
        }
    }

    pub fn for_quiz(user_id: Uuid, attempt_id: Uuid, reward: Money, prompt: &str) -> Self {
        let excerpt: String = prompt.chars().take(50).collect();
        CreditRequest {
            user_id,
            amount: reward,
            kind: TxKind::Earning,
            description: format!("Question answered correctly: \"{}\"", excerpt),
            claim_id: None,
            reference: format!("quiz:{}:{}", user_id, attempt_id),
        }
    }

    /// Operator goodwill credit. `key` makes the call idempotent; without one
    /// every call is a fresh adjustment.
    pub fn adjustment(user_id: Uuid, amount: Money, description: String, key: Option<&str>) -> Self {
        let key = key
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        CreditRequest {
            user_id,
            amount,
            kind: TxKind::Adjustment,
            description,
            claim_id: None,
            reference: format!("adjustment:{}:{}", user_id, key),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.amount.is_positive() {
            return Err(MarketError::InvalidAmount(format!(
                "credit must be positive, got {}",
                self.amount
            )));
        }
        if self.kind == TxKind::WithdrawalRequest {
            return Err(MarketError::InvalidInput(
                "withdrawal requests cannot be credited".into(),
            ));
        }
        Ok(())
    }
}

pub fn claim_reference(claim_id: Uuid) -> String {
    format!("claim:{}", claim_id)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "transaction", rename_all = "snake_case")]
pub enum CreditOutcome {
    Credited(Transaction),
    AlreadyCredited(Transaction),
}

impl CreditOutcome {
    pub fn transaction(&self) -> &Transaction {
        match self {
            CreditOutcome::Credited(tx) | CreditOutcome::AlreadyCredited(tx) => tx,
        }
    }

    pub fn into_transaction(self) -> Transaction {
        match self {
            CreditOutcome::Credited(tx) | CreditOutcome::AlreadyCredited(tx) => tx,
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, CreditOutcome::Credited(_))
    }
}

/// Apply a credit to a locked account row.
///
/// `existing` is the transaction already stored under the request's
/// reference, if any. When present nothing is mutated; it must belong to the
/// same user, otherwise the reference is reported as taken.
pub fn apply(
    account: &mut Account,
    req: &CreditRequest,
    existing: Option<Transaction>,
    now: DateTime<Utc>,
) -> Result<CreditOutcome> {
    if let Some(tx) = existing {
        if tx.user_id != req.user_id {
            return Err(MarketError::InvalidInput(format!(
                "reference {} already belongs to another user",
                req.reference
            )));
        }
        return Ok(CreditOutcome::AlreadyCredited(tx));
    }
    req.validate()?;
    if account.user_id != req.user_id {
        return Err(MarketError::UserNotFound(req.user_id));
    }
    account.apply_credit(req.amount, req.kind, now)?;
    Ok(CreditOutcome::Credited(Transaction {
        id: Uuid::new_v4(),
        user_id: req.user_id,
        amount: req.amount,
        kind: req.kind,
        status: TxStatus::Completed,
        description: req.description.clone(),
        claim_id: req.claim_id,
        reference: Some(req.reference.clone()),
        destination: None,
        failure_reason: None,
        created_at: now,
        settled_at: Some(now),
    }))
}

/// Credit through the store in a single transaction.
pub async fn credit(store: &dyn MarketStore, req: &CreditRequest) -> Result<CreditOutcome> {
    req.validate()?;
    store.credit(req, Utc::now()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    #[test]
    fn apply_credits_once_per_reference() {
        let now = Utc::now();
        let user = Uuid::new_v4();
        let mut account = Account::new(user, now);
        let req = CreditRequest::adjustment(user, Money::from_cents(250), "welcome".into(), Some("w1"));

        let first = apply(&mut account, &req, None, now).unwrap();
        assert!(first.is_fresh());
        assert_eq!(account.available_balance, Money::from_cents(250));
        assert_eq!(account.total_earnings, Money::ZERO);

        let replay = apply(&mut account, &req, Some(first.transaction().clone()), now).unwrap();
        assert!(!replay.is_fresh());
        assert_eq!(replay.transaction().id, first.transaction().id);
        assert_eq!(account.available_balance, Money::from_cents(250));
    }

    #[test]
    fn apply_rejects_non_positive_amounts() {
        let now = Utc::now();
        let user = Uuid::new_v4();
        let mut account = Account::new(user, now);
        let mut req = CreditRequest::for_quiz(user, Uuid::new_v4(), Money::ZERO, "2+2?");
        assert!(matches!(
            apply(&mut account, &req, None, now),
            Err(MarketError::InvalidAmount(_))
        ));
        req.amount = Money::from_cents(-100);
        assert!(apply(&mut account, &req, None, now).is_err());
        assert_eq!(account.available_balance, Money::ZERO);
    }

    #[test]
    fn apply_refuses_a_reference_held_by_another_user() {
        let now = Utc::now();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut first = Account::new(a, now);
        let req = CreditRequest::adjustment(a, Money::from_cents(100), "bonus".into(), Some("k"));
        let tx = apply(&mut first, &req, None, now).unwrap().into_transaction();

        let mut second = Account::new(b, now);
        let stolen = CreditRequest { user_id: b, ..req };
        assert!(matches!(
            apply(&mut second, &stolen, Some(tx), now),
            Err(MarketError::InvalidInput(_))
        ));
        assert_eq!(second.available_balance, Money::ZERO);
    }

    #[tokio::test]
    async fn adjustment_keys_are_scoped_per_user() {
        let store = MemoryStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        for u in [a, b] {
            store.ensure_account(u, Utc::now()).await.unwrap();
        }
        let bonus = |user| {
            CreditRequest::adjustment(user, Money::from_cents(300), "January bonus".into(), Some("jan-bonus"))
        };

        let for_a = credit(&store, &bonus(a)).await.unwrap();
        let for_b = credit(&store, &bonus(b)).await.unwrap();
        assert!(for_a.is_fresh());
        assert!(for_b.is_fresh());
        assert_eq!(for_b.transaction().user_id, b);
        assert_ne!(for_a.transaction().id, for_b.transaction().id);

        let replay = credit(&store, &bonus(b)).await.unwrap();
        assert!(!replay.is_fresh());
        assert_eq!(replay.transaction().id, for_b.transaction().id);
        for u in [a, b] {
            let account = store.get_account(u).await.unwrap();
            assert_eq!(account.available_balance, Money::from_cents(300));
        }
    }

    #[tokio::test]
    async fn credit_requires_an_account() {
        let store = MemoryStore::new();
        let req = CreditRequest::adjustment(
            Uuid::new_v4(),
            Money::from_cents(100),
            "goodwill".into(),
            None,
        );
        assert!(matches!(
            credit(&store, &req).await,
            Err(MarketError::UserNotFound(_))
        ));
    }

    #[tokio::test]
    async fn failed_commit_leaves_balance_untouched() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        store.ensure_account(user, Utc::now()).await.unwrap();
        let req = CreditRequest::adjustment(user, Money::from_cents(100), "goodwill".into(), None);

        store.fail_next_commit();
        assert!(matches!(
            credit(&store, &req).await,
            Err(MarketError::LedgerWriteFailed(_))
        ));
        let account = store.get_account(user).await.unwrap();
        assert_eq!(account.available_balance, Money::ZERO);
        assert!(store.list_transactions(user, 10).await.unwrap().is_empty());

        credit(&store, &req).await.unwrap();
        let account = store.get_account(user).await.unwrap();
        assert_eq!(account.available_balance, Money::from_cents(100));
    }
}
