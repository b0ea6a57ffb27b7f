//! # Withdrawals
//!
//! A withdrawal request debits `available_balance` immediately and records a
//! pending `withdrawal_request` transaction with a negative amount. Actual
//! funds movement is external: the settlement channel reports back
//! `completed` or `failed`, and a failure refunds the debit.

use crate::error::{MarketError, Result};
use crate::model::{Account, Money, Transaction, TxKind, TxStatus};
use crate::store::MarketStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const MAX_DESTINATION_LEN: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalRequest {
    pub user_id: Uuid,
    pub amount: Money,
    pub destination: String,
}

/// Report from the external settlement channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Settlement {
    Completed,
    Failed { reason: String },
}

impl Settlement {
    pub fn status(&self) -> TxStatus {
        match self {
            Settlement::Completed => TxStatus::Completed,
            Settlement::Failed { .. } => TxStatus::Failed,
        }
    }
}

/// Debit rule. `account` must be the locked row.
pub fn open(account: &mut Account, req: &WithdrawalRequest, now: DateTime<Utc>) -> Result<Transaction> {
    let destination = req.destination.trim();
    if destination.is_empty() {
        return Err(MarketError::InvalidInput("destination must not be empty".into()));
    }
    if destination.chars().count() > MAX_DESTINATION_LEN {
        return Err(MarketError::InvalidInput(format!(
            "destination exceeds {} characters",
            MAX_DESTINATION_LEN
        )));
    }
    let signed = req
        .amount
        .checked_neg()
        .ok_or_else(|| MarketError::InvalidAmount(req.amount.to_string()))?;
    account.debit(req.amount, now)?;
    Ok(Transaction {
        id: Uuid::new_v4(),
        user_id: req.user_id,
        amount: signed,
        kind: TxKind::WithdrawalRequest,
        status: TxStatus::Pending,
        description: format!("Withdrawal to {}", destination),
        claim_id: None,
        reference: None,
        destination: Some(destination.to_string()),
        failure_reason: None,
        created_at: now,
        settled_at: None,
    })
}

/// Settlement rule. A failed withdrawal returns its amount to the balance.
pub fn settle(
    tx: &mut Transaction,
    account: &mut Account,
    settlement: &Settlement,
    now: DateTime<Utc>,
) -> Result<()> {
    let reason = match settlement {
        Settlement::Completed => None,
        Settlement::Failed { reason } => Some(reason.clone()),
    };
    tx.settle(settlement.status(), reason, now)?;
    if let Settlement::Failed { .. } = settlement {
        let refund = tx
            .amount
            .checked_neg()
            .ok_or_else(|| MarketError::InvalidAmount(tx.amount.to_string()))?;
        account.refund(refund, now)?;
    }
    Ok(())
}

/// `RequestWithdrawal(user, amount, destination)`.
pub async fn request(store: &dyn MarketStore, req: &WithdrawalRequest) -> Result<Transaction> {
    if !req.amount.is_positive() {
        return Err(MarketError::InvalidAmount(format!(
            "withdrawal must be positive, got {}",
            req.amount
        )));
    }
    store.open_withdrawal(req, Utc::now()).await
}

pub async fn settle_reported(
    store: &dyn MarketStore,
    tx_id: Uuid,
    settlement: &Settlement,
) -> Result<Transaction> {
    store.settle_withdrawal(tx_id, settlement, Utc::now()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payout::{self, CreditRequest};
    use crate::store::memory::MemoryStore;

    async fn funded_store(cents: i64) -> (MemoryStore, Uuid) {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        store.ensure_account(user, Utc::now()).await.unwrap();
        let req = CreditRequest {
            user_id: user,
            amount: Money::from_cents(cents),
            kind: TxKind::Earning,
            description: "seed".into(),
            claim_id: None,
            reference: "seed".into(),
        };
        payout::credit(&store, &req).await.unwrap();
        (store, user)
    }

    fn withdrawal(user_id: Uuid, cents: i64) -> WithdrawalRequest {
        WithdrawalRequest {
            user_id,
            amount: Money::from_cents(cents),
            destination: "paypal:me@example.com".into(),
        }
    }

    #[tokio::test]
    async fn overdraft_changes_nothing() {
        let (store, user) = funded_store(1000).await;
        let err = request(&store, &withdrawal(user, 1500)).await.unwrap_err();
        assert!(matches!(err, MarketError::InsufficientBalance { .. }));
        let account = store.get_account(user).await.unwrap();
        assert_eq!(account.available_balance, Money::from_cents(1000));
        assert_eq!(store.list_transactions(user, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn withdrawal_debits_balance_but_not_earnings() {
        let (store, user) = funded_store(1000).await;
        let tx = request(&store, &withdrawal(user, 400)).await.unwrap();
        assert_eq!(tx.amount, Money::from_cents(-400));
        assert_eq!(tx.status, TxStatus::Pending);
        assert_eq!(tx.kind, TxKind::WithdrawalRequest);

        let account = store.get_account(user).await.unwrap();
        assert_eq!(account.available_balance, Money::from_cents(600));
        assert_eq!(account.total_earnings, Money::from_cents(1000));
    }

    #[tokio::test]
    async fn non_positive_and_blank_requests_are_invalid() {
        let (store, user) = funded_store(1000).await;
        assert!(matches!(
            request(&store, &withdrawal(user, 0)).await,
            Err(MarketError::InvalidAmount(_))
        ));
        let mut blank = withdrawal(user, 100);
        blank.destination = "   ".into();
        assert!(matches!(
            request(&store, &blank).await,
            Err(MarketError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn failed_settlement_refunds_once() {
        let (store, user) = funded_store(1000).await;
        let tx = request(&store, &withdrawal(user, 400)).await.unwrap();
        let failed = Settlement::Failed {
            reason: "account closed".into(),
        };
        let settled = settle_reported(&store, tx.id, &failed).await.unwrap();
        assert_eq!(settled.status, TxStatus::Failed);
        assert_eq!(settled.failure_reason.as_deref(), Some("account closed"));
        assert_eq!(
            store.get_account(user).await.unwrap().available_balance,
            Money::from_cents(1000)
        );

        assert!(matches!(
            settle_reported(&store, tx.id, &failed).await,
            Err(MarketError::TransactionNotPending { .. })
        ));
        assert_eq!(
            store.get_account(user).await.unwrap().available_balance,
            Money::from_cents(1000)
        );
    }

    #[tokio::test]
    async fn completed_settlement_keeps_debit() {
        let (store, user) = funded_store(1000).await;
        let tx = request(&store, &withdrawal(user, 400)).await.unwrap();
        settle_reported(&store, tx.id, &Settlement::Completed)
            .await
            .unwrap();
        assert_eq!(
            store.get_account(user).await.unwrap().available_balance,
            Money::from_cents(600)
        );
        assert!(store.list_pending_withdrawals(10).await.unwrap().is_empty());
    }

    #[test]
    fn settlement_json_shape() {
        let s: Settlement =
            serde_json::from_str(r#"{"outcome":"failed","reason":"bounced"}"#).unwrap();
        assert_eq!(
            s,
            Settlement::Failed {
                reason: "bounced".into()
            }
        );
        let c: Settlement = serde_json::from_str(r#"{"outcome":"completed"}"#).unwrap();
        assert_eq!(c.status(), TxStatus::Completed);
    }
}
