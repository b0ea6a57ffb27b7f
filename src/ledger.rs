//! # Ledger Reconciliation
//!
//! The stored balance is derived state; the transaction log is the record.
//! [`reconcile`] recomputes both balance counters from the log:
//!
//! ```text
//! expected_available = Σ completed earnings
//!                    + Σ completed adjustments
//!                    − Σ non-failed withdrawal requests
//! expected_total     = Σ completed earnings
//! ```
//!
//! Pending withdrawal requests count because the debit happens when the
//! request is opened, not when it settles.

use crate::error::Result;
use crate::model::{Account, Claim, ClaimStatus, Money, Transaction, TxKind, TxStatus};
use crate::store::MarketStore;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    pub user_id: Uuid,
    pub available_balance: Money,
    pub total_earnings: Money,
    pub expected_available: Money,
    pub expected_total_earnings: Money,
    pub transaction_count: usize,
    pub balanced: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserStats {
    pub user_id: Uuid,
    pub completed_tasks: usize,
    /// Claims still holding a slot (claimed or submitted).
    pub pending_tasks: usize,
    pub task_earnings: Money,
    pub quiz_earnings: Money,
    pub available_balance: Money,
    pub total_earnings: Money,
}

fn sum<'a>(txs: impl Iterator<Item = &'a Transaction>) -> Money {
    Money::from_cents(txs.fold(0i64, |acc, tx| acc.saturating_add(tx.amount.cents())))
}

pub fn reconcile(account: &Account, txs: &[Transaction]) -> ReconciliationReport {
    let mine = || txs.iter().filter(|tx| tx.user_id == account.user_id);
    let earnings = sum(mine().filter(|tx| tx.kind == TxKind::Earning && tx.status == TxStatus::Completed));
    let adjustments =
        sum(mine().filter(|tx| tx.kind == TxKind::Adjustment && tx.status == TxStatus::Completed));
    // Withdrawal amounts are stored negative.
    let withdrawals = sum(
        mine().filter(|tx| tx.kind == TxKind::WithdrawalRequest && tx.status != TxStatus::Failed),
    );
    let expected_available = Money::from_cents(
        earnings
            .cents()
            .saturating_add(adjustments.cents())
            .saturating_add(withdrawals.cents()),
    );
    ReconciliationReport {
        user_id: account.user_id,
        available_balance: account.available_balance,
        total_earnings: account.total_earnings,
        expected_available,
        expected_total_earnings: earnings,
        transaction_count: mine().count(),
        balanced: expected_available == account.available_balance
            && earnings == account.total_earnings,
    }
}

pub fn user_stats(account: &Account, claims: &[Claim], txs: &[Transaction]) -> UserStats {
    let completed: Vec<&Claim> = claims
        .iter()
        .filter(|c| c.status() == ClaimStatus::Completed)
        .collect();
    let task_earnings = Money::from_cents(
        completed
            .iter()
            .fold(0i64, |acc, c| acc.saturating_add(c.payout.cents())),
    );
    let quiz_earnings = sum(txs.iter().filter(|tx| {
        tx.kind == TxKind::Earning
            && tx.status == TxStatus::Completed
            && tx.claim_id.is_none()
    }));
    UserStats {
        user_id: account.user_id,
        completed_tasks: completed.len(),
        pending_tasks: claims.iter().filter(|c| c.is_active()).count(),
        task_earnings,
        quiz_earnings,
        available_balance: account.available_balance,
        total_earnings: account.total_earnings,
    }
}

/// `Reconcile(user)`.
pub async fn reconcile_user(store: &dyn MarketStore, user_id: Uuid) -> Result<ReconciliationReport> {
    let account = store.get_account(user_id).await?;
    let txs = store.list_transactions(user_id, i64::MAX).await?;
    Ok(reconcile(&account, &txs))
}

/// `UserStats(user)`.
pub async fn stats(store: &dyn MarketStore, user_id: Uuid) -> Result<UserStats> {
    let account = store.get_account(user_id).await?;
    let claims = store.list_user_claims(user_id).await?;
    let txs = store.list_transactions(user_id, i64::MAX).await?;
    Ok(user_stats(&account, &claims, &txs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn tx(user_id: Uuid, cents: i64, kind: TxKind, status: TxStatus) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            user_id,
            amount: Money::from_cents(cents),
            kind,
            status,
            description: String::new(),
            claim_id: None,
            reference: None,
            destination: None,
            failure_reason: None,
            created_at: Utc::now(),
            settled_at: None,
        }
    }

    #[test]
    fn balanced_ledger_with_every_kind() {
        let user = Uuid::new_v4();
        let mut account = Account::new(user, Utc::now());
        account.available_balance = Money::from_cents(1000 + 200 - 400 - 100);
        account.total_earnings = Money::from_cents(1000);
        let txs = vec![
            tx(user, 1000, TxKind::Earning, TxStatus::Completed),
            tx(user, 200, TxKind::Adjustment, TxStatus::Completed),
            tx(user, -400, TxKind::WithdrawalRequest, TxStatus::Completed),
            tx(user, -100, TxKind::WithdrawalRequest, TxStatus::Pending),
            tx(user, -300, TxKind::WithdrawalRequest, TxStatus::Failed),
        ];
        let report = reconcile(&account, &txs);
        assert!(report.balanced, "{:?}", report);
        assert_eq!(report.expected_available, Money::from_cents(700));
        assert_eq!(report.transaction_count, 5);
    }

    #[test]
    fn drift_is_reported() {
        let user = Uuid::new_v4();
        let mut account = Account::new(user, Utc::now());
        account.available_balance = Money::from_cents(600);
        account.total_earnings = Money::from_cents(500);
        let txs = vec![tx(user, 500, TxKind::Earning, TxStatus::Completed)];
        let report = reconcile(&account, &txs);
        assert!(!report.balanced);
        assert_eq!(report.expected_available, Money::from_cents(500));
    }

    #[test]
    fn other_users_transactions_are_ignored() {
        let user = Uuid::new_v4();
        let account = Account::new(user, Utc::now());
        let txs = vec![tx(Uuid::new_v4(), 500, TxKind::Earning, TxStatus::Completed)];
        let report = reconcile(&account, &txs);
        assert!(report.balanced);
        assert_eq!(report.transaction_count, 0);
    }

    #[test]
    fn stats_split_task_and_quiz_earnings() {
        let now = Utc::now();
        let user = Uuid::new_v4();
        let account = Account::new(user, now);
        let task = crate::model::task::tests::sample_task(5, 500);
        let mut done = Claim::new(user, &task, now);
        done.submit("done", 100, now).unwrap();
        done.complete(now).unwrap();
        let active = Claim::new(user, &task, now);

        let mut earning = tx(user, 500, TxKind::Earning, TxStatus::Completed);
        earning.claim_id = Some(done.id);
        let quiz = tx(user, 75, TxKind::Earning, TxStatus::Completed);

        let stats = user_stats(&account, &[done, active], &[earning, quiz]);
        assert_eq!(stats.completed_tasks, 1);
        assert_eq!(stats.pending_tasks, 1);
        assert_eq!(stats.task_earnings, Money::from_cents(500));
        assert_eq!(stats.quiz_earnings, Money::from_cents(75));
    }
}
