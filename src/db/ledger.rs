//! Accounts, credits, withdrawals and ledger reads.

use super::{
    convert_all, find_by_reference, insert_transaction, lock_account, persist_credit,
    save_account, AccountRow, Database, TransactionRow, ACCOUNT_COLUMNS, TX_COLUMNS,
};
use crate::error::{MarketError, Result};
use crate::model::{Account, AccountStatus, Transaction, TxStatus};
use crate::payout::{self, CreditOutcome, CreditRequest};
use crate::store::MarketCounts;
use crate::withdrawals::{self, Settlement, WithdrawalRequest};
use chrono::{DateTime, Utc};
use uuid::Uuid;

impl Database {
    /// Create the account on first sight; later calls return the stored row.
    pub(super) async fn upsert_account(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Account> {
        sqlx::query(
            "INSERT INTO accounts (user_id, created_at, updated_at) VALUES ($1, $2, $2)
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        self.fetch_account(user_id).await
    }

    pub(super) async fn fetch_account(&self, user_id: Uuid) -> Result<Account> {
        let sql = format!("SELECT {} FROM accounts WHERE user_id = $1", ACCOUNT_COLUMNS);
        sqlx::query_as::<_, AccountRow>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(MarketError::UserNotFound(user_id))?
            .try_into()
    }

    pub(super) async fn update_account_status(
        &self,
        user_id: Uuid,
        status: AccountStatus,
        now: DateTime<Utc>,
    ) -> Result<Account> {
        let mut tx = self.pool.begin().await?;
        let mut account = lock_account(&mut tx, user_id).await?;
        account.status = status;
        account.updated_at = now;
        save_account(&mut tx, &account).await?;
        tx.commit().await?;
        Ok(account)
    }

    pub(super) async fn credit_account(
        &self,
        req: &CreditRequest,
        now: DateTime<Utc>,
    ) -> Result<CreditOutcome> {
        let mut tx = self.pool.begin().await?;
        let mut account = lock_account(&mut tx, req.user_id).await?;
        let existing = find_by_reference(&mut tx, &req.reference).await?;
        let outcome = payout::apply(&mut account, req, existing, now)?;
        if outcome.is_fresh() {
            persist_credit(&mut tx, &account, &outcome)
                .await
                .map_err(|e| MarketError::LedgerWriteFailed(e.to_string()))?;
            tx.commit().await?;
        }
        Ok(outcome)
    }

    pub(super) async fn debit_withdrawal(
        &self,
        req: &WithdrawalRequest,
        now: DateTime<Utc>,
    ) -> Result<Transaction> {
        let mut tx = self.pool.begin().await?;
        let mut account = lock_account(&mut tx, req.user_id).await?;
        let pending = withdrawals::open(&mut account, req, now)?;
        save_account(&mut tx, &account).await?;
        insert_transaction(&mut tx, &pending)
            .await
            .map_err(|e| MarketError::LedgerWriteFailed(e.to_string()))?;
        tx.commit().await?;
        Ok(pending)
    }

    /// Settle a pending withdrawal. Locks the transaction row, then the account.
    pub(super) async fn record_settlement(
        &self,
        tx_id: Uuid,
        settlement: &Settlement,
        now: DateTime<Utc>,
    ) -> Result<Transaction> {
        let mut tx = self.pool.begin().await?;
        let sql = format!("SELECT {} FROM transactions WHERE id = $1 FOR UPDATE", TX_COLUMNS);
        let mut pending: Transaction = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(tx_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(MarketError::TransactionNotFound(tx_id))?
            .try_into()?;
        let mut account = lock_account(&mut tx, pending.user_id).await?;
        withdrawals::settle(&mut pending, &mut account, settlement, now)?;

        sqlx::query(
            "UPDATE transactions SET status = $2, failure_reason = $3, settled_at = $4
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(pending.id)
        .bind(pending.status.as_str())
        .bind(&pending.failure_reason)
        .bind(pending.settled_at)
        .execute(&mut *tx)
        .await?;
        if pending.status == TxStatus::Failed {
            save_account(&mut tx, &account).await?;
        }
        tx.commit().await?;
        Ok(pending)
    }

    pub(super) async fn fetch_transaction(&self, id: Uuid) -> Result<Transaction> {
        let sql = format!("SELECT {} FROM transactions WHERE id = $1", TX_COLUMNS);
        sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(MarketError::TransactionNotFound(id))?
            .try_into()
    }

    /// Newest first.
    pub(super) async fn fetch_user_transactions(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Transaction>> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE user_id = $1
             ORDER BY created_at DESC, id DESC LIMIT $2",
            TX_COLUMNS
        );
        let rows = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(user_id)
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await?;
        convert_all(rows)
    }

    /// Oldest first, the order a settlement worker drains them in.
    pub(super) async fn fetch_pending_withdrawals(&self, limit: i64) -> Result<Vec<Transaction>> {
        let sql = format!(
            "SELECT {} FROM transactions
             WHERE kind = 'withdrawal_request' AND status = 'pending'
             ORDER BY created_at, id LIMIT $1",
            TX_COLUMNS
        );
        let rows = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await?;
        convert_all(rows)
    }

    pub(super) async fn count_open_work(&self) -> Result<MarketCounts> {
        let (active_tasks, pending_withdrawals): (i64, i64) = sqlx::query_as(
            "SELECT
               (SELECT COUNT(*) FROM tasks WHERE status = 'active'),
               (SELECT COUNT(*) FROM transactions
                 WHERE kind = 'withdrawal_request' AND status = 'pending')",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(MarketCounts {
            active_tasks,
            pending_withdrawals,
        })
    }
}
