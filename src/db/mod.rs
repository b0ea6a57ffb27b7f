//! # Database: PostgreSQL Storage Layer
//!
//! Implements [`MarketStore`] over `sqlx::PgPool` (Supabase PostgreSQL or
//! any Postgres 14+). Every store operation runs in one database transaction
//! and takes row locks with `SELECT … FOR UPDATE` before applying the shared
//! transition rule, so contended counters are never blindly overwritten.
//!
//! ## Schema
//!
//! - `tasks`: catalog with `completed_slots`/`reserved_slots` counters
//! - `claims`: one row per (user, task), tagged state flattened to columns
//! - `accounts`: balance counters, `CHECK (available_cents >= 0)`
//! - `transactions`: append-only ledger, unique `reference` idempotency key
//! - `quiz_issues`: attempt ids handed out with a question
//! - `quiz_attempts`: one answer per issued (user, attempt id)
//!
//! ## Module Structure
//!
//! - [`tasks`]: catalog reads and operator status changes
//! - [`claims`]: admission, proof, approval, purge, expiry sweep
//! - [`ledger`]: accounts, credits, withdrawals, transaction reads
//! - [`quiz`]: issued attempts, answers with their credit
//!
//! ## Lock Order
//!
//! Task → claim → account. Operations that start from a claim id read its
//! `task_id` unlocked first, then lock in that order.

mod claims;
mod ledger;
mod quiz;
mod tasks;

use crate::claims::ClaimOutcome;
use crate::error::{MarketError, Result};
use crate::model::{
    Account, AccountStatus, Claim, ClaimState, Money, Task, TaskStatus, Transaction,
};
use crate::payout::{CreditOutcome, CreditRequest};
use crate::quiz::{QuizAttempt, QuizIssue};
use crate::store::{MarketCounts, MarketStore};
use crate::sweeper::SweepReport;
use crate::verifier::Approval;
use crate::withdrawals::{Settlement, WithdrawalRequest};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgPool, PgPoolOptions};
use uuid::Uuid;

// ── Row types ───────────────────────────────────────────────────

pub(crate) const TASK_COLUMNS: &str = "id, title, description, kind, payout_cents, total_slots, \
     completed_slots, reserved_slots, status, expires_at, content_url, affiliate_link, \
     client_name, created_by, created_at, updated_at";

pub(crate) const CLAIM_COLUMNS: &str = "id, user_id, task_id, payout_cents, status, proof, \
     claimed_at, submitted_at, completed_at, abandoned_at";

pub(crate) const ACCOUNT_COLUMNS: &str =
    "user_id, available_cents, total_earned_cents, status, created_at, updated_at";

pub(crate) const TX_COLUMNS: &str = "id, user_id, amount_cents, kind, status, description, \
     claim_id, reference, destination, failure_reason, created_at, settled_at";

fn corrupt(table: &str, e: MarketError) -> MarketError {
    MarketError::Storage(format!("unreadable {} row: {}", table, e))
}

#[derive(sqlx::FromRow)]
pub(crate) struct TaskRow {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub kind: String,
    pub payout_cents: Money,
    pub total_slots: i32,
    pub completed_slots: i32,
    pub reserved_slots: i32,
    pub status: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub content_url: Option<String>,
    pub affiliate_link: Option<String>,
    pub client_name: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for Task {
    type Error = MarketError;

    fn try_from(row: TaskRow) -> Result<Self> {
        Ok(Task {
            id: row.id,
            title: row.title,
            description: row.description,
            kind: row.kind.parse().map_err(|e| corrupt("tasks", e))?,
            payout: row.payout_cents,
            total_slots: row.total_slots,
            completed_slots: row.completed_slots,
            reserved_slots: row.reserved_slots,
            status: row.status.parse().map_err(|e| corrupt("tasks", e))?,
            expires_at: row.expires_at,
            content_url: row.content_url,
            affiliate_link: row.affiliate_link,
            client_name: row.client_name,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct ClaimRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub task_id: Uuid,
    pub payout_cents: Money,
    pub status: String,
    pub proof: Option<String>,
    pub claimed_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub abandoned_at: Option<DateTime<Utc>>,
}

impl TryFrom<ClaimRow> for Claim {
    type Error = MarketError;

    fn try_from(row: ClaimRow) -> Result<Self> {
        let state = ClaimState::from_columns(
            &row.status,
            row.proof,
            row.submitted_at,
            row.completed_at,
            row.abandoned_at,
        )
        .map_err(|e| corrupt("claims", e))?;
        Ok(Claim {
            id: row.id,
            user_id: row.user_id,
            task_id: row.task_id,
            payout: row.payout_cents,
            claimed_at: row.claimed_at,
            state,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct AccountRow {
    pub user_id: Uuid,
    pub available_cents: Money,
    pub total_earned_cents: Money,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = MarketError;

    fn try_from(row: AccountRow) -> Result<Self> {
        Ok(Account {
            user_id: row.user_id,
            available_balance: row.available_cents,
            total_earnings: row.total_earned_cents,
            status: row
                .status
                .parse::<AccountStatus>()
                .map_err(|e| corrupt("accounts", e))?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct TransactionRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount_cents: Money,
    pub kind: String,
    pub status: String,
    pub description: String,
    pub claim_id: Option<Uuid>,
    pub reference: Option<String>,
    pub destination: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = MarketError;

    fn try_from(row: TransactionRow) -> Result<Self> {
        Ok(Transaction {
            id: row.id,
            user_id: row.user_id,
            amount: row.amount_cents,
            kind: row.kind.parse().map_err(|e| corrupt("transactions", e))?,
            status: row.status.parse().map_err(|e| corrupt("transactions", e))?,
            description: row.description,
            claim_id: row.claim_id,
            reference: row.reference,
            destination: row.destination,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
            settled_at: row.settled_at,
        })
    }
}

pub(crate) fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = MarketError>,
{
    rows.into_iter().map(T::try_from).collect()
}

// ── Row-level helpers shared by the submodules ──────────────────

pub(crate) async fn lock_task(conn: &mut PgConnection, id: Uuid) -> Result<Task> {
    let sql = format!("SELECT {} FROM tasks WHERE id = $1 FOR UPDATE", TASK_COLUMNS);
    let row = sqlx::query_as::<_, TaskRow>(&sql)
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or(MarketError::TaskNotFound(id))?;
    row.try_into()
}

pub(crate) async fn save_task_counters(conn: &mut PgConnection, task: &Task) -> Result<()> {
    sqlx::query(
        "UPDATE tasks SET completed_slots = $2, reserved_slots = $3, status = $4, updated_at = $5
         WHERE id = $1",
    )
    .bind(task.id)
    .bind(task.completed_slots)
    .bind(task.reserved_slots)
    .bind(task.status.as_str())
    .bind(task.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

pub(crate) async fn save_claim(conn: &mut PgConnection, claim: &Claim) -> Result<()> {
    let s = &claim.state;
    sqlx::query(
        "INSERT INTO claims (id, user_id, task_id, payout_cents, status, proof,
                             claimed_at, submitted_at, completed_at, abandoned_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
         ON CONFLICT (id) DO UPDATE SET
           payout_cents = EXCLUDED.payout_cents,
           status = EXCLUDED.status,
           proof = EXCLUDED.proof,
           claimed_at = EXCLUDED.claimed_at,
           submitted_at = EXCLUDED.submitted_at,
           completed_at = EXCLUDED.completed_at,
           abandoned_at = EXCLUDED.abandoned_at",
    )
    .bind(claim.id)
    .bind(claim.user_id)
    .bind(claim.task_id)
    .bind(claim.payout)
    .bind(s.status().as_str())
    .bind(s.proof())
    .bind(claim.claimed_at)
    .bind(s.submitted_at())
    .bind(s.completed_at())
    .bind(s.abandoned_at())
    .execute(conn)
    .await?;
    Ok(())
}

pub(crate) async fn lock_account(conn: &mut PgConnection, user_id: Uuid) -> Result<Account> {
    let sql = format!(
        "SELECT {} FROM accounts WHERE user_id = $1 FOR UPDATE",
        ACCOUNT_COLUMNS
    );
    let row = sqlx::query_as::<_, AccountRow>(&sql)
        .bind(user_id)
        .fetch_optional(conn)
        .await?
        .ok_or(MarketError::UserNotFound(user_id))?;
    row.try_into()
}

pub(crate) async fn save_account(conn: &mut PgConnection, account: &Account) -> Result<()> {
    sqlx::query(
        "UPDATE accounts SET available_cents = $2, total_earned_cents = $3, status = $4,
                             updated_at = $5
         WHERE user_id = $1",
    )
    .bind(account.user_id)
    .bind(account.available_balance)
    .bind(account.total_earnings)
    .bind(account.status.as_str())
    .bind(account.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

pub(crate) async fn find_by_reference(
    conn: &mut PgConnection,
    reference: &str,
) -> Result<Option<Transaction>> {
    let sql = format!("SELECT {} FROM transactions WHERE reference = $1", TX_COLUMNS);
    sqlx::query_as::<_, TransactionRow>(&sql)
        .bind(reference)
        .fetch_optional(conn)
        .await?
        .map(Transaction::try_from)
        .transpose()
}

pub(crate) async fn insert_transaction(conn: &mut PgConnection, tx: &Transaction) -> Result<()> {
    sqlx::query(
        "INSERT INTO transactions (id, user_id, amount_cents, kind, status, description,
                                   claim_id, reference, destination, failure_reason,
                                   created_at, settled_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
    )
    .bind(tx.id)
    .bind(tx.user_id)
    .bind(tx.amount)
    .bind(tx.kind.as_str())
    .bind(tx.status.as_str())
    .bind(&tx.description)
    .bind(tx.claim_id)
    .bind(&tx.reference)
    .bind(&tx.destination)
    .bind(&tx.failure_reason)
    .bind(tx.created_at)
    .bind(tx.settled_at)
    .execute(conn)
    .await?;
    Ok(())
}

/// Write the effects of a credit decided by [`crate::payout::apply`].
pub(crate) async fn persist_credit(
    conn: &mut PgConnection,
    account: &Account,
    outcome: &CreditOutcome,
) -> Result<()> {
    if let CreditOutcome::Credited(tx) = outcome {
        insert_transaction(&mut *conn, tx).await?;
        save_account(&mut *conn, account).await?;
    }
    Ok(())
}

// ── Connection ──────────────────────────────────────────────────

pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL using the provided database URL.
    ///
    /// Parses the URL by hand so the Supabase pooler's `user.project-ref`
    /// username survives intact.
    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let url = url::Url::parse(database_url)?;
        let username = urlencoding::decode(url.username())?.into_owned();
        let password = url
            .password()
            .map(|p| urlencoding::decode(p).map(|s| s.into_owned()))
            .transpose()?;
        let mut opts = PgConnectOptions::new()
            .host(url.host_str().unwrap_or("localhost"))
            .port(url.port().unwrap_or(5432))
            .database(url.path().trim_start_matches('/'))
            .username(&username)
            .statement_cache_capacity(0);
        if let Some(ref pw) = password {
            opts = opts.password(pw);
        }
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(opts)
            .await?;
        Ok(Database { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Database { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded migrations under `migrations/`.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl MarketStore for Database {
    /// `SELECT 1`, used by `/readyz`.
    async fn health_check(&self) -> Result<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_task(&self, task: &Task) -> Result<()> {
        self.create_task_row(task).await
    }

    async fn get_task(&self, id: Uuid) -> Result<Task> {
        self.fetch_task(id).await
    }

    async fn list_tasks(&self, status: Option<TaskStatus>, limit: i64) -> Result<Vec<Task>> {
        self.fetch_tasks(status, limit).await
    }

    async fn set_task_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        now: DateTime<Utc>,
    ) -> Result<Task> {
        self.update_task_status(id, status, now).await
    }

    async fn admit_claim(
        &self,
        user_id: Uuid,
        task_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(Claim, ClaimOutcome)> {
        self.claim_slot(user_id, task_id, now).await
    }

    async fn get_claim(&self, id: Uuid) -> Result<Claim> {
        self.fetch_claim(id).await
    }

    async fn find_claim(&self, user_id: Uuid, task_id: Uuid) -> Result<Option<Claim>> {
        self.fetch_user_task_claim(user_id, task_id).await
    }

    async fn list_user_claims(&self, user_id: Uuid) -> Result<Vec<Claim>> {
        self.fetch_user_claims(user_id).await
    }

    async fn record_proof(
        &self,
        user_id: Uuid,
        task_id: Uuid,
        proof: &str,
        max_len: usize,
        now: DateTime<Utc>,
    ) -> Result<(Claim, bool)> {
        self.submit_claim_proof(user_id, task_id, proof, max_len, now)
            .await
    }

    async fn approve_claim(&self, claim_id: Uuid, now: DateTime<Utc>) -> Result<Approval> {
        self.complete_claim(claim_id, now).await
    }

    async fn purge_claim(&self, claim_id: Uuid, now: DateTime<Utc>) -> Result<Claim> {
        self.delete_claim(claim_id, now).await
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        self.expire_tasks(now).await
    }

    async fn ensure_account(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Account> {
        self.upsert_account(user_id, now).await
    }

    async fn get_account(&self, user_id: Uuid) -> Result<Account> {
        self.fetch_account(user_id).await
    }

    async fn set_account_status(
        &self,
        user_id: Uuid,
        status: AccountStatus,
        now: DateTime<Utc>,
    ) -> Result<Account> {
        self.update_account_status(user_id, status, now).await
    }

    async fn credit(&self, req: &CreditRequest, now: DateTime<Utc>) -> Result<CreditOutcome> {
        self.credit_account(req, now).await
    }

    async fn open_withdrawal(
        &self,
        req: &WithdrawalRequest,
        now: DateTime<Utc>,
    ) -> Result<Transaction> {
        self.debit_withdrawal(req, now).await
    }

    async fn settle_withdrawal(
        &self,
        tx_id: Uuid,
        settlement: &Settlement,
        now: DateTime<Utc>,
    ) -> Result<Transaction> {
        self.record_settlement(tx_id, settlement, now).await
    }

    async fn get_transaction(&self, id: Uuid) -> Result<Transaction> {
        self.fetch_transaction(id).await
    }

    async fn list_transactions(&self, user_id: Uuid, limit: i64) -> Result<Vec<Transaction>> {
        self.fetch_user_transactions(user_id, limit).await
    }

    async fn list_pending_withdrawals(&self, limit: i64) -> Result<Vec<Transaction>> {
        self.fetch_pending_withdrawals(limit).await
    }

    async fn market_counts(&self) -> Result<MarketCounts> {
        self.count_open_work().await
    }

    async fn issue_quiz_attempt(&self, issue: &QuizIssue) -> Result<()> {
        self.insert_quiz_issue(issue).await
    }

    async fn find_quiz_issue(&self, user_id: Uuid, attempt_id: Uuid) -> Result<Option<QuizIssue>> {
        self.fetch_quiz_issue(user_id, attempt_id).await
    }

    async fn record_quiz_answer(
        &self,
        attempt: &QuizAttempt,
        credit: Option<&CreditRequest>,
        now: DateTime<Utc>,
    ) -> Result<(QuizAttempt, bool)> {
        self.insert_quiz_attempt(attempt, credit, now).await
    }
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TxKind, TxStatus};

    fn task_row(kind: &str, status: &str) -> TaskRow {
        let now = Utc::now();
        TaskRow {
            id: Uuid::new_v4(),
            title: "Watch the trailer".into(),
            description: None,
            kind: kind.into(),
            payout_cents: Money::from_cents(120),
            total_slots: 10,
            completed_slots: 2,
            reserved_slots: 3,
            status: status.into(),
            expires_at: None,
            content_url: Some("https://example.com/trailer".into()),
            affiliate_link: None,
            client_name: None,
            created_by: Some("ops".into()),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn task_row_converts() {
        let task = Task::try_from(task_row("video", "paused")).unwrap();
        assert_eq!(task.status, TaskStatus::Paused);
        assert_eq!(task.remaining_slots(), 5);
    }

    #[test]
    fn unknown_enum_values_are_storage_faults() {
        let err = Task::try_from(task_row("podcast", "active")).unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("tasks"));
    }

    #[test]
    fn claim_row_with_missing_proof_is_rejected() {
        let row = ClaimRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            payout_cents: Money::from_cents(100),
            status: "completed".into(),
            proof: None,
            claimed_at: Utc::now(),
            submitted_at: None,
            completed_at: None,
            abandoned_at: None,
        };
        assert!(matches!(
            Claim::try_from(row),
            Err(MarketError::Storage(_))
        ));
    }

    #[test]
    fn transaction_row_converts() {
        let row = TransactionRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            amount_cents: Money::from_cents(-400),
            kind: "withdrawal_request".into(),
            status: "pending".into(),
            description: "Withdrawal".into(),
            claim_id: None,
            reference: None,
            destination: Some("bank".into()),
            failure_reason: None,
            created_at: Utc::now(),
            settled_at: None,
        };
        let tx = Transaction::try_from(row).unwrap();
        assert_eq!(tx.kind, TxKind::WithdrawalRequest);
        assert_eq!(tx.status, TxStatus::Pending);
        assert!(tx.is_pending_withdrawal());
    }
}
