//! # Store: The Storage Boundary
//!
//! [`MarketStore`] is the only way components reach persistent state. Each
//! method is one atomic unit of work: it locks the rows it needs, applies the
//! shared transition rule from the owning component module, and commits
//! everything together or nothing.
//!
//! Two backends implement it:
//!
//! - [`memory::MemoryStore`]: one mutex over every table; used by tests and
//!   `taskmarket serve --in-memory`.
//! - [`crate::db::Database`]: PostgreSQL via `sqlx`, row locks with
//!   `SELECT … FOR UPDATE`.

pub mod memory;

use crate::claims::ClaimOutcome;
use crate::error::Result;
use crate::model::{Account, AccountStatus, Claim, Task, TaskStatus, Transaction};
use crate::payout::{CreditOutcome, CreditRequest};
use crate::quiz::{QuizAttempt, QuizIssue};
use crate::sweeper::SweepReport;
use crate::verifier::Approval;
use crate::withdrawals::{Settlement, WithdrawalRequest};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Counts refreshed into gauges by the background loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MarketCounts {
    pub active_tasks: i64,
    pub pending_withdrawals: i64,
}

#[async_trait]
pub trait MarketStore: Send + Sync {
    async fn health_check(&self) -> Result<()>;

    // ── Task catalog ────────────────────────────────────────────

    async fn insert_task(&self, task: &Task) -> Result<()>;

    async fn get_task(&self, id: Uuid) -> Result<Task>;

    /// Newest first.
    async fn list_tasks(&self, status: Option<TaskStatus>, limit: i64) -> Result<Vec<Task>>;

    async fn set_task_status(&self, id: Uuid, status: TaskStatus, now: DateTime<Utc>)
        -> Result<Task>;

    // ── Claims ──────────────────────────────────────────────────

    /// Admission plus slot reservation (see [`crate::claims::admit`]).
    async fn admit_claim(
        &self,
        user_id: Uuid,
        task_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(Claim, ClaimOutcome)>;

    async fn get_claim(&self, id: Uuid) -> Result<Claim>;

    async fn find_claim(&self, user_id: Uuid, task_id: Uuid) -> Result<Option<Claim>>;

    /// Newest first.
    async fn list_user_claims(&self, user_id: Uuid) -> Result<Vec<Claim>>;

    /// Record proof on the user's claim for a task. The flag is false when
    /// the claim was already submitted.
    async fn record_proof(
        &self,
        user_id: Uuid,
        task_id: Uuid,
        proof: &str,
        max_len: usize,
        now: DateTime<Utc>,
    ) -> Result<(Claim, bool)>;

    /// Complete a submitted claim, consume its slot and credit the payout.
    async fn approve_claim(&self, claim_id: Uuid, now: DateTime<Utc>) -> Result<Approval>;

    /// Administrative delete. Releases the reservation of an active claim.
    async fn purge_claim(&self, claim_id: Uuid, now: DateTime<Utc>) -> Result<Claim>;

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<SweepReport>;

    // ── Ledger ──────────────────────────────────────────────────

    /// Create the account on first use; returns the existing row otherwise.
    async fn ensure_account(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Account>;

    async fn get_account(&self, user_id: Uuid) -> Result<Account>;

    async fn set_account_status(
        &self,
        user_id: Uuid,
        status: AccountStatus,
        now: DateTime<Utc>,
    ) -> Result<Account>;

    async fn credit(&self, req: &CreditRequest, now: DateTime<Utc>) -> Result<CreditOutcome>;

    async fn open_withdrawal(&self, req: &WithdrawalRequest, now: DateTime<Utc>)
        -> Result<Transaction>;

    async fn settle_withdrawal(
        &self,
        tx_id: Uuid,
        settlement: &Settlement,
        now: DateTime<Utc>,
    ) -> Result<Transaction>;

    async fn get_transaction(&self, id: Uuid) -> Result<Transaction>;

    /// Newest first.
    async fn list_transactions(&self, user_id: Uuid, limit: i64) -> Result<Vec<Transaction>>;

    /// Oldest first, so settlement works through the queue in order.
    async fn list_pending_withdrawals(&self, limit: i64) -> Result<Vec<Transaction>>;

    async fn market_counts(&self) -> Result<MarketCounts>;

    // ── Quiz ────────────────────────────────────────────────────

    /// Remember an attempt id handed out with a question.
    async fn issue_quiz_attempt(&self, issue: &QuizIssue) -> Result<()>;

    async fn find_quiz_issue(&self, user_id: Uuid, attempt_id: Uuid) -> Result<Option<QuizIssue>>;

    /// Record a first answer for `(user, attempt_id)` together with its
    /// credit. A replay returns the stored attempt and `false`.
    async fn record_quiz_answer(
        &self,
        attempt: &QuizAttempt,
        credit: Option<&CreditRequest>,
        now: DateTime<Utc>,
    ) -> Result<(QuizAttempt, bool)>;
}
