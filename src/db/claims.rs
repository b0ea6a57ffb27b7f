//! Claim lifecycle: admission, proof, approval, purge and the expiry sweep.
//!
//! Each operation is one transaction. The task row is locked first, which
//! serializes every admission against the same task: two users racing for
//! the last slot queue on the lock and the second sees the first's
//! reservation. `UNIQUE (user_id, task_id)` backs the one-row-per-pair rule
//! if anything slips past.

use super::{
    find_by_reference, lock_account, lock_task, persist_credit, save_claim, save_task_counters,
    ClaimRow, Database, TaskRow, CLAIM_COLUMNS, TASK_COLUMNS,
};
use crate::claims::{self, ClaimOutcome};
use crate::error::{MarketError, Result};
use crate::model::{Account, Claim, Task};
use crate::payout;
use crate::sweeper::{self, SweepReport};
use crate::verifier::{self, Approval};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgConnection;
use uuid::Uuid;

async fn lock_claim(conn: &mut PgConnection, id: Uuid) -> Result<Claim> {
    let sql = format!("SELECT {} FROM claims WHERE id = $1 FOR UPDATE", CLAIM_COLUMNS);
    sqlx::query_as::<_, ClaimRow>(&sql)
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| MarketError::ClaimNotFound(id.to_string()))?
        .try_into()
}

async fn lock_user_task_claim(
    conn: &mut PgConnection,
    user_id: Uuid,
    task_id: Uuid,
) -> Result<Option<Claim>> {
    let sql = format!(
        "SELECT {} FROM claims WHERE user_id = $1 AND task_id = $2 FOR UPDATE",
        CLAIM_COLUMNS
    );
    sqlx::query_as::<_, ClaimRow>(&sql)
        .bind(user_id)
        .bind(task_id)
        .fetch_optional(conn)
        .await?
        .map(Claim::try_from)
        .transpose()
}

async fn read_account(conn: &mut PgConnection, user_id: Uuid) -> Result<Account> {
    let sql = format!("SELECT {} FROM accounts WHERE user_id = $1", super::ACCOUNT_COLUMNS);
    sqlx::query_as::<_, super::AccountRow>(&sql)
        .bind(user_id)
        .fetch_optional(conn)
        .await?
        .ok_or(MarketError::UserNotFound(user_id))?
        .try_into()
}

/// Unlocked lookup of a claim's task, so callers can lock task before claim.
async fn task_of_claim(conn: &mut PgConnection, claim_id: Uuid) -> Result<Uuid> {
    sqlx::query_scalar::<_, Uuid>("SELECT task_id FROM claims WHERE id = $1")
        .bind(claim_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| MarketError::ClaimNotFound(claim_id.to_string()))
}

impl Database {
    pub(super) async fn claim_slot(
        &self,
        user_id: Uuid,
        task_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(Claim, ClaimOutcome)> {
        let mut tx = self.pool.begin().await?;
        let mut task = lock_task(&mut tx, task_id).await?;
        let account = read_account(&mut tx, user_id).await?;
        let existing = lock_user_task_claim(&mut tx, user_id, task_id).await?;
        let admission = claims::admit(&mut task, &account, existing, now)?;
        let outcome = admission.outcome();
        if admission.reserves_slot() {
            save_task_counters(&mut tx, &task).await?;
            save_claim(&mut tx, admission.claim()).await?;
            tx.commit().await?;
        }
        Ok((admission.into_claim(), outcome))
    }

    pub(super) async fn fetch_claim(&self, id: Uuid) -> Result<Claim> {
        let sql = format!("SELECT {} FROM claims WHERE id = $1", CLAIM_COLUMNS);
        sqlx::query_as::<_, ClaimRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| MarketError::ClaimNotFound(id.to_string()))?
            .try_into()
    }

    pub(super) async fn fetch_user_task_claim(
        &self,
        user_id: Uuid,
        task_id: Uuid,
    ) -> Result<Option<Claim>> {
        let sql = format!(
            "SELECT {} FROM claims WHERE user_id = $1 AND task_id = $2",
            CLAIM_COLUMNS
        );
        sqlx::query_as::<_, ClaimRow>(&sql)
            .bind(user_id)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Claim::try_from)
            .transpose()
    }

    pub(super) async fn fetch_user_claims(&self, user_id: Uuid) -> Result<Vec<Claim>> {
        let sql = format!(
            "SELECT {} FROM claims WHERE user_id = $1 ORDER BY claimed_at DESC",
            CLAIM_COLUMNS
        );
        let rows = sqlx::query_as::<_, ClaimRow>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        super::convert_all(rows)
    }

    pub(super) async fn submit_claim_proof(
        &self,
        user_id: Uuid,
        task_id: Uuid,
        proof: &str,
        max_len: usize,
        now: DateTime<Utc>,
    ) -> Result<(Claim, bool)> {
        let mut tx = self.pool.begin().await?;
        let task = lock_task(&mut tx, task_id).await?;
        let mut claim = lock_user_task_claim(&mut tx, user_id, task_id)
            .await?
            .ok_or_else(|| {
                MarketError::ClaimNotFound(format!("user {} on task {}", user_id, task_id))
            })?;
        let changed = verifier::accept_proof(&mut claim, &task, proof, max_len, now)?;
        if changed {
            save_claim(&mut tx, &claim).await?;
            tx.commit().await?;
        }
        Ok((claim, changed))
    }

    /// Approval: claim completed, slot consumed and payout credited in one commit.
    pub(super) async fn complete_claim(&self, claim_id: Uuid, now: DateTime<Utc>) -> Result<Approval> {
        let mut tx = self.pool.begin().await?;
        let task_id = task_of_claim(&mut tx, claim_id).await?;
        let mut task = lock_task(&mut tx, task_id).await?;
        let mut claim = lock_claim(&mut tx, claim_id).await?;
        let mut account = lock_account(&mut tx, claim.user_id).await?;

        let credit = verifier::finalize(&mut claim, &mut task, now)?;
        let existing = find_by_reference(&mut tx, &credit.reference).await?;
        let outcome = payout::apply(&mut account, &credit, existing, now)?;

        save_claim(&mut tx, &claim).await?;
        save_task_counters(&mut tx, &task).await?;
        persist_credit(&mut tx, &account, &outcome)
            .await
            .map_err(|e| MarketError::LedgerWriteFailed(e.to_string()))?;
        tx.commit().await?;

        Ok(Approval {
            claim,
            task,
            transaction: outcome.into_transaction(),
        })
    }

    pub(super) async fn delete_claim(&self, claim_id: Uuid, now: DateTime<Utc>) -> Result<Claim> {
        let mut tx = self.pool.begin().await?;
        let task_id = task_of_claim(&mut tx, claim_id).await?;
        let mut task = lock_task(&mut tx, task_id).await?;
        let claim = lock_claim(&mut tx, claim_id).await?;
        claims::purge(&mut task, &claim, now)?;

        sqlx::query("DELETE FROM claims WHERE id = $1")
            .bind(claim.id)
            .execute(&mut *tx)
            .await?;
        save_task_counters(&mut tx, &task).await?;
        tx.commit().await?;
        Ok(claim)
    }

    /// Close expired tasks and abandon their idle claims. Tasks locked by a
    /// concurrent operation are skipped and picked up by the next sweep.
    pub(super) async fn expire_tasks(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut tx = self.pool.begin().await?;
        let sql = format!(
            "SELECT {} FROM tasks
             WHERE expires_at IS NOT NULL AND expires_at <= $1
               AND (status <> 'closed' OR reserved_slots > 0)
             ORDER BY expires_at
             FOR UPDATE SKIP LOCKED",
            TASK_COLUMNS
        );
        let rows = sqlx::query_as::<_, TaskRow>(&sql)
            .bind(now)
            .fetch_all(&mut *tx)
            .await?;
        let tasks: Vec<Task> = super::convert_all(rows)?;

        let mut report = SweepReport::default();
        let claim_sql = format!(
            "SELECT {} FROM claims WHERE task_id = $1 AND status = 'claimed' FOR UPDATE",
            CLAIM_COLUMNS
        );
        for mut task in tasks {
            let claim_rows = sqlx::query_as::<_, ClaimRow>(&claim_sql)
                .bind(task.id)
                .fetch_all(&mut *tx)
                .await?;
            let mut claims: Vec<Claim> = super::convert_all(claim_rows)?;
            let expired = sweeper::expire_task(&mut task, &mut claims, now);
            if expired.is_empty() {
                continue;
            }
            for claim in claims
                .iter()
                .filter(|c| expired.claims_abandoned.contains(&c.id))
            {
                save_claim(&mut tx, claim).await?;
            }
            save_task_counters(&mut tx, &task).await?;
            report.merge(expired);
        }
        tx.commit().await?;
        Ok(report)
    }
}
