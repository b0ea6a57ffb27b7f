//! Quiz attempts. Issued attempt ids are stored when a question is handed
//! out; the answer row and its earning commit together.

use super::{insert_transaction, lock_account, save_account, Database};
use crate::error::{MarketError, Result};
use crate::model::Money;
use crate::payout::CreditRequest;
use crate::quiz::{self, QuizAttempt, QuizIssue};
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(sqlx::FromRow)]
struct QuizIssueRow {
    user_id: Uuid,
    attempt_id: Uuid,
    question_id: String,
    issued_at: DateTime<Utc>,
}

impl From<QuizIssueRow> for QuizIssue {
    fn from(row: QuizIssueRow) -> Self {
        QuizIssue {
            user_id: row.user_id,
            attempt_id: row.attempt_id,
            question_id: row.question_id,
            issued_at: row.issued_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct QuizAttemptRow {
    user_id: Uuid,
    attempt_id: Uuid,
    question_id: String,
    choice: i32,
    correct: bool,
    reward_cents: Money,
    transaction_id: Option<Uuid>,
    answered_at: DateTime<Utc>,
}

impl From<QuizAttemptRow> for QuizAttempt {
    fn from(row: QuizAttemptRow) -> Self {
        QuizAttempt {
            user_id: row.user_id,
            attempt_id: row.attempt_id,
            question_id: row.question_id,
            choice: row.choice,
            correct: row.correct,
            reward: row.reward_cents,
            transaction_id: row.transaction_id,
            answered_at: row.answered_at,
        }
    }
}

impl Database {
    pub(super) async fn insert_quiz_issue(&self, issue: &QuizIssue) -> Result<()> {
        sqlx::query(
            "INSERT INTO quiz_issues (user_id, attempt_id, question_id, issued_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (user_id, attempt_id) DO NOTHING",
        )
        .bind(issue.user_id)
        .bind(issue.attempt_id)
        .bind(&issue.question_id)
        .bind(issue.issued_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub(super) async fn fetch_quiz_issue(
        &self,
        user_id: Uuid,
        attempt_id: Uuid,
    ) -> Result<Option<QuizIssue>> {
        let row = sqlx::query_as::<_, QuizIssueRow>(
            "SELECT user_id, attempt_id, question_id, issued_at
             FROM quiz_issues WHERE user_id = $1 AND attempt_id = $2",
        )
        .bind(user_id)
        .bind(attempt_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    /// Returns the stored attempt and whether this call created it.
    ///
    /// The account lock serializes replays of the same attempt id, so the
    /// second caller always sees the first caller's row.
    pub(super) async fn insert_quiz_attempt(
        &self,
        attempt: &QuizAttempt,
        credit: Option<&CreditRequest>,
        now: DateTime<Utc>,
    ) -> Result<(QuizAttempt, bool)> {
        let mut tx = self.pool.begin().await?;
        let mut account = lock_account(&mut tx, attempt.user_id).await?;

        let existing = sqlx::query_as::<_, QuizAttemptRow>(
            "SELECT user_id, attempt_id, question_id, choice, correct, reward_cents,
                    transaction_id, answered_at
             FROM quiz_attempts WHERE user_id = $1 AND attempt_id = $2",
        )
        .bind(attempt.user_id)
        .bind(attempt.attempt_id)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(row) = existing {
            return Ok((row.into(), false));
        }

        let (recorded, earning) = quiz::record(&mut account, attempt.clone(), credit, now)?;
        if let Some(earning) = &earning {
            insert_transaction(&mut tx, earning)
                .await
                .map_err(|e| MarketError::LedgerWriteFailed(e.to_string()))?;
            save_account(&mut tx, &account).await?;
        }
        sqlx::query(
            "INSERT INTO quiz_attempts (user_id, attempt_id, question_id, choice, correct,
                                        reward_cents, transaction_id, answered_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(recorded.user_id)
        .bind(recorded.attempt_id)
        .bind(&recorded.question_id)
        .bind(recorded.choice)
        .bind(recorded.correct)
        .bind(recorded.reward)
        .bind(recorded.transaction_id)
        .bind(recorded.answered_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok((recorded, true))
    }
}
