//! Task catalog: insert, read, list and operator status changes.
//!
//! Slot counters are only written by the claim operations in
//! [`super::claims`], always with the task row locked.

use super::{convert_all, lock_task, save_task_counters, Database, TaskRow, TASK_COLUMNS};
use crate::error::{MarketError, Result};
use crate::model::{Task, TaskStatus};
use chrono::{DateTime, Utc};
use uuid::Uuid;

impl Database {
    pub(super) async fn create_task_row(&self, task: &Task) -> Result<()> {
        sqlx::query(
            "INSERT INTO tasks (id, title, description, kind, payout_cents, total_slots,
                                completed_slots, reserved_slots, status, expires_at,
                                content_url, affiliate_link, client_name, created_by,
                                created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(task.id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.kind.as_str())
        .bind(task.payout)
        .bind(task.total_slots)
        .bind(task.completed_slots)
        .bind(task.reserved_slots)
        .bind(task.status.as_str())
        .bind(task.expires_at)
        .bind(&task.content_url)
        .bind(&task.affiliate_link)
        .bind(&task.client_name)
        .bind(&task.created_by)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub(super) async fn fetch_task(&self, id: Uuid) -> Result<Task> {
        let sql = format!("SELECT {} FROM tasks WHERE id = $1", TASK_COLUMNS);
        let row = sqlx::query_as::<_, TaskRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(MarketError::TaskNotFound(id))?;
        row.try_into()
    }

    /// Tasks with an optional status filter, newest first.
    pub(super) async fn fetch_tasks(
        &self,
        status: Option<TaskStatus>,
        limit: i64,
    ) -> Result<Vec<Task>> {
        let rows = if let Some(status) = status {
            let sql = format!(
                "SELECT {} FROM tasks WHERE status = $1 ORDER BY created_at DESC, id DESC LIMIT $2",
                TASK_COLUMNS
            );
            sqlx::query_as::<_, TaskRow>(&sql)
                .bind(status.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
        } else {
            let sql = format!(
                "SELECT {} FROM tasks ORDER BY created_at DESC, id DESC LIMIT $1",
                TASK_COLUMNS
            );
            sqlx::query_as::<_, TaskRow>(&sql)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
        };
        convert_all(rows)
    }

    pub(super) async fn update_task_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        now: DateTime<Utc>,
    ) -> Result<Task> {
        let mut tx = self.pool.begin().await?;
        let mut task = lock_task(&mut tx, id).await?;
        task.set_status(status, now)?;
        save_task_counters(&mut tx, &task).await?;
        tx.commit().await?;
        Ok(task)
    }
}
