//! Tasks: capacity-limited units of paid work.
//!
//! Capacity is reserved when a claim is admitted and consumed when the claim
//! completes, so `completed_slots + reserved_slots <= total_slots` always holds.
//! `completed_slots` is never decremented.

use super::Money;
use crate::error::{MarketError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Survey,
    Video,
    AppTest,
    Review,
    Other,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Survey => "survey",
            TaskKind::Video => "video",
            TaskKind::AppTest => "app_test",
            TaskKind::Review => "review",
            TaskKind::Other => "other",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "survey" => Ok(TaskKind::Survey),
            "video" => Ok(TaskKind::Video),
            "app_test" | "app-test" | "apptest" => Ok(TaskKind::AppTest),
            "review" => Ok(TaskKind::Review),
            "other" => Ok(TaskKind::Other),
            _ => Err(MarketError::InvalidInput(format!("unknown task kind {:?}", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Active,
    Paused,
    Closed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Active => "active",
            TaskStatus::Paused => "paused",
            TaskStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(TaskStatus::Active),
            "paused" => Ok(TaskStatus::Paused),
            "closed" => Ok(TaskStatus::Closed),
            _ => Err(MarketError::InvalidInput(format!("unknown task status {:?}", s))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub kind: TaskKind,
    pub payout: Money,
    pub total_slots: i32,
    pub completed_slots: i32,
    pub reserved_slots: i32,
    pub status: TaskStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub content_url: Option<String>,
    pub affiliate_link: Option<String>,
    pub client_name: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Operator input for a new task.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub kind: TaskKind,
    pub payout: Money,
    pub total_slots: i32,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub content_url: Option<String>,
    #[serde(default)]
    pub affiliate_link: Option<String>,
    #[serde(default)]
    pub client_name: Option<String>,
}

impl NewTask {
    /// Validate and build the task row. `created_by` is the operator's identity.
    pub fn into_task(self, created_by: Option<String>, now: DateTime<Utc>) -> Result<Task> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(MarketError::InvalidInput("title must not be empty".into()));
        }
        if !self.payout.is_positive() {
            return Err(MarketError::InvalidAmount(format!(
                "payout must be positive, got {}",
                self.payout
            )));
        }
        if self.total_slots <= 0 {
            return Err(MarketError::InvalidInput(format!(
                "total_slots must be positive, got {}",
                self.total_slots
            )));
        }
        if let Some(expiry) = self.expires_at {
            if expiry <= now {
                return Err(MarketError::InvalidInput(
                    "expires_at must be in the future".into(),
                ));
            }
        }
        Ok(Task {
            id: Uuid::new_v4(),
            title,
            description: self.description,
            kind: self.kind,
            payout: self.payout,
            total_slots: self.total_slots,
            completed_slots: 0,
            reserved_slots: 0,
            status: TaskStatus::Active,
            expires_at: self.expires_at,
            content_url: self.content_url,
            affiliate_link: self.affiliate_link,
            client_name: self.client_name,
            created_by,
            created_at: now,
            updated_at: now,
        })
    }
}

impl Task {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn remaining_slots(&self) -> i32 {
        (self.total_slots - self.completed_slots - self.reserved_slots).max(0)
    }

    /// Check every admission precondition except per-user uniqueness.
    pub fn check_claimable(&self, now: DateTime<Utc>) -> Result<()> {
        let unavailable = |reason: &str| MarketError::TaskUnavailable {
            task_id: self.id,
            reason: reason.to_string(),
        };
        match self.status {
            TaskStatus::Active => {}
            TaskStatus::Paused => return Err(unavailable("task is paused")),
            TaskStatus::Closed => return Err(unavailable("task is closed")),
        }
        if self.is_expired(now) {
            return Err(unavailable("task has expired"));
        }
        if self.remaining_slots() == 0 {
            return Err(MarketError::TaskFull(self.id));
        }
        Ok(())
    }

    /// Reserve one slot for a newly admitted claim.
    pub fn reserve_slot(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.check_claimable(now)?;
        self.reserved_slots += 1;
        self.updated_at = now;
        Ok(())
    }

    /// Return a reservation to capacity (abandonment or purge of an active claim).
    pub fn release_slot(&mut self, now: DateTime<Utc>) {
        self.reserved_slots = (self.reserved_slots - 1).max(0);
        self.updated_at = now;
    }

    /// Turn one reservation into a completed slot, closing the task when it fills.
    pub fn consume_reserved_slot(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.completed_slots >= self.total_slots {
            return Err(MarketError::TaskFull(self.id));
        }
        self.reserved_slots = (self.reserved_slots - 1).max(0);
        self.completed_slots += 1;
        if self.completed_slots == self.total_slots {
            self.status = TaskStatus::Closed;
        }
        self.updated_at = now;
        Ok(())
    }

    /// Operator status change. Closed tasks are immutable.
    pub fn set_status(&mut self, to: TaskStatus, now: DateTime<Utc>) -> Result<()> {
        if self.status == TaskStatus::Closed && to != TaskStatus::Closed {
            return Err(MarketError::TaskUnavailable {
                task_id: self.id,
                reason: "closed tasks cannot be reopened".into(),
            });
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    /// Close the task if its expiry has passed. Returns true when it changed.
    pub fn close_if_expired(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != TaskStatus::Closed && self.is_expired(now) {
            self.status = TaskStatus::Closed;
            self.updated_at = now;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;

    pub(crate) fn sample_task(total_slots: i32, payout_cents: i64) -> Task {
        NewTask {
            title: "Product feedback survey".into(),
            description: Some("Five quick questions".into()),
            kind: TaskKind::Survey,
            payout: Money::from_cents(payout_cents),
            total_slots,
            expires_at: None,
            content_url: None,
            affiliate_link: None,
            client_name: Some("Acme".into()),
        }
        .into_task(Some("operator".into()), Utc::now())
        .unwrap()
    }

    #[test]
    fn new_task_validation() {
        let now = Utc::now();
        let base = NewTask {
            title: "  ".into(),
            description: None,
            kind: TaskKind::Video,
            payout: Money::from_cents(25),
            total_slots: 3,
            expires_at: None,
            content_url: None,
            affiliate_link: None,
            client_name: None,
        };
        assert!(matches!(
            base.clone().into_task(None, now),
            Err(MarketError::InvalidInput(_))
        ));

        let zero_payout = NewTask {
            title: "Watch".into(),
            payout: Money::ZERO,
            ..base.clone()
        };
        assert!(matches!(
            zero_payout.into_task(None, now),
            Err(MarketError::InvalidAmount(_))
        ));

        let no_slots = NewTask {
            title: "Watch".into(),
            total_slots: 0,
            ..base.clone()
        };
        assert!(no_slots.into_task(None, now).is_err());

        let past = NewTask {
            title: "Watch".into(),
            expires_at: Some(now - Duration::hours(1)),
            ..base
        };
        assert!(past.into_task(None, now).is_err());
    }

    #[test]
    fn reservation_counts_against_capacity() {
        let now = Utc::now();
        let mut task = sample_task(2, 100);
        task.reserve_slot(now).unwrap();
        task.reserve_slot(now).unwrap();
        assert_eq!(task.remaining_slots(), 0);
        assert!(matches!(task.reserve_slot(now), Err(MarketError::TaskFull(_))));

        task.release_slot(now);
        assert_eq!(task.remaining_slots(), 1);
    }

    #[test]
    fn consuming_last_slot_closes_task() {
        let now = Utc::now();
        let mut task = sample_task(1, 500);
        task.reserve_slot(now).unwrap();
        task.consume_reserved_slot(now).unwrap();
        assert_eq!(task.completed_slots, 1);
        assert_eq!(task.reserved_slots, 0);
        assert_eq!(task.status, TaskStatus::Closed);
        assert!(task.consume_reserved_slot(now).is_err());
        assert_eq!(task.completed_slots, 1);
    }

    #[test]
    fn paused_closed_and_expired_tasks_are_unavailable() {
        let now = Utc::now();
        let mut task = sample_task(5, 100);
        task.set_status(TaskStatus::Paused, now).unwrap();
        assert!(matches!(
            task.check_claimable(now),
            Err(MarketError::TaskUnavailable { .. })
        ));

        task.set_status(TaskStatus::Active, now).unwrap();
        task.expires_at = Some(now - Duration::seconds(1));
        assert!(matches!(
            task.check_claimable(now),
            Err(MarketError::TaskUnavailable { .. })
        ));
        assert!(task.close_if_expired(now));
        assert!(!task.close_if_expired(now));
        assert!(task.set_status(TaskStatus::Active, now).is_err());
    }

    #[test]
    fn task_kind_parses_hyphenated_form() {
        assert_eq!("app-test".parse::<TaskKind>().unwrap(), TaskKind::AppTest);
        assert_eq!("Survey".parse::<TaskKind>().unwrap(), TaskKind::Survey);
        assert!("poll".parse::<TaskKind>().is_err());
    }
}
