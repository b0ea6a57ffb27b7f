//! # Claim Manager
//!
//! Admits or rejects a user's attempt to start a task. Admission and slot
//! reservation happen in one store transaction with the task row locked, so
//! two users racing for the last slot cannot both win. A second claim by the
//! same user returns their existing active claim instead of a duplicate.

use crate::error::{MarketError, Result};
use crate::model::{Account, Claim, Task};
use crate::store::MarketStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimOutcome {
    /// A new reservation was taken (fresh row or reopened abandoned row).
    Created,
    /// The user already holds an active claim; it is returned unchanged.
    Resumed,
}

impl ClaimOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ClaimOutcome::Created => "created",
            ClaimOutcome::Resumed => "resumed",
        }
    }
}

/// What the store must persist after [`admit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Insert(Claim),
    Reopen(Claim),
    Resume(Claim),
}

impl Admission {
    pub fn outcome(&self) -> ClaimOutcome {
        match self {
            Admission::Insert(_) | Admission::Reopen(_) => ClaimOutcome::Created,
            Admission::Resume(_) => ClaimOutcome::Resumed,
        }
    }

    pub fn claim(&self) -> &Claim {
        match self {
            Admission::Insert(c) | Admission::Reopen(c) | Admission::Resume(c) => c,
        }
    }

    pub fn into_claim(self) -> Claim {
        match self {
            Admission::Insert(c) | Admission::Reopen(c) | Admission::Resume(c) => c,
        }
    }

    /// True when the task row was changed and must be written back.
    pub fn reserves_slot(&self) -> bool {
        !matches!(self, Admission::Resume(_))
    }
}

/// Admission rule. `task` must be the locked row; on success it carries the
/// new reservation.
pub fn admit(
    task: &mut Task,
    account: &Account,
    existing: Option<Claim>,
    now: DateTime<Utc>,
) -> Result<Admission> {
    account.ensure_active()?;
    match existing {
        Some(claim) if claim.is_active() => Ok(Admission::Resume(claim)),
        Some(claim) if claim.state.completed_at().is_some() => {
            Err(MarketError::AlreadyCompleted(claim.id))
        }
        Some(mut claim) => {
            task.reserve_slot(now)?;
            claim.reopen(task, now)?;
            Ok(Admission::Reopen(claim))
        }
        None => {
            task.reserve_slot(now)?;
            Ok(Admission::Insert(Claim::new(account.user_id, task, now)))
        }
    }
}

/// Administrative purge rule: an active claim gives its reservation back.
/// Completed claims stay, since their row is what keeps the (user, task)
/// pair from being claimed and paid a second time.
pub fn purge(task: &mut Task, claim: &Claim, now: DateTime<Utc>) -> Result<()> {
    if claim.state.completed_at().is_some() {
        return Err(MarketError::AlreadyCompleted(claim.id));
    }
    if claim.is_active() && claim.task_id == task.id {
        task.release_slot(now);
    }
    Ok(())
}

/// `Claim(user, task)`.
pub async fn claim(
    store: &dyn MarketStore,
    user_id: Uuid,
    task_id: Uuid,
) -> Result<(Claim, ClaimOutcome)> {
    store.admit_claim(user_id, task_id, Utc::now()).await
}
