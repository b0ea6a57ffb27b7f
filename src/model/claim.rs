//! Claims: one user's attempt at one task.
//!
//! The lifecycle is an explicit tagged state. Transition methods reject
//! illegal source states instead of overwriting a status string:
//!
//! ```text
//! Claimed ──submit──▶ Submitted ──complete──▶ Completed
//!    │
//!    └──abandon──▶ Abandoned ──reopen──▶ Claimed
//! ```
//!
//! `Completed` is terminal and immutable.

use super::{Money, Task};
use crate::error::{MarketError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Claimed,
    Submitted,
    Completed,
    Abandoned,
}

impl ClaimStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ClaimStatus::Claimed => "claimed",
            ClaimStatus::Submitted => "submitted",
            ClaimStatus::Completed => "completed",
            ClaimStatus::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClaimStatus {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "claimed" => Ok(ClaimStatus::Claimed),
            "submitted" => Ok(ClaimStatus::Submitted),
            "completed" => Ok(ClaimStatus::Completed),
            "abandoned" => Ok(ClaimStatus::Abandoned),
            _ => Err(MarketError::InvalidInput(format!("unknown claim status {:?}", s))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ClaimState {
    Claimed,
    Submitted {
        proof: String,
        submitted_at: DateTime<Utc>,
    },
    Completed {
        proof: String,
        submitted_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },
    Abandoned {
        abandoned_at: DateTime<Utc>,
    },
}

impl ClaimState {
    pub fn status(&self) -> ClaimStatus {
        match self {
            ClaimState::Claimed => ClaimStatus::Claimed,
            ClaimState::Submitted { .. } => ClaimStatus::Submitted,
            ClaimState::Completed { .. } => ClaimStatus::Completed,
            ClaimState::Abandoned { .. } => ClaimStatus::Abandoned,
        }
    }

    /// Rebuild the state from its flat storage columns.
    pub fn from_columns(
        status: &str,
        proof: Option<String>,
        submitted_at: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
        abandoned_at: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        let missing = |col: &str| {
            MarketError::Storage(format!("claim row in state {} is missing {}", status, col))
        };
        Ok(match status.parse::<ClaimStatus>()? {
            ClaimStatus::Claimed => ClaimState::Claimed,
            ClaimStatus::Submitted => ClaimState::Submitted {
                proof: proof.ok_or_else(|| missing("proof"))?,
                submitted_at: submitted_at.ok_or_else(|| missing("submitted_at"))?,
            },
            ClaimStatus::Completed => ClaimState::Completed {
                proof: proof.ok_or_else(|| missing("proof"))?,
                submitted_at: submitted_at.ok_or_else(|| missing("submitted_at"))?,
                completed_at: completed_at.ok_or_else(|| missing("completed_at"))?,
            },
            ClaimStatus::Abandoned => ClaimState::Abandoned {
                abandoned_at: abandoned_at.ok_or_else(|| missing("abandoned_at"))?,
            },
        })
    }

    pub fn proof(&self) -> Option<&str> {
        match self {
            ClaimState::Submitted { proof, .. } | ClaimState::Completed { proof, .. } => {
                Some(proof)
            }
            _ => None,
        }
    }

    pub fn submitted_at(&self) -> Option<DateTime<Utc>> {
        match self {
            ClaimState::Submitted { submitted_at, .. }
            | ClaimState::Completed { submitted_at, .. } => Some(*submitted_at),
            _ => None,
        }
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        match self {
            ClaimState::Completed { completed_at, .. } => Some(*completed_at),
            _ => None,
        }
    }

    pub fn abandoned_at(&self) -> Option<DateTime<Utc>> {
        match self {
            ClaimState::Abandoned { abandoned_at } => Some(*abandoned_at),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub id: Uuid,
    pub user_id: Uuid,
    pub task_id: Uuid,
    /// Task payout at the time the claim was admitted.
    pub payout: Money,
    pub claimed_at: DateTime<Utc>,
    #[serde(flatten)]
    pub state: ClaimState,
}

impl Claim {
    pub fn new(user_id: Uuid, task: &Task, now: DateTime<Utc>) -> Self {
        Claim {
            id: Uuid::new_v4(),
            user_id,
            task_id: task.id,
            payout: task.payout,
            claimed_at: now,
            state: ClaimState::Claimed,
        }
    }

    pub fn status(&self) -> ClaimStatus {
        self.state.status()
    }

    /// Claimed or submitted: the claim holds a slot reservation.
    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            ClaimState::Claimed | ClaimState::Submitted { .. }
        )
    }

    fn invalid(&self, action: &'static str) -> MarketError {
        MarketError::InvalidState {
            from: self.status(),
            action,
        }
    }

    /// Record proof of completion.
    ///
    /// Returns `Ok(true)` on the `claimed → submitted` transition and
    /// `Ok(false)` when the claim was already submitted (the stored proof is
    /// kept).
    pub fn submit(&mut self, proof: &str, max_len: usize, now: DateTime<Utc>) -> Result<bool> {
        match &self.state {
            ClaimState::Claimed => {}
            ClaimState::Submitted { .. } => return Ok(false),
            ClaimState::Completed { .. } => return Err(MarketError::AlreadyCompleted(self.id)),
            ClaimState::Abandoned { .. } => return Err(self.invalid("submit proof")),
        }
        let proof = proof.trim();
        if proof.is_empty() {
            return Err(MarketError::EmptyProof);
        }
        if proof.chars().count() > max_len {
            return Err(MarketError::InvalidInput(format!(
                "proof exceeds {} characters",
                max_len
            )));
        }
        self.state = ClaimState::Submitted {
            proof: proof.to_string(),
            submitted_at: now,
        };
        Ok(true)
    }

    /// `submitted → completed`.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<()> {
        match &self.state {
            ClaimState::Submitted {
                proof,
                submitted_at,
            } => {
                self.state = ClaimState::Completed {
                    proof: proof.clone(),
                    submitted_at: *submitted_at,
                    completed_at: now,
                };
                Ok(())
            }
            ClaimState::Completed { .. } => Err(MarketError::AlreadyCompleted(self.id)),
            _ => Err(self.invalid("approve")),
        }
    }

    /// `claimed → abandoned`. Submitted work is never abandoned.
    pub fn abandon(&mut self, now: DateTime<Utc>) -> Result<()> {
        match self.state {
            ClaimState::Claimed => {
                self.state = ClaimState::Abandoned { abandoned_at: now };
                Ok(())
            }
            _ => Err(self.invalid("abandon")),
        }
    }

    /// Reuse an abandoned row for a fresh attempt at the same task.
    pub fn reopen(&mut self, task: &Task, now: DateTime<Utc>) -> Result<()> {
        match self.state {
            ClaimState::Abandoned { .. } => {
                self.payout = task.payout;
                self.claimed_at = now;
                self.state = ClaimState::Claimed;
                Ok(())
            }
            _ => Err(self.invalid("reopen")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::task::tests::sample_task;

    fn fresh_claim() -> Claim {
        Claim::new(Uuid::new_v4(), &sample_task(3, 500), Utc::now())
    }

    #[test]
    fn happy_path_reaches_completed() {
        let now = Utc::now();
        let mut claim = fresh_claim();
        assert!(claim.is_active());
        assert!(claim.submit("  screenshot attached ", 1000, now).unwrap());
        assert_eq!(claim.state.proof(), Some("screenshot attached"));
        claim.complete(now).unwrap();
        assert_eq!(claim.status(), ClaimStatus::Completed);
        assert!(!claim.is_active());
        assert_eq!(claim.state.completed_at(), Some(now));
    }

    #[test]
    fn empty_or_oversized_proof_is_rejected() {
        let now = Utc::now();
        let mut claim = fresh_claim();
        assert!(matches!(
            claim.submit("   ", 1000, now),
            Err(MarketError::EmptyProof)
        ));
        assert!(matches!(
            claim.submit("abcdef", 5, now),
            Err(MarketError::InvalidInput(_))
        ));
        assert_eq!(claim.status(), ClaimStatus::Claimed);
    }

    #[test]
    fn resubmission_keeps_first_proof() {
        let now = Utc::now();
        let mut claim = fresh_claim();
        claim.submit("first", 100, now).unwrap();
        assert!(!claim.submit("second", 100, now).unwrap());
        assert_eq!(claim.state.proof(), Some("first"));
    }

    #[test]
    fn completed_claim_is_immutable() {
        let now = Utc::now();
        let mut claim = fresh_claim();
        claim.submit("done", 100, now).unwrap();
        claim.complete(now).unwrap();
        let before = claim.clone();

        assert!(matches!(
            claim.submit("again", 100, now),
            Err(MarketError::AlreadyCompleted(_))
        ));
        assert!(matches!(
            claim.complete(now),
            Err(MarketError::AlreadyCompleted(_))
        ));
        assert!(claim.abandon(now).is_err());
        assert_eq!(claim, before);
    }

    #[test]
    fn only_claimed_can_be_abandoned() {
        let now = Utc::now();
        let mut claim = fresh_claim();
        claim.submit("done", 100, now).unwrap();
        assert!(matches!(
            claim.abandon(now),
            Err(MarketError::InvalidState {
                from: ClaimStatus::Submitted,
                ..
            })
        ));

        let mut other = fresh_claim();
        other.abandon(now).unwrap();
        assert!(matches!(
            other.submit("late", 100, now),
            Err(MarketError::InvalidState { .. })
        ));
        assert!(other.complete(now).is_err());
    }

    #[test]
    fn abandoned_claim_reopens_in_place() {
        let now = Utc::now();
        let task = sample_task(3, 250);
        let mut claim = Claim::new(Uuid::new_v4(), &task, now);
        let id = claim.id;
        claim.abandon(now).unwrap();
        claim.reopen(&task, now).unwrap();
        assert_eq!(claim.id, id);
        assert_eq!(claim.status(), ClaimStatus::Claimed);
        assert!(claim.reopen(&task, now).is_err());
    }

    #[test]
    fn state_round_trips_through_columns() {
        let now = Utc::now();
        let mut claim = fresh_claim();
        claim.submit("proof", 100, now).unwrap();
        let s = &claim.state;
        let rebuilt = ClaimState::from_columns(
            s.status().as_str(),
            s.proof().map(str::to_string),
            s.submitted_at(),
            s.completed_at(),
            s.abandoned_at(),
        )
        .unwrap();
        assert_eq!(&rebuilt, s);

        assert!(ClaimState::from_columns("submitted", None, None, None, None).is_err());
        assert!(ClaimState::from_columns("lost", None, None, None, None).is_err());
    }

    #[test]
    fn json_flattens_status_tag() {
        let claim = fresh_claim();
        let v = serde_json::to_value(&claim).unwrap();
        assert_eq!(v["status"], "claimed");
        assert_eq!(v["payout"], "5.00");
    }
}
