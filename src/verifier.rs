//! # Completion Verifier
//!
//! Records proof of completion and approves submitted claims. Approval
//! completes the claim, moves one slot from reserved to completed and credits
//! the payout, all in one store transaction. The payout reference is derived
//! from the claim id, so an approval can never pay twice.
//!
//! Under [`ApprovalPolicy::Auto`] approval runs right after a successful
//! submission; under `Manual` the claim waits in `submitted` for an operator.

use crate::error::{MarketError, Result};
use crate::model::{Claim, ClaimStatus, Task, Transaction};
use crate::payout::CreditRequest;
use crate::store::MarketStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalPolicy {
    #[default]
    Auto,
    Manual,
}

impl fmt::Display for ApprovalPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ApprovalPolicy::Auto => "auto",
            ApprovalPolicy::Manual => "manual",
        })
    }
}

impl FromStr for ApprovalPolicy {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto" => Ok(ApprovalPolicy::Auto),
            "manual" => Ok(ApprovalPolicy::Manual),
            _ => Err(MarketError::InvalidInput(format!(
                "unknown approval policy {:?}",
                s
            ))),
        }
    }
}

/// Result of a completed approval.
#[derive(Debug, Clone, Serialize)]
pub struct Approval {
    pub claim: Claim,
    pub task: Task,
    pub transaction: Transaction,
}

/// Result of `SubmitProof`.
#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub claim: Claim,
    /// Present when the submission was approved in the same call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payout: Option<Transaction>,
    /// False when proof had already been recorded for this claim.
    pub newly_submitted: bool,
}

/// Proof acceptance rule. A `claimed` claim whose task has expired counts as
/// abandoned and can no longer be submitted.
pub fn accept_proof(
    claim: &mut Claim,
    task: &Task,
    proof: &str,
    max_len: usize,
    now: DateTime<Utc>,
) -> Result<bool> {
    if claim.status() == ClaimStatus::Claimed && task.is_expired(now) {
        return Err(MarketError::TaskUnavailable {
            task_id: task.id,
            reason: "task expired before proof was submitted".into(),
        });
    }
    claim.submit(proof, max_len, now)
}

/// Approval rule: `submitted → completed` plus slot consumption. Returns the
/// credit the store must apply in the same transaction.
pub fn finalize(claim: &mut Claim, task: &mut Task, now: DateTime<Utc>) -> Result<CreditRequest> {
    if claim.task_id != task.id {
        return Err(MarketError::InvalidInput(format!(
            "claim {} does not belong to task {}",
            claim.id, task.id
        )));
    }
    claim.complete(now)?;
    task.consume_reserved_slot(now)?;
    Ok(CreditRequest::for_claim(claim, &task.title))
}

/// `SubmitProof(user, task, proof)`.
pub async fn submit_proof(
    store: &dyn MarketStore,
    policy: ApprovalPolicy,
    max_proof_len: usize,
    user_id: Uuid,
    task_id: Uuid,
    proof: &str,
) -> Result<Submission> {
    let (claim, newly_submitted) = store
        .record_proof(user_id, task_id, proof, max_proof_len, Utc::now())
        .await?;
    if policy == ApprovalPolicy::Manual {
        return Ok(Submission {
            claim,
            payout: None,
            newly_submitted,
        });
    }
    // A resubmission retries an approval that did not commit the first time.
    let approval = store.approve_claim(claim.id, Utc::now()).await?;
    Ok(Submission {
        claim: approval.claim,
        payout: Some(approval.transaction),
        newly_submitted,
    })
}

/// `Approve(claim)`.
pub async fn approve(store: &dyn MarketStore, claim_id: Uuid) -> Result<Approval> {
    store.approve_claim(claim_id, Utc::now()).await
}
