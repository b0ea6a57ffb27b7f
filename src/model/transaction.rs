//! Append-only ledger entries.
//!
//! Only the `status`/`settled_at`/`failure_reason` of a pending withdrawal
//! request ever change after insert.

use super::Money;
use crate::error::{MarketError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    Earning,
    WithdrawalRequest,
    Adjustment,
}

impl TxKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TxKind::Earning => "earning",
            TxKind::WithdrawalRequest => "withdrawal_request",
            TxKind::Adjustment => "adjustment",
        }
    }
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxKind {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "earning" => Ok(TxKind::Earning),
            "withdrawal_request" => Ok(TxKind::WithdrawalRequest),
            "adjustment" => Ok(TxKind::Adjustment),
            _ => Err(MarketError::InvalidInput(format!(
                "unknown transaction kind {:?}",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Completed,
    Failed,
}

impl TxStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Completed => "completed",
            TxStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxStatus {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TxStatus::Pending),
            "completed" => Ok(TxStatus::Completed),
            "failed" => Ok(TxStatus::Failed),
            _ => Err(MarketError::InvalidInput(format!(
                "unknown transaction status {:?}",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Signed: credits are positive, withdrawal requests negative.
    pub amount: Money,
    pub kind: TxKind,
    pub status: TxStatus,
    pub description: String,
    pub claim_id: Option<Uuid>,
    /// Idempotency key. At most one transaction exists per reference.
    pub reference: Option<String>,
    pub destination: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Transaction {
    pub fn is_pending_withdrawal(&self) -> bool {
        self.kind == TxKind::WithdrawalRequest && self.status == TxStatus::Pending
    }

    /// Move a pending withdrawal request to `completed` or `failed`.
    pub fn settle(
        &mut self,
        to: TxStatus,
        failure_reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.kind != TxKind::WithdrawalRequest {
            return Err(MarketError::InvalidInput(format!(
                "transaction {} is a {}, not a withdrawal request",
                self.id, self.kind
            )));
        }
        if self.status != TxStatus::Pending {
            return Err(MarketError::TransactionNotPending {
                id: self.id,
                status: self.status,
            });
        }
        if to == TxStatus::Pending {
            return Err(MarketError::InvalidInput(
                "settlement must be completed or failed".into(),
            ));
        }
        self.status = to;
        self.failure_reason = failure_reason;
        self.settled_at = Some(now);
        Ok(())
    }
}
