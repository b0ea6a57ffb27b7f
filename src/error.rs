//! # Errors: Marketplace Failure Signals
//!
//! Every operation in the engine returns [`MarketError`]. Each variant is one
//! of the failure signals a component can raise; [`MarketError::kind`] folds
//! them into the coarse [`ErrorKind`] taxonomy the presentation layer uses to
//! tell "task full" apart from "try again".
//!
//! | Kind | Variants | Retry? |
//! |------|----------|--------|
//! | `NotFound` | task, claim, question, quiz attempt, user, transaction | no |
//! | `CapacityExceeded` | `TaskFull` | no |
//! | `InvalidStateTransition` | `TaskUnavailable`, `InvalidState`, `AlreadyCompleted`, `AccountSuspended`, `TransactionNotPending` | no |
//! | `InsufficientBalance` | `InsufficientBalance` | no |
//! | `InvalidInput` | `EmptyProof`, `InvalidAmount`, `InvalidInput` | no |
//! | `StorageUnavailable` | `LedgerWriteFailed`, `Storage` | yes, with backoff |

use crate::model::{ClaimStatus, Money, TxStatus};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, thiserror::Error)]
pub enum MarketError {
    #[error("task {0} not found")]
    TaskNotFound(Uuid),

    #[error("task {0} has no remaining slots")]
    TaskFull(Uuid),

    #[error("task {task_id} is not accepting claims: {reason}")]
    TaskUnavailable { task_id: Uuid, reason: String },

    #[error("claim not found: {0}")]
    ClaimNotFound(String),

    #[error("claim is {from}, cannot {action}")]
    InvalidState { from: ClaimStatus, action: &'static str },

    #[error("claim {0} is already completed")]
    AlreadyCompleted(Uuid),

    #[error("proof of completion must not be empty")]
    EmptyProof,

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance { available: Money, requested: Money },

    #[error("question {0:?} not found")]
    QuestionNotFound(String),

    #[error("quiz attempt {0} was never issued")]
    AttemptNotFound(Uuid),

    #[error("user {0} has no account")]
    UserNotFound(Uuid),

    #[error("account {0} is suspended")]
    AccountSuspended(Uuid),

    #[error("transaction {0} not found")]
    TransactionNotFound(Uuid),

    #[error("transaction {id} is {status}, not pending")]
    TransactionNotPending { id: Uuid, status: TxStatus },

    #[error("ledger write failed: {0}")]
    LedgerWriteFailed(String),

    #[error("storage unavailable: {0}")]
    Storage(String),
}

/// Coarse error taxonomy surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    CapacityExceeded,
    InvalidStateTransition,
    InsufficientBalance,
    InvalidInput,
    StorageUnavailable,
}

impl MarketError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MarketError::TaskNotFound(_)
            | MarketError::ClaimNotFound(_)
            | MarketError::UserNotFound(_)
            | MarketError::QuestionNotFound(_)
            | MarketError::AttemptNotFound(_)
            | MarketError::TransactionNotFound(_) => ErrorKind::NotFound,
            MarketError::TaskFull(_) => ErrorKind::CapacityExceeded,
            MarketError::TaskUnavailable { .. }
            | MarketError::InvalidState { .. }
            | MarketError::AlreadyCompleted(_)
            | MarketError::AccountSuspended(_)
            | MarketError::TransactionNotPending { .. } => ErrorKind::InvalidStateTransition,
            MarketError::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            MarketError::EmptyProof
            | MarketError::InvalidAmount(_)
            | MarketError::InvalidInput(_) => ErrorKind::InvalidInput,
            MarketError::LedgerWriteFailed(_) | MarketError::Storage(_) => {
                ErrorKind::StorageUnavailable
            }
        }
    }

    /// Only storage faults are transient; everything else is terminal for the request.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::StorageUnavailable
    }

    /// Stable machine-readable code for API clients.
    pub fn code(&self) -> &'static str {
        match self {
            MarketError::TaskNotFound(_) => "task_not_found",
            MarketError::TaskFull(_) => "task_full",
            MarketError::TaskUnavailable { .. } => "task_unavailable",
            MarketError::ClaimNotFound(_) => "claim_not_found",
            MarketError::InvalidState { .. } => "invalid_state",
            MarketError::AlreadyCompleted(_) => "already_completed",
            MarketError::EmptyProof => "empty_proof",
            MarketError::InvalidAmount(_) => "invalid_amount",
            MarketError::InvalidInput(_) => "invalid_input",
            MarketError::InsufficientBalance { .. } => "insufficient_balance",
            MarketError::QuestionNotFound(_) => "question_not_found",
            MarketError::AttemptNotFound(_) => "attempt_not_found",
            MarketError::UserNotFound(_) => "user_not_found",
            MarketError::AccountSuspended(_) => "account_suspended",
            MarketError::TransactionNotFound(_) => "transaction_not_found",
            MarketError::TransactionNotPending { .. } => "transaction_not_pending",
            MarketError::LedgerWriteFailed(_) => "ledger_write_failed",
            MarketError::Storage(_) => "storage_unavailable",
        }
    }
}

impl From<sqlx::Error> for MarketError {
    fn from(e: sqlx::Error) -> Self {
        MarketError::Storage(e.to_string())
    }
}

pub type Result<T, E = MarketError> = std::result::Result<T, E>;
