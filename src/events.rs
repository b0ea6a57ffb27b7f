//! # Events: Marketplace Activity Log
//!
//! A bounded, thread-safe log of marketplace activity, served to operators
//! at `/api/admin/events`. Every emitted event is also logged through
//! `tracing` with structured fields.
//!
//! | Variant | Emitted When |
//! |---------|-------------|
//! | `TaskCreated` | An operator publishes a task |
//! | `TaskStatusChanged` | An operator pauses, resumes or closes a task |
//! | `ClaimAdmitted` | A claim is created, reopened or resumed |
//! | `ProofSubmitted` | Proof is recorded on a claim |
//! | `PayoutCredited` | A fresh earning or adjustment hits the ledger |
//! | `WithdrawalRequested` | A user opens a withdrawal |
//! | `WithdrawalSettled` | Settlement reports completed or failed |
//! | `ClaimPurged` | An operator deletes a claim |
//! | `SweepCompleted` | The expiry sweep changed something |
//!
//! Each record gets a monotonic `id` so pollers can ask for `since=<id>`.

use crate::model::{Money, TaskStatus, TxKind, TxStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    TaskCreated {
        task_id: Uuid,
        title: String,
        total_slots: i32,
        payout: Money,
    },
    TaskStatusChanged {
        task_id: Uuid,
        status: TaskStatus,
    },
    ClaimAdmitted {
        claim_id: Uuid,
        task_id: Uuid,
        user_id: Uuid,
        outcome: &'static str,
    },
    ProofSubmitted {
        claim_id: Uuid,
        user_id: Uuid,
    },
    PayoutCredited {
        transaction_id: Uuid,
        user_id: Uuid,
        amount: Money,
        tx_kind: TxKind,
    },
    WithdrawalRequested {
        transaction_id: Uuid,
        user_id: Uuid,
        amount: Money,
    },
    WithdrawalSettled {
        transaction_id: Uuid,
        user_id: Uuid,
        status: TxStatus,
    },
    ClaimPurged {
        claim_id: Uuid,
        task_id: Uuid,
    },
    SweepCompleted {
        tasks_closed: usize,
        claims_abandoned: usize,
    },
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::TaskCreated { .. } => "task_created",
            Event::TaskStatusChanged { .. } => "task_status_changed",
            Event::ClaimAdmitted { .. } => "claim_admitted",
            Event::ProofSubmitted { .. } => "proof_submitted",
            Event::PayoutCredited { .. } => "payout_credited",
            Event::WithdrawalRequested { .. } => "withdrawal_requested",
            Event::WithdrawalSettled { .. } => "withdrawal_settled",
            Event::ClaimPurged { .. } => "claim_purged",
            Event::SweepCompleted { .. } => "sweep_completed",
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct EventRecord {
    pub id: u64,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: Event,
}

pub const DEFAULT_CAPACITY: usize = 200;

pub struct EventLog {
    recent: Mutex<VecDeque<EventRecord>>,
    capacity: usize,
    next_id: AtomicU64,
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        EventLog {
            recent: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            next_id: AtomicU64::new(1),
        }
    }

    /// Record an event, evicting the oldest once the log is full.
    pub fn emit(&self, event: Event) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::info!(event_id = id, kind = event.kind(), detail = ?event, "market event");
        let mut recent = lock_or_recover(&self.recent);
        if recent.len() == self.capacity {
            recent.pop_front();
        }
        recent.push_back(EventRecord {
            id,
            at: Utc::now(),
            event,
        });
        id
    }

    /// Records with `id > since`, oldest first, at most `limit`.
    pub fn since(&self, since: u64, limit: usize) -> Vec<EventRecord> {
        lock_or_recover(&self.recent)
            .iter()
            .filter(|r| r.id > since)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        lock_or_recover(&self.recent).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
