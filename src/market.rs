//! # Marketplace
//!
//! The operation surface the API and CLI call into. `Marketplace` owns the
//! store handle, the market configuration, the question bank, the activity
//! log and the metrics registry. Each method delegates the state change to
//! its component module, then logs, counts and records what happened.
//!
//! User-facing writes create the caller's account on first use, so a fresh
//! identity can claim a task without a separate sign-up step.

use crate::claims::{self, ClaimOutcome};
use crate::config::MarketConfig;
use crate::error::{MarketError, Result};
use crate::events::{Event, EventLog, EventRecord};
use crate::ledger::{self, ReconciliationReport, UserStats};
use crate::model::{
    Account, AccountStatus, Claim, Money, NewTask, Task, TaskStatus, Transaction, TxKind,
};
use crate::payout::{self, CreditOutcome, CreditRequest};
use crate::prom_metrics::Metrics;
use crate::quiz::{self, AnswerOutcome, QuestionBank, QuestionView};
use crate::store::MarketStore;
use crate::sweeper::{self, SweepReport};
use crate::verifier::{self, Approval, ApprovalPolicy, Submission};
use crate::withdrawals::{self, Settlement, WithdrawalRequest};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_LIST_LIMIT: i64 = 100;
pub const MAX_LIST_LIMIT: i64 = 1000;

pub fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
}

pub struct Marketplace {
    store: Arc<dyn MarketStore>,
    config: MarketConfig,
    questions: QuestionBank,
    events: EventLog,
    metrics: Metrics,
}

impl Marketplace {
    pub fn new(store: Arc<dyn MarketStore>, config: MarketConfig, questions: QuestionBank) -> Self {
        let events = EventLog::new(config.event_log_capacity);
        Marketplace {
            store,
            config,
            questions,
            events,
            metrics: Metrics::new(),
        }
    }

    pub fn store(&self) -> &dyn MarketStore {
        self.store.as_ref()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn approval_policy(&self) -> ApprovalPolicy {
        self.config.approval_policy
    }

    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    // ── Catalog ─────────────────────────────────────────────────

    pub async fn create_task(&self, new_task: NewTask, created_by: Option<String>) -> Result<Task> {
        let task = new_task.into_task(created_by, Utc::now())?;
        self.store.insert_task(&task).await?;
        info!(task_id = %task.id, title = %task.title, slots = task.total_slots, payout = %task.payout, "task created");
        self.events.emit(Event::TaskCreated {
            task_id: task.id,
            title: task.title.clone(),
            total_slots: task.total_slots,
            payout: task.payout,
        });
        Ok(task)
    }

    pub async fn get_task(&self, task_id: Uuid) -> Result<Task> {
        self.store.get_task(task_id).await
    }

    pub async fn list_tasks(&self, status: Option<TaskStatus>, limit: i64) -> Result<Vec<Task>> {
        self.store.list_tasks(status, limit).await
    }

    pub async fn set_task_status(&self, task_id: Uuid, status: TaskStatus) -> Result<Task> {
        let task = self.store.set_task_status(task_id, status, Utc::now()).await?;
        info!(task_id = %task_id, status = %status, "task status changed");
        self.events.emit(Event::TaskStatusChanged { task_id, status });
        Ok(task)
    }

    // ── Claims ──────────────────────────────────────────────────

    /// `Claim(user, task)`. Capacity and state rejections are counted by
    /// error code so dashboards can tell "task full" from faults.
    pub async fn claim_task(&self, user_id: Uuid, task_id: Uuid) -> Result<(Claim, ClaimOutcome)> {
        self.store.ensure_account(user_id, Utc::now()).await?;
        match claims::claim(self.store(), user_id, task_id).await {
            Ok((claim, outcome)) => {
                self.metrics.record_claim(outcome.as_str());
                info!(claim_id = %claim.id, task_id = %task_id, user_id = %user_id, outcome = outcome.as_str(), "claim admitted");
                self.events.emit(Event::ClaimAdmitted {
                    claim_id: claim.id,
                    task_id,
                    user_id,
                    outcome: outcome.as_str(),
                });
                Ok((claim, outcome))
            }
            Err(e) => {
                self.metrics.record_claim(e.code());
                Err(e)
            }
        }
    }

    /// `SubmitProof(user, task, proof)`, approving immediately under the
    /// `auto` policy.
    pub async fn submit_proof(&self, user_id: Uuid, task_id: Uuid, proof: &str) -> Result<Submission> {
        let submission = verifier::submit_proof(
            self.store(),
            self.config.approval_policy,
            self.config.max_proof_len,
            user_id,
            task_id,
            proof,
        )
        .await?;
        if submission.newly_submitted {
            info!(claim_id = %submission.claim.id, user_id = %user_id, "proof submitted");
            self.events.emit(Event::ProofSubmitted {
                claim_id: submission.claim.id,
                user_id,
            });
        }
        if let Some(tx) = &submission.payout {
            self.observe_credit(tx, true);
        }
        Ok(submission)
    }

    pub async fn approve(&self, claim_id: Uuid) -> Result<Approval> {
        let approval = verifier::approve(self.store(), claim_id).await?;
        // Claim completion and credit commit together.
        self.observe_credit(&approval.transaction, true);
        info!(claim_id = %claim_id, task_id = %approval.task.id, completed_slots = approval.task.completed_slots, "claim approved");
        Ok(approval)
    }

    pub async fn purge_claim(&self, claim_id: Uuid) -> Result<Claim> {
        let claim = self.store.purge_claim(claim_id, Utc::now()).await?;
        warn!(claim_id = %claim_id, task_id = %claim.task_id, status = %claim.status(), "claim purged");
        self.events.emit(Event::ClaimPurged {
            claim_id,
            task_id: claim.task_id,
        });
        Ok(claim)
    }

    pub async fn get_claim(&self, claim_id: Uuid) -> Result<Claim> {
        self.store.get_claim(claim_id).await
    }

    pub async fn list_claims(&self, user_id: Uuid) -> Result<Vec<Claim>> {
        self.store.list_user_claims(user_id).await
    }

    // ── Ledger ──────────────────────────────────────────────────

    pub async fn balance(&self, user_id: Uuid) -> Result<Account> {
        self.store.get_account(user_id).await
    }

    pub async fn ensure_account(&self, user_id: Uuid) -> Result<Account> {
        self.store.ensure_account(user_id, Utc::now()).await
    }

    pub async fn list_transactions(&self, user_id: Uuid, limit: i64) -> Result<Vec<Transaction>> {
        self.store.list_transactions(user_id, limit).await
    }

    pub async fn get_transaction(&self, tx_id: Uuid) -> Result<Transaction> {
        self.store.get_transaction(tx_id).await
    }

    pub async fn set_account_status(&self, user_id: Uuid, status: AccountStatus) -> Result<Account> {
        let account = self
            .store
            .set_account_status(user_id, status, Utc::now())
            .await?;
        warn!(user_id = %user_id, status = %status, "account status changed");
        Ok(account)
    }

    /// `Adjust(user, amount, description)`. `key` makes a retried call
    /// idempotent.
    pub async fn adjust(
        &self,
        user_id: Uuid,
        amount: Money,
        description: String,
        key: Option<&str>,
    ) -> Result<CreditOutcome> {
        if description.trim().is_empty() {
            return Err(MarketError::InvalidInput("description must not be empty".into()));
        }
        self.store.ensure_account(user_id, Utc::now()).await?;
        let req = CreditRequest::adjustment(user_id, amount, description, key);
        let outcome = payout::credit(self.store(), &req).await?;
        self.observe_credit(outcome.transaction(), outcome.is_fresh());
        Ok(outcome)
    }

    pub async fn request_withdrawal(
        &self,
        user_id: Uuid,
        amount: Money,
        destination: String,
    ) -> Result<Transaction> {
        self.store.ensure_account(user_id, Utc::now()).await?;
        let req = WithdrawalRequest {
            user_id,
            amount,
            destination,
        };
        let tx = withdrawals::request(self.store(), &req).await?;
        self.metrics.record_withdrawal("requested");
        info!(transaction_id = %tx.id, user_id = %user_id, amount = %amount, "withdrawal requested");
        self.events.emit(Event::WithdrawalRequested {
            transaction_id: tx.id,
            user_id,
            amount,
        });
        Ok(tx)
    }

    pub async fn settle_withdrawal(&self, tx_id: Uuid, settlement: &Settlement) -> Result<Transaction> {
        let tx = withdrawals::settle_reported(self.store(), tx_id, settlement).await?;
        self.metrics.record_withdrawal(tx.status.as_str());
        info!(transaction_id = %tx_id, user_id = %tx.user_id, status = %tx.status, "withdrawal settled");
        self.events.emit(Event::WithdrawalSettled {
            transaction_id: tx_id,
            user_id: tx.user_id,
            status: tx.status,
        });
        Ok(tx)
    }

    pub async fn pending_withdrawals(&self, limit: i64) -> Result<Vec<Transaction>> {
        self.store.list_pending_withdrawals(limit).await
    }

    pub async fn user_stats(&self, user_id: Uuid) -> Result<UserStats> {
        ledger::stats(self.store(), user_id).await
    }

    pub async fn reconcile(&self, user_id: Uuid) -> Result<ReconciliationReport> {
        let report = ledger::reconcile_user(self.store(), user_id).await?;
        if !report.balanced {
            warn!(
                user_id = %user_id,
                available = %report.available_balance,
                expected = %report.expected_available,
                "ledger does not reconcile"
            );
        }
        Ok(report)
    }

    // ── Quiz ────────────────────────────────────────────────────

    pub async fn next_question(&self, user_id: Uuid) -> Result<QuestionView> {
        self.store.ensure_account(user_id, Utc::now()).await?;
        let view = quiz::issue(self.store(), &self.questions, user_id).await?;
        debug!(user_id = %user_id, attempt_id = %view.attempt_id, question_id = %view.question_id, "question issued");
        Ok(view)
    }

    pub async fn answer_question(
        &self,
        user_id: Uuid,
        attempt_id: Uuid,
        question_id: &str,
        choice: i32,
    ) -> Result<AnswerOutcome> {
        self.store.ensure_account(user_id, Utc::now()).await?;
        let outcome = quiz::answer(
            self.store(),
            &self.questions,
            user_id,
            attempt_id,
            question_id,
            choice,
        )
        .await?;
        if !outcome.replayed && outcome.attempt.correct {
            if let Some(tx_id) = outcome.attempt.transaction_id {
                self.metrics
                    .record_payout(TxKind::Earning.as_str(), outcome.attempt.reward.cents());
                self.events.emit(Event::PayoutCredited {
                    transaction_id: tx_id,
                    user_id,
                    amount: outcome.attempt.reward,
                    tx_kind: TxKind::Earning,
                });
            }
        }
        info!(
            user_id = %user_id,
            attempt_id = %attempt_id,
            correct = outcome.attempt.correct,
            replayed = outcome.replayed,
            "question answered"
        );
        Ok(outcome)
    }

    // ── Maintenance ─────────────────────────────────────────────

    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let report = sweeper::sweep(self.store(), now).await?;
        if !report.is_empty() {
            info!(
                tasks_closed = report.tasks_closed.len(),
                claims_abandoned = report.claims_abandoned.len(),
                "expiry sweep"
            );
            self.events.emit(Event::SweepCompleted {
                tasks_closed: report.tasks_closed.len(),
                claims_abandoned: report.claims_abandoned.len(),
            });
        }
        Ok(report)
    }

    /// Refresh the gauge metrics from the store.
    pub async fn refresh_gauges(&self) -> Result<()> {
        let counts = self.store.market_counts().await?;
        self.metrics.tasks_active.set(counts.active_tasks);
        self.metrics.withdrawals_pending.set(counts.pending_withdrawals);
        Ok(())
    }

    pub fn recent_events(&self, since: u64, limit: usize) -> Vec<EventRecord> {
        self.events.since(since, limit)
    }

    fn observe_credit(&self, tx: &Transaction, fresh: bool) {
        if !fresh {
            return;
        }
        self.metrics.record_payout(tx.kind.as_str(), tx.amount.cents());
        info!(transaction_id = %tx.id, user_id = %tx.user_id, amount = %tx.amount, kind = %tx.kind, "payout credited");
        self.events.emit(Event::PayoutCredited {
            transaction_id: tx.id,
            user_id: tx.user_id,
            amount: tx.amount,
            tx_kind: tx.kind,
        });
    }
}
