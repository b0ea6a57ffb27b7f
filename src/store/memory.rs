//! In-memory [`MarketStore`].
//!
//! One mutex guards every table, which serializes all writers. Each
//! operation clones the rows it touches, applies the rule to the copies and
//! writes them back only after [`MemoryStore::check_commit`] passes, so an
//! injected commit failure leaves every table as it was.

use super::{MarketCounts, MarketStore};
use crate::claims::{self, ClaimOutcome};
use crate::error::{MarketError, Result};
use crate::model::{Account, AccountStatus, Claim, Task, TaskStatus, Transaction};
use crate::payout::{self, CreditOutcome, CreditRequest};
use crate::quiz::{self, QuizAttempt, QuizIssue};
use crate::sweeper::{self, SweepReport};
use crate::verifier::{self, Approval};
use crate::withdrawals::{self, Settlement, WithdrawalRequest};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn to_limit(limit: i64) -> usize {
    usize::try_from(limit.max(0)).unwrap_or(usize::MAX)
}

#[derive(Default)]
struct Tables {
    tasks: HashMap<Uuid, Task>,
    claims: HashMap<Uuid, Claim>,
    /// (user_id, task_id) → claim id. One row per pair.
    claim_keys: HashMap<(Uuid, Uuid), Uuid>,
    accounts: HashMap<Uuid, Account>,
    /// Append order is creation order.
    transactions: Vec<Transaction>,
    tx_ids: HashMap<Uuid, usize>,
    tx_refs: HashMap<String, usize>,
    quiz_issues: HashMap<(Uuid, Uuid), QuizIssue>,
    quiz_attempts: HashMap<(Uuid, Uuid), QuizAttempt>,
}

impl Tables {
    fn task(&self, id: Uuid) -> Result<Task> {
        self.tasks.get(&id).cloned().ok_or(MarketError::TaskNotFound(id))
    }

    fn account(&self, user_id: Uuid) -> Result<Account> {
        self.accounts
            .get(&user_id)
            .cloned()
            .ok_or(MarketError::UserNotFound(user_id))
    }

    fn claim(&self, id: Uuid) -> Result<Claim> {
        self.claims
            .get(&id)
            .cloned()
            .ok_or_else(|| MarketError::ClaimNotFound(id.to_string()))
    }

    fn claim_for(&self, user_id: Uuid, task_id: Uuid) -> Option<Claim> {
        self.claim_keys
            .get(&(user_id, task_id))
            .and_then(|id| self.claims.get(id))
            .cloned()
    }

    fn put_claim(&mut self, claim: Claim) {
        self.claim_keys.insert((claim.user_id, claim.task_id), claim.id);
        self.claims.insert(claim.id, claim);
    }

    fn tx_by_ref(&self, reference: &str) -> Option<Transaction> {
        self.tx_refs
            .get(reference)
            .map(|&i| self.transactions[i].clone())
    }

    fn push_tx(&mut self, tx: Transaction) {
        let index = self.transactions.len();
        self.tx_ids.insert(tx.id, index);
        if let Some(reference) = &tx.reference {
            self.tx_refs.insert(reference.clone(), index);
        }
        self.transactions.push(tx);
    }

    fn replace_tx(&mut self, tx: Transaction) {
        if let Some(&index) = self.tx_ids.get(&tx.id) {
            self.transactions[index] = tx;
        }
    }
}

pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_next_commit: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            tables: Mutex::new(Tables::default()),
            fail_next_commit: AtomicBool::new(false),
        }
    }

    /// Make the next write fail at commit time, as a storage fault would.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    fn check_commit(&self) -> Result<()> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(MarketError::LedgerWriteFailed(
                "injected commit failure".into(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl MarketStore for MemoryStore {
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    async fn insert_task(&self, task: &Task) -> Result<()> {
        let mut t = lock_or_recover(&self.tables);
        if t.tasks.contains_key(&task.id) {
            return Err(MarketError::InvalidInput(format!(
                "task {} already exists",
                task.id
            )));
        }
        self.check_commit()?;
        t.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<Task> {
        lock_or_recover(&self.tables).task(id)
    }

    async fn list_tasks(&self, status: Option<TaskStatus>, limit: i64) -> Result<Vec<Task>> {
        let t = lock_or_recover(&self.tables);
        let mut tasks: Vec<Task> = t
            .tasks
            .values()
            .filter(|task| status.map_or(true, |s| task.status == s))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        tasks.truncate(to_limit(limit));
        Ok(tasks)
    }

    async fn set_task_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        now: DateTime<Utc>,
    ) -> Result<Task> {
        let mut t = lock_or_recover(&self.tables);
        let mut task = t.task(id)?;
        task.set_status(status, now)?;
        self.check_commit()?;
        t.tasks.insert(id, task.clone());
        Ok(task)
    }

    async fn admit_claim(
        &self,
        user_id: Uuid,
        task_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(Claim, ClaimOutcome)> {
        let mut t = lock_or_recover(&self.tables);
        let mut task = t.task(task_id)?;
        let account = t.account(user_id)?;
        let existing = t.claim_for(user_id, task_id);
        let admission = claims::admit(&mut task, &account, existing, now)?;
        let outcome = admission.outcome();
        if admission.reserves_slot() {
            self.check_commit()?;
            t.tasks.insert(task.id, task);
            t.put_claim(admission.claim().clone());
        }
        Ok((admission.into_claim(), outcome))
    }

    async fn get_claim(&self, id: Uuid) -> Result<Claim> {
        lock_or_recover(&self.tables).claim(id)
    }

    async fn find_claim(&self, user_id: Uuid, task_id: Uuid) -> Result<Option<Claim>> {
        Ok(lock_or_recover(&self.tables).claim_for(user_id, task_id))
    }

    async fn list_user_claims(&self, user_id: Uuid) -> Result<Vec<Claim>> {
        let t = lock_or_recover(&self.tables);
        let mut claims: Vec<Claim> = t
            .claims
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        claims.sort_by(|a, b| b.claimed_at.cmp(&a.claimed_at));
        Ok(claims)
    }

    async fn record_proof(
        &self,
        user_id: Uuid,
        task_id: Uuid,
        proof: &str,
        max_len: usize,
        now: DateTime<Utc>,
    ) -> Result<(Claim, bool)> {
        let mut t = lock_or_recover(&self.tables);
        let mut claim = t.claim_for(user_id, task_id).ok_or_else(|| {
            MarketError::ClaimNotFound(format!("user {} on task {}", user_id, task_id))
        })?;
        let task = t.task(task_id)?;
        let changed = verifier::accept_proof(&mut claim, &task, proof, max_len, now)?;
        if changed {
            self.check_commit()?;
            t.put_claim(claim.clone());
        }
        Ok((claim, changed))
    }

    async fn approve_claim(&self, claim_id: Uuid, now: DateTime<Utc>) -> Result<Approval> {
        let mut t = lock_or_recover(&self.tables);
        let mut claim = t.claim(claim_id)?;
        let mut task = t.task(claim.task_id)?;
        let mut account = t.account(claim.user_id)?;
        let credit = verifier::finalize(&mut claim, &mut task, now)?;
        let existing = t.tx_by_ref(&credit.reference);
        let outcome = payout::apply(&mut account, &credit, existing, now)?;

        self.check_commit()?;
        t.put_claim(claim.clone());
        t.tasks.insert(task.id, task.clone());
        if let CreditOutcome::Credited(tx) = &outcome {
            t.accounts.insert(account.user_id, account);
            t.push_tx(tx.clone());
        }
        Ok(Approval {
            claim,
            task,
            transaction: outcome.into_transaction(),
        })
    }

    async fn purge_claim(&self, claim_id: Uuid, now: DateTime<Utc>) -> Result<Claim> {
        let mut t = lock_or_recover(&self.tables);
        let claim = t.claim(claim_id)?;
        let mut task = t.task(claim.task_id)?;
        claims::purge(&mut task, &claim, now)?;

        self.check_commit()?;
        t.claims.remove(&claim.id);
        t.claim_keys.remove(&(claim.user_id, claim.task_id));
        t.tasks.insert(task.id, task);
        Ok(claim)
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut t = lock_or_recover(&self.tables);
        let candidates: Vec<Uuid> = t
            .tasks
            .values()
            .filter(|task| {
                task.is_expired(now)
                    && (task.status != TaskStatus::Closed || task.reserved_slots > 0)
            })
            .map(|task| task.id)
            .collect();

        let mut report = SweepReport::default();
        let mut tasks = Vec::new();
        let mut abandoned = Vec::new();
        for id in candidates {
            let mut task = t.task(id)?;
            let mut claims: Vec<Claim> = t
                .claims
                .values()
                .filter(|c| c.task_id == id)
                .cloned()
                .collect();
            let expired = sweeper::expire_task(&mut task, &mut claims, now);
            if expired.is_empty() {
                continue;
            }
            abandoned.extend(
                claims
                    .into_iter()
                    .filter(|c| expired.claims_abandoned.contains(&c.id)),
            );
            tasks.push(task);
            report.merge(expired);
        }

        if !report.is_empty() {
            self.check_commit()?;
            for task in tasks {
                t.tasks.insert(task.id, task);
            }
            for claim in abandoned {
                t.put_claim(claim);
            }
        }
        Ok(report)
    }

    async fn ensure_account(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Account> {
        let mut t = lock_or_recover(&self.tables);
        if let Some(account) = t.accounts.get(&user_id) {
            return Ok(account.clone());
        }
        self.check_commit()?;
        let account = Account::new(user_id, now);
        t.accounts.insert(user_id, account.clone());
        Ok(account)
    }

    async fn get_account(&self, user_id: Uuid) -> Result<Account> {
        lock_or_recover(&self.tables).account(user_id)
    }

    async fn set_account_status(
        &self,
        user_id: Uuid,
        status: AccountStatus,
        now: DateTime<Utc>,
    ) -> Result<Account> {
        let mut t = lock_or_recover(&self.tables);
        let mut account = t.account(user_id)?;
        account.status = status;
        account.updated_at = now;
        self.check_commit()?;
        t.accounts.insert(user_id, account.clone());
        Ok(account)
    }

    async fn credit(&self, req: &CreditRequest, now: DateTime<Utc>) -> Result<CreditOutcome> {
        let mut t = lock_or_recover(&self.tables);
        let mut account = t.account(req.user_id)?;
        let existing = t.tx_by_ref(&req.reference);
        let outcome = payout::apply(&mut account, req, existing, now)?;
        if let CreditOutcome::Credited(tx) = &outcome {
            self.check_commit()?;
            t.accounts.insert(account.user_id, account);
            t.push_tx(tx.clone());
        }
        Ok(outcome)
    }

    async fn open_withdrawal(
        &self,
        req: &WithdrawalRequest,
        now: DateTime<Utc>,
    ) -> Result<Transaction> {
        let mut t = lock_or_recover(&self.tables);
        let mut account = t.account(req.user_id)?;
        let tx = withdrawals::open(&mut account, req, now)?;
        self.check_commit()?;
        t.accounts.insert(account.user_id, account);
        t.push_tx(tx.clone());
        Ok(tx)
    }

    async fn settle_withdrawal(
        &self,
        tx_id: Uuid,
        settlement: &Settlement,
        now: DateTime<Utc>,
    ) -> Result<Transaction> {
        let mut t = lock_or_recover(&self.tables);
        let index = *t
            .tx_ids
            .get(&tx_id)
            .ok_or(MarketError::TransactionNotFound(tx_id))?;
        let mut tx = t.transactions[index].clone();
        let mut account = t.account(tx.user_id)?;
        withdrawals::settle(&mut tx, &mut account, settlement, now)?;
        self.check_commit()?;
        t.accounts.insert(account.user_id, account);
        t.replace_tx(tx.clone());
        Ok(tx)
    }

    async fn get_transaction(&self, id: Uuid) -> Result<Transaction> {
        let t = lock_or_recover(&self.tables);
        t.tx_ids
            .get(&id)
            .map(|&i| t.transactions[i].clone())
            .ok_or(MarketError::TransactionNotFound(id))
    }

    async fn list_transactions(&self, user_id: Uuid, limit: i64) -> Result<Vec<Transaction>> {
        let t = lock_or_recover(&self.tables);
        Ok(t.transactions
            .iter()
            .rev()
            .filter(|tx| tx.user_id == user_id)
            .take(to_limit(limit))
            .cloned()
            .collect())
    }

    async fn list_pending_withdrawals(&self, limit: i64) -> Result<Vec<Transaction>> {
        let t = lock_or_recover(&self.tables);
        Ok(t.transactions
            .iter()
            .filter(|tx| tx.is_pending_withdrawal())
            .take(to_limit(limit))
            .cloned()
            .collect())
    }

    async fn market_counts(&self) -> Result<MarketCounts> {
        let t = lock_or_recover(&self.tables);
        Ok(MarketCounts {
            active_tasks: t
                .tasks
                .values()
                .filter(|task| task.status == TaskStatus::Active)
                .count() as i64,
            pending_withdrawals: t
                .transactions
                .iter()
                .filter(|tx| tx.is_pending_withdrawal())
                .count() as i64,
        })
    }

    async fn issue_quiz_attempt(&self, issue: &QuizIssue) -> Result<()> {
        let mut t = lock_or_recover(&self.tables);
        self.check_commit()?;
        t.quiz_issues
            .entry((issue.user_id, issue.attempt_id))
            .or_insert_with(|| issue.clone());
        Ok(())
    }

    async fn find_quiz_issue(&self, user_id: Uuid, attempt_id: Uuid) -> Result<Option<QuizIssue>> {
        Ok(lock_or_recover(&self.tables)
            .quiz_issues
            .get(&(user_id, attempt_id))
            .cloned())
    }

    async fn record_quiz_answer(
        &self,
        attempt: &QuizAttempt,
        credit: Option<&CreditRequest>,
        now: DateTime<Utc>,
    ) -> Result<(QuizAttempt, bool)> {
        let mut t = lock_or_recover(&self.tables);
        let key = (attempt.user_id, attempt.attempt_id);
        if let Some(existing) = t.quiz_attempts.get(&key) {
            return Ok((existing.clone(), false));
        }
        let mut account = t.account(attempt.user_id)?;
        let (recorded, tx) = quiz::record(&mut account, attempt.clone(), credit, now)?;
        self.check_commit()?;
        if let Some(tx) = tx {
            t.accounts.insert(account.user_id, account);
            t.push_tx(tx);
        }
        t.quiz_attempts.insert(key, recorded.clone());
        Ok((recorded, true))
    }
}
