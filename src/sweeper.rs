//! # Expiry Sweeper
//!
//! A `claimed` claim with no proof by the time its task expires is abandoned
//! and its reservation goes back to capacity. Submitted claims are left for
//! approval. The sweep also closes every expired task still open.
//!
//! The coordinator runs [`sweep`] on a fixed interval; operators can trigger
//! it on demand through the admin API or `taskmarket sweep`.

use crate::error::Result;
use crate::model::{Claim, ClaimStatus, Task};
use crate::store::MarketStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub tasks_closed: Vec<Uuid>,
    pub claims_abandoned: Vec<Uuid>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.tasks_closed.is_empty() && self.claims_abandoned.is_empty()
    }

    pub fn merge(&mut self, other: SweepReport) {
        self.tasks_closed.extend(other.tasks_closed);
        self.claims_abandoned.extend(other.claims_abandoned);
    }
}

/// Expire one task. `claims` are the task's claims; the ones that change are
/// mutated in place and listed in the report.
pub fn expire_task(task: &mut Task, claims: &mut [Claim], now: DateTime<Utc>) -> SweepReport {
    let mut report = SweepReport::default();
    if !task.is_expired(now) {
        return report;
    }
    if task.close_if_expired(now) {
        report.tasks_closed.push(task.id);
    }
    for claim in claims.iter_mut().filter(|c| c.status() == ClaimStatus::Claimed) {
        if claim.abandon(now).is_ok() {
            task.release_slot(now);
            report.claims_abandoned.push(claim.id);
        }
    }
    report
}

/// `Sweep(now)`.
pub async fn sweep(store: &dyn MarketStore, now: DateTime<Utc>) -> Result<SweepReport> {
    store.sweep_expired(now).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims;
    use crate::model::task::tests::sample_task;
    use crate::model::TaskStatus;
    use crate::store::memory::MemoryStore;
    use crate::verifier::{self, ApprovalPolicy};
    use chrono::Duration;

    #[test]
    fn expire_task_abandons_only_claimed() {
        let now = Utc::now();
        let mut task = sample_task(3, 500);
        task.expires_at = Some(now + Duration::minutes(5));
        task.reserve_slot(now).unwrap();
        task.reserve_slot(now).unwrap();
        let idle = Claim::new(Uuid::new_v4(), &task, now);
        let mut submitted = Claim::new(Uuid::new_v4(), &task, now);
        submitted.submit("done", 100, now).unwrap();
        let mut claims = vec![idle, submitted];

        assert!(expire_task(&mut task, &mut claims, now).is_empty());

        let later = now + Duration::minutes(10);
        let report = expire_task(&mut task, &mut claims, later);
        assert_eq!(report.tasks_closed, vec![task.id]);
        assert_eq!(report.claims_abandoned, vec![claims[0].id]);
        assert_eq!(claims[0].status(), ClaimStatus::Abandoned);
        assert_eq!(claims[1].status(), ClaimStatus::Submitted);
        assert_eq!(task.reserved_slots, 1);
        assert_eq!(task.status, TaskStatus::Closed);

        assert!(expire_task(&mut task, &mut claims, later).is_empty());
    }

    #[tokio::test]
    async fn sweep_releases_reservations_in_store() {
        let store = MemoryStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        for u in [a, b] {
            store.ensure_account(u, Utc::now()).await.unwrap();
        }
        let mut task = sample_task(2, 500);
        task.expires_at = Some(Utc::now() + Duration::hours(1));
        store.insert_task(&task).await.unwrap();
        claims::claim(&store, a, task.id).await.unwrap();
        claims::claim(&store, b, task.id).await.unwrap();
        verifier::submit_proof(&store, ApprovalPolicy::Manual, 1000, b, task.id, "done")
            .await
            .unwrap();

        let report = sweep(&store, Utc::now() + Duration::hours(2)).await.unwrap();
        assert_eq!(report.tasks_closed, vec![task.id]);
        assert_eq!(report.claims_abandoned.len(), 1);

        let stored = store.get_task(task.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Closed);
        assert_eq!(stored.reserved_slots, 1);
        let a_claim = store.find_claim(a, task.id).await.unwrap().unwrap();
        assert_eq!(a_claim.status(), ClaimStatus::Abandoned);

        // Submitted work on the expired task can still be approved.
        let b_claim = store.find_claim(b, task.id).await.unwrap().unwrap();
        let approval = verifier::approve(&store, b_claim.id).await.unwrap();
        assert_eq!(approval.task.completed_slots, 1);
        assert_eq!(approval.task.reserved_slots, 0);
    }
}
