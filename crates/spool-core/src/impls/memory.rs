//! In-memory store: jobs, worker registry and config behind one tokio mutex.
//!
//! Each trait call takes the lock once, so guard evaluation and the write in
//! `conditional_update` are a single atomic step, which is all the claim
//! protocol needs. State does not survive the process; use `SqliteStore` when
//! workers run in separate processes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{
    Job, JobId, JobState, QueueError, QueueStats, Result, WorkerId, WorkerRecord, WorkerStatus,
};
use crate::ports::{ClaimClass, ConfigStore, Guard, JobStore, WorkerRegistry};

#[derive(Default)]
struct InMemoryState {
    /// All job records (single source of truth for jobs).
    jobs: HashMap<JobId, Job>,

    /// Worker registry.
    workers: HashMap<WorkerId, WorkerRecord>,

    /// Flat config map.
    config: BTreeMap<String, String>,
}

impl InMemoryState {
    fn candidates(
        &self,
        class: ClaimClass,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Vec<Job> {
        let mut out: Vec<Job> = self
            .jobs
            .values()
            .filter(|job| match class {
                ClaimClass::Pending => job.state == JobState::Pending && !job.is_leased(),
                ClaimClass::RetryDue => {
                    job.state == JobState::Failed
                        && !job.is_leased()
                        && job.next_retry_at.is_some_and(|at| at <= now)
                }
                ClaimClass::StaleLease => job.lease_is_stale(stale_before),
            })
            .cloned()
            .collect();

        match class {
            ClaimClass::Pending => out.sort_by(|a, b| {
                a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id))
            }),
            ClaimClass::RetryDue => out.sort_by(|a, b| {
                a.next_retry_at
                    .cmp(&b.next_retry_at)
                    .then_with(|| a.id.cmp(&b.id))
            }),
            ClaimClass::StaleLease => {
                out.sort_by(|a, b| a.lease_at.cmp(&b.lease_at).then_with(|| a.id.cmp(&b.id)))
            }
        }
        out
    }
}

/// In-memory implementation of every store port.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.jobs.contains_key(&job.id) {
            return Err(QueueError::Conflict(format!("job {} already exists", job.id)));
        }
        state.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get(&self, id: &JobId) -> Result<Option<Job>> {
        let state = self.state.lock().await;
        Ok(state.jobs.get(id).cloned())
    }

    async fn list_by_state(&self, filter: Option<JobState>) -> Result<Vec<Job>> {
        let state = self.state.lock().await;
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| filter.is_none_or(|s| job.state == s))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(jobs)
    }

    async fn claim_candidates(
        &self,
        class: ClaimClass,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Job>> {
        let state = self.state.lock().await;
        let mut out = state.candidates(class, now, stale_before);
        out.truncate(limit);
        Ok(out)
    }

    async fn conditional_update(
        &self,
        id: &JobId,
        next: &Job,
        guard: &Guard,
    ) -> Result<Option<Job>> {
        let mut state = self.state.lock().await;
        let Some(current) = state.jobs.get_mut(id) else {
            return Ok(None);
        };
        if !guard.matches(current) {
            return Ok(None);
        }
        *current = next.clone();
        Ok(Some(current.clone()))
    }

    async fn update_unconditional(&self, id: &JobId, next: &Job) -> Result<Job> {
        let mut state = self.state.lock().await;
        let current = state
            .jobs
            .get_mut(id)
            .ok_or_else(|| QueueError::job_not_found(id))?;
        *current = next.clone();
        Ok(current.clone())
    }

    async fn count_by_state(&self) -> Result<QueueStats> {
        let state = self.state.lock().await;
        let mut stats = QueueStats::default();
        for job in state.jobs.values() {
            stats.record(job.state);
        }
        Ok(stats)
    }
}

#[async_trait]
impl WorkerRegistry for InMemoryStore {
    async fn register(&self, worker: &WorkerRecord) -> Result<()> {
        let mut state = self.state.lock().await;
        state.workers.insert(worker.id.clone(), worker.clone());
        Ok(())
    }

    async fn heartbeat(&self, id: &WorkerId, at: DateTime<Utc>, jobs_processed: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        let worker = state
            .workers
            .get_mut(id)
            .ok_or_else(|| QueueError::worker_not_found(id))?;
        worker.last_heartbeat = at;
        worker.jobs_processed = jobs_processed;
        Ok(())
    }

    async fn set_status(
        &self,
        id: &WorkerId,
        status: WorkerStatus,
        jobs_processed: u64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let worker = state
            .workers
            .get_mut(id)
            .ok_or_else(|| QueueError::worker_not_found(id))?;
        worker.status = status;
        worker.jobs_processed = jobs_processed;
        worker.last_heartbeat = at;
        Ok(())
    }

    async fn get_worker(&self, id: &WorkerId) -> Result<Option<WorkerRecord>> {
        let state = self.state.lock().await;
        Ok(state.workers.get(id).cloned())
    }

    async fn list_workers(&self) -> Result<Vec<WorkerRecord>> {
        let state = self.state.lock().await;
        let mut workers: Vec<WorkerRecord> = state.workers.values().cloned().collect();
        workers.sort_by(|a, b| b.started_at.cmp(&a.started_at).then_with(|| a.id.cmp(&b.id)));
        Ok(workers)
    }

    async fn list_live(&self, since: DateTime<Utc>) -> Result<Vec<WorkerRecord>> {
        Ok(self
            .list_workers()
            .await?
            .into_iter()
            .filter(|w| w.is_live(since))
            .collect())
    }
}

#[async_trait]
impl ConfigStore for InMemoryStore {
    async fn get_config(&self, key: &str) -> Result<Option<String>> {
        let state = self.state.lock().await;
        Ok(state.config.get(key).cloned())
    }

    async fn set_config(&self, key: &str, value: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.config.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn list_config(&self) -> Result<BTreeMap<String, String>> {
        let state = self.state.lock().await;
        Ok(state.config.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Transition;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn job(id: &str, created: DateTime<Utc>) -> Job {
        Job::new(JobId::new(id), "true", 3, created)
    }

    #[tokio::test]
    async fn duplicate_insert_is_a_conflict() {
        let store = InMemoryStore::new();
        store.insert(&job("a", t0())).await.unwrap();

        let err = store.insert(&job("a", t0())).await.unwrap_err();
        assert!(matches!(err, QueueError::Conflict(_)));
    }

    #[tokio::test]
    async fn list_is_newest_first_and_filtered() {
        let store = InMemoryStore::new();
        store.insert(&job("old", t0())).await.unwrap();
        store
            .insert(&job("new", t0() + Duration::seconds(5)))
            .await
            .unwrap();

        let all = store.list_by_state(None).await.unwrap();
        let ids: Vec<&str> = all.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);

        let dead = store.list_by_state(Some(JobState::Dead)).await.unwrap();
        assert!(dead.is_empty());
    }

    #[tokio::test]
    async fn pending_candidates_are_fifo() {
        let store = InMemoryStore::new();
        store
            .insert(&job("second", t0() + Duration::seconds(1)))
            .await
            .unwrap();
        store.insert(&job("first", t0())).await.unwrap();

        let c = store
            .claim_candidates(ClaimClass::Pending, t0(), t0(), 10)
            .await
            .unwrap();
        assert_eq!(c[0].id.as_str(), "first");
        assert_eq!(c[1].id.as_str(), "second");
    }

    #[tokio::test]
    async fn conditional_update_applies_only_when_guard_holds() {
        let store = InMemoryStore::new();
        let pending = job("a", t0());
        store.insert(&pending).await.unwrap();

        let guard = Guard::Unleased {
            state: JobState::Pending,
        };
        let mine = pending
            .apply(Transition::Lease {
                holder: WorkerId::new("w1"),
                at: t0(),
            })
            .unwrap();
        let theirs = pending
            .apply(Transition::Lease {
                holder: WorkerId::new("w2"),
                at: t0(),
            })
            .unwrap();

        let won = store.conditional_update(&pending.id, &mine, &guard).await.unwrap();
        assert_eq!(won.unwrap().lease_holder, Some(WorkerId::new("w1")));

        let lost = store.conditional_update(&pending.id, &theirs, &guard).await.unwrap();
        assert!(lost.is_none());

        let stored = store.get(&pending.id).await.unwrap().unwrap();
        assert_eq!(stored.lease_holder, Some(WorkerId::new("w1")));
    }

    #[tokio::test]
    async fn unconditional_update_of_missing_job_is_not_found() {
        let store = InMemoryStore::new();
        let j = job("ghost", t0());
        let err = store.update_unconditional(&j.id, &j).await.unwrap_err();
        assert!(matches!(err, QueueError::NotFound { .. }));
    }

    #[tokio::test]
    async fn live_workers_exclude_stopped_and_silent() {
        let store = InMemoryStore::new();
        let fresh = WorkerRecord::new(WorkerId::new("fresh"), t0());
        let silent = WorkerRecord::new(WorkerId::new("silent"), t0() - Duration::minutes(10));
        let stopped = WorkerRecord::new(WorkerId::new("stopped"), t0());
        for w in [&fresh, &silent, &stopped] {
            store.register(w).await.unwrap();
        }
        store
            .set_status(&stopped.id, WorkerStatus::Stopped, 4, t0())
            .await
            .unwrap();

        let live = store.list_live(t0() - Duration::minutes(5)).await.unwrap();
        let ids: Vec<&str> = live.iter().map(|w| w.id.as_str()).collect();
        assert_eq!(ids, vec!["fresh"]);

        let stopped = store.get_worker(&stopped.id).await.unwrap().unwrap();
        assert_eq!(stopped.jobs_processed, 4);
    }

    #[tokio::test]
    async fn config_round_trips() {
        let store = InMemoryStore::new();
        assert_eq!(store.get_config("max_retries").await.unwrap(), None);

        store.set_config("max_retries", "5").await.unwrap();
        assert_eq!(
            store.get_config("max_retries").await.unwrap().as_deref(),
            Some("5")
        );
        assert_eq!(store.list_config().await.unwrap().len(), 1);
    }
}
