//! RetryScheduler - 実行結果の反映
//!
//! Turns an execution outcome into the job's next state: `completed`,
//! `failed` with a backoff, or `dead`. Policy comes from the config store on
//! every call so operators can change it while workers run.

use tracing::{info, warn};

use crate::app::App;
use crate::domain::{Decision, Job, Outcome, QueueError, Result};
use crate::ports::{Guard, QueueConfig};

pub struct RetryScheduler {
    app: App,
}

impl RetryScheduler {
    pub fn new(app: App) -> Self {
        Self { app }
    }

    /// Record `outcome` for a job this worker holds the lease on.
    ///
    /// Returns `None` when the lease was lost while the command ran (the job
    /// was reclaimed as stale); the outcome is dropped in that case.
    pub async fn resolve(&self, job: &Job, outcome: &Outcome) -> Result<Option<Job>> {
        let guard = Guard::lease_of(job)
            .ok_or_else(|| QueueError::Conflict(format!("job {} is not leased", job.id)))?;

        let config = QueueConfig::load(self.app.config.as_ref()).await?;
        let decision = self
            .app
            .decider
            .decide(job, outcome, &config.retry_policy());
        let now = self.app.clock.now();
        let next = job.apply(decision.to_transition(outcome, now))?;

        let Some(stored) = self.app.jobs.conditional_update(&job.id, &next, &guard).await? else {
            warn!(
                job_id = %job.id,
                holder = ?job.lease_holder,
                "lease lost during execution; dropping outcome"
            );
            return Ok(None);
        };

        match decision {
            Decision::Complete => info!(job_id = %stored.id, "job completed"),
            Decision::Retry { delay, attempts } => info!(
                job_id = %stored.id,
                attempts,
                max_retries = stored.max_retries,
                delay_secs = delay.as_secs_f64(),
                error = stored.error_message.as_deref().unwrap_or_default(),
                "job failed; retry scheduled"
            ),
            Decision::MarkDead { attempts } => warn!(
                job_id = %stored.id,
                attempts,
                error = stored.error_message.as_deref().unwrap_or_default(),
                "job moved to dead letter queue"
            ),
        }
        Ok(Some(stored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::AppBuilder;
    use crate::domain::{JobId, JobState, Transition, WorkerId};
    use crate::impls::InMemoryStore;
    use crate::ports::{ConfigStore, FixedClock, JobStore};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    async fn leased_job(store: &InMemoryStore, max_retries: u32) -> Job {
        let job = Job::new(JobId::new("j"), "false", max_retries, t0());
        store.insert(&job).await.unwrap();
        let leased = job
            .apply(Transition::Lease {
                holder: WorkerId::new("w"),
                at: t0(),
            })
            .unwrap();
        store.update_unconditional(&leased.id, &leased).await.unwrap()
    }

    fn app(store: &Arc<InMemoryStore>) -> App {
        AppBuilder::new()
            .with_store(store.clone())
            .with_clock(Arc::new(FixedClock::new(t0())))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn success_completes_without_counting_an_attempt() {
        let store = Arc::new(InMemoryStore::new());
        let job = leased_job(&store, 3).await;

        let done = app(&store)
            .retry_scheduler()
            .resolve(&job, &Outcome::success())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.state, JobState::Completed);
        assert_eq!(done.attempts, 0);
        assert_eq!(done.completed_at, Some(t0()));
        assert!(done.lease_holder.is_none());
    }

    #[tokio::test]
    async fn failure_uses_backoff_base_from_config() {
        let store = Arc::new(InMemoryStore::new());
        store.set_config("backoff_base", "3").await.unwrap();
        let job = leased_job(&store, 3).await;

        let failed = app(&store)
            .retry_scheduler()
            .resolve(&job, &Outcome::failure("boom"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(failed.state, JobState::Failed);
        assert_eq!(failed.attempts, 1);
        assert_eq!(failed.next_retry_at, Some(t0() + Duration::seconds(3)));
        assert_eq!(failed.error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn last_failure_buries_the_job() {
        let store = Arc::new(InMemoryStore::new());
        let job = leased_job(&store, 1).await;

        let dead = app(&store)
            .retry_scheduler()
            .resolve(&job, &Outcome::failure("boom"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(dead.state, JobState::Dead);
        assert_eq!(dead.attempts, 1);
        assert!(dead.next_retry_at.is_none());
    }

    #[tokio::test]
    async fn lost_lease_drops_the_outcome() {
        let store = Arc::new(InMemoryStore::new());
        let job = leased_job(&store, 3).await;

        let reclaimed = job
            .apply(Transition::Lease {
                holder: WorkerId::new("other"),
                at: t0() + Duration::minutes(6),
            })
            .unwrap();
        store.update_unconditional(&job.id, &reclaimed).await.unwrap();

        let result = app(&store)
            .retry_scheduler()
            .resolve(&job, &Outcome::success())
            .await
            .unwrap();
        assert!(result.is_none());
        let stored = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.lease_holder, Some(WorkerId::new("other")));
    }
}
