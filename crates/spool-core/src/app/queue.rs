//! QueueService - 外部向け API
//!
//! Synchronous request/response operations: enqueue, inspection, the dead
//! letter queue and config. Errors propagate to the caller with their kind.

use std::collections::BTreeMap;

use tracing::info;

use crate::app::App;
use crate::domain::{Job, JobId, JobSpec, JobState, QueueError, QueueStats, Result, Transition};
use crate::ports::config_store::validate_config_value;
use crate::ports::{Guard, QueueConfig};

pub struct QueueService {
    app: App,
}

impl QueueService {
    pub fn new(app: App) -> Self {
        Self { app }
    }

    /// Validate and insert a new `pending` job.
    ///
    /// A missing id is generated; a missing `max_retries` takes the current
    /// config value. A duplicate id is a `Conflict`.
    pub async fn enqueue(&self, spec: JobSpec) -> Result<Job> {
        spec.validate()?;

        let max_retries = match spec.max_retries {
            Some(n) => n,
            None => QueueConfig::load(self.app.config.as_ref()).await?.max_retries,
        };
        let id = match spec.id {
            Some(id) => JobId::new(id),
            None => self.app.ids.generate_job_id(),
        };

        let job = Job::new(id, spec.command, max_retries, self.app.clock.now());
        self.app.jobs.insert(&job).await?;
        info!(job_id = %job.id, max_retries, command = %job.command, "job enqueued");
        Ok(job)
    }

    pub async fn get_job(&self, id: &JobId) -> Result<Option<Job>> {
        self.app.jobs.get(id).await
    }

    /// Newest first; all states when `state` is `None`.
    pub async fn list_jobs(&self, state: Option<JobState>) -> Result<Vec<Job>> {
        self.app.jobs.list_by_state(state).await
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        self.app.jobs.count_by_state().await
    }

    pub async fn list_dlq(&self) -> Result<Vec<Job>> {
        self.app.jobs.list_by_state(Some(JobState::Dead)).await
    }

    /// Move a dead job back to `pending` with a fresh attempt budget.
    pub async fn retry_dlq_job(&self, id: &JobId) -> Result<Job> {
        let job = self
            .app
            .jobs
            .get(id)
            .await?
            .ok_or_else(|| QueueError::job_not_found(id))?;
        if job.state != JobState::Dead {
            return Err(QueueError::Conflict(format!(
                "job {id} is {}, only dead jobs can be retried",
                job.state
            )));
        }

        let next = job.apply(Transition::Revive {
            at: self.app.clock.now(),
        })?;
        let guard = Guard::Unleased {
            state: JobState::Dead,
        };
        let revived = self
            .app
            .jobs
            .conditional_update(id, &next, &guard)
            .await?
            .ok_or_else(|| QueueError::Conflict(format!("job {id} changed while retrying")))?;

        info!(job_id = %id, "dead job requeued");
        Ok(revived)
    }

    /// Give up the lease on `id`. See [`LeaseManager::release`](crate::app::LeaseManager::release).
    pub async fn release(&self, id: &JobId) -> Result<Job> {
        self.app.lease_manager().release(id).await
    }

    pub async fn get_config(&self, key: &str) -> Result<Option<String>> {
        self.app.config.get_config(key).await
    }

    /// Known keys are validated before anything is written.
    pub async fn set_config(&self, key: &str, value: &str) -> Result<()> {
        if key.trim().is_empty() {
            return Err(QueueError::Validation("config key must not be blank".into()));
        }
        validate_config_value(key, value)?;
        self.app.config.set_config(key, value).await?;
        info!(key, value, "config updated");
        Ok(())
    }

    pub async fn list_config(&self) -> Result<BTreeMap<String, String>> {
        self.app.config.list_config().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::AppBuilder;
    use crate::domain::{ErrorKind, Outcome, WorkerId};
    use crate::impls::InMemoryStore;
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};
    use rstest::rstest;
    use std::sync::Arc;

    fn app() -> App {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        AppBuilder::new()
            .with_store(Arc::new(InMemoryStore::new()))
            .with_clock(Arc::new(FixedClock::new(t0)))
            .build()
            .unwrap()
    }

    async fn bury(app: &App, id: &str) -> Job {
        let q = app.queue();
        q.enqueue(JobSpec::new("false").with_id(id).with_max_retries(1))
            .await
            .unwrap();
        let leased = app
            .lease_manager()
            .acquire(&WorkerId::new("w"))
            .await
            .unwrap()
            .unwrap();
        app.retry_scheduler()
            .resolve(&leased, &Outcome::failure("boom"))
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn enqueue_fills_defaults() {
        let app = app();
        let job = app.queue().enqueue(JobSpec::new("echo hi")).await.unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_retries, QueueConfig::DEFAULT_MAX_RETRIES);
        assert!(job.id.as_str().starts_with("job-"));
        assert!(job.is_consistent());
    }

    #[tokio::test]
    async fn enqueue_default_max_retries_follows_config() {
        let app = app();
        let q = app.queue();
        q.set_config("max_retries", "7").await.unwrap();
        let job = q.enqueue(JobSpec::new("echo hi")).await.unwrap();
        assert_eq!(job.max_retries, 7);
    }

    #[tokio::test]
    async fn duplicate_id_conflicts_and_distinct_ids_are_independent() {
        let app = app();
        let q = app.queue();
        q.enqueue(JobSpec::new("a").with_id("same")).await.unwrap();
        q.enqueue(JobSpec::new("b").with_id("other")).await.unwrap();

        let err = q.enqueue(JobSpec::new("c").with_id("same")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        let kept = q.get_job(&JobId::new("same")).await.unwrap().unwrap();
        assert_eq!(kept.command, "a");
        assert_eq!(q.stats().await.unwrap().total, 2);
    }

    #[rstest]
    #[case::blank_command(JobSpec::new("  "))]
    #[case::zero_retries(JobSpec::new("true").with_max_retries(0))]
    #[tokio::test]
    async fn invalid_spec_writes_nothing(#[case] spec: JobSpec) {
        let app = app();
        let err = app.queue().enqueue(spec).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(app.queue().stats().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn dlq_retry_round_trip() {
        let app = app();
        let dead = bury(&app, "d").await;
        assert_eq!(dead.state, JobState::Dead);

        let q = app.queue();
        assert_eq!(q.list_dlq().await.unwrap().len(), 1);

        let revived = q.retry_dlq_job(&dead.id).await.unwrap();
        assert_eq!(revived.state, JobState::Pending);
        assert_eq!(revived.attempts, 0);
        assert!(revived.error_message.is_none());
        assert!(revived.next_retry_at.is_none());
        assert!(q.list_dlq().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dlq_retry_of_live_job_conflicts_without_mutation() {
        let app = app();
        let q = app.queue();
        let job = q.enqueue(JobSpec::new("true")).await.unwrap();

        let err = q.retry_dlq_job(&job.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(q.get_job(&job.id).await.unwrap().unwrap(), job);

        let missing = q.retry_dlq_job(&JobId::new("ghost")).await.unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn set_config_validates_known_keys() {
        let app = app();
        let q = app.queue();
        let err = q.set_config("backoff_base", "0.5").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(q.get_config("backoff_base").await.unwrap(), None);

        q.set_config("team", "infra").await.unwrap();
        assert_eq!(q.list_config().await.unwrap().len(), 1);
    }
}
