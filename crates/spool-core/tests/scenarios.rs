mod common;

use chrono::Duration;
use rstest::rstest;

use common::{Backend, Harness, HarnessBuilder, RecordingRunner, t0};
use spool_core::domain::{ErrorKind, Job, JobId, JobSpec, JobState, WorkerId};
use spool_core::ports::{Clock, CommandRunner};

/// One worker iteration without the background loop: claim, run, resolve.
async fn step(h: &Harness) -> Option<Job> {
    let worker = WorkerId::new("stepper");
    let job = h.app.lease_manager().acquire(&worker).await.unwrap()?;
    let outcome = h
        .runner
        .run(&job.command, h.app.settings().execution_timeout)
        .await;
    h.app.retry_scheduler().resolve(&job, &outcome).await.unwrap()
}

#[rstest]
#[case::memory(Backend::Memory)]
#[case::sqlite(Backend::Sqlite)]
#[tokio::test]
async fn failing_job_backs_off_then_dies(#[case] backend: Backend) {
    let h = HarnessBuilder::new(backend)
        .fixed_clock()
        .runner(RecordingRunner::failing())
        .build();
    let clock = h.clock.clone().unwrap();
    let queue = h.app.queue();
    queue.set_config("backoff_base", "2").await.unwrap();
    queue
        .enqueue(JobSpec::new("flaky").with_id("flaky").with_max_retries(2))
        .await
        .unwrap();

    let first = step(&h).await.unwrap();
    assert_eq!(first.state, JobState::Failed);
    assert_eq!(first.attempts, 1);
    assert_eq!(first.next_retry_at, Some(t0() + Duration::seconds(2)));
    assert_eq!(first.error_message.as_deref(), Some("flaky failed"));
    assert!(first.lease_holder.is_none());

    // not due yet
    clock.advance(Duration::seconds(1));
    assert!(step(&h).await.is_none());

    clock.advance(Duration::seconds(1));
    let second = step(&h).await.unwrap();
    assert_eq!(second.state, JobState::Dead);
    assert_eq!(second.attempts, 2);
    assert!(second.next_retry_at.is_none());

    assert_eq!(h.runner.runs_of("flaky"), 2);
    assert_eq!(queue.list_dlq().await.unwrap().len(), 1);
}

#[rstest]
#[case::base_2(2.0, &[2, 4, 8])]
#[case::base_3(3.0, &[3, 9, 27])]
#[tokio::test]
async fn kth_failure_waits_base_to_the_k(#[case] base: f64, #[case] expected_secs: &[i64]) {
    let h = HarnessBuilder::new(Backend::Memory)
        .fixed_clock()
        .runner(RecordingRunner::failing())
        .build();
    let clock = h.clock.clone().unwrap();
    let queue = h.app.queue();
    queue
        .set_config("backoff_base", &base.to_string())
        .await
        .unwrap();
    queue
        .enqueue(JobSpec::new("flaky").with_max_retries(10))
        .await
        .unwrap();

    for (k, secs) in expected_secs.iter().enumerate() {
        let now = clock.now();
        let failed = step(&h).await.unwrap();
        assert_eq!(failed.attempts as usize, k + 1);
        assert_eq!(failed.next_retry_at, Some(now + Duration::seconds(*secs)));
        clock.advance(Duration::seconds(*secs));
    }
}

#[rstest]
#[case::memory(Backend::Memory)]
#[case::sqlite(Backend::Sqlite)]
#[tokio::test]
async fn succeeding_job_runs_once(#[case] backend: Backend) {
    let h = HarnessBuilder::new(backend).fixed_clock().build();
    let job = h
        .app
        .queue()
        .enqueue(JobSpec::new("echo ok"))
        .await
        .unwrap();
    assert_eq!(job.max_retries, 3);

    let done = step(&h).await.unwrap();
    assert_eq!(done.state, JobState::Completed);
    assert_eq!(done.attempts, 0);
    assert_eq!(done.completed_at, Some(t0()));
    assert!(step(&h).await.is_none());
    assert_eq!(h.runner.runs_of("echo ok"), 1);
}

#[rstest]
#[case::memory(Backend::Memory)]
#[case::sqlite(Backend::Sqlite)]
#[tokio::test]
async fn dead_job_round_trips_through_the_dlq(#[case] backend: Backend) {
    let h = HarnessBuilder::new(backend)
        .fixed_clock()
        .runner(RecordingRunner::failing())
        .build();
    let queue = h.app.queue();
    queue
        .enqueue(JobSpec::new("doomed").with_id("doomed").with_max_retries(1))
        .await
        .unwrap();
    let dead = step(&h).await.unwrap();
    assert_eq!(dead.state, JobState::Dead);

    let revived = queue.retry_dlq_job(&dead.id).await.unwrap();
    assert_eq!(revived.state, JobState::Pending);
    assert_eq!(revived.attempts, 0);
    assert!(revived.error_message.is_none());
    assert!(revived.next_retry_at.is_none());
    assert!(revived.is_consistent());

    // a second retry is no longer valid and changes nothing
    let err = queue.retry_dlq_job(&dead.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(queue.get_job(&dead.id).await.unwrap().unwrap(), revived);

    // the revived job is claimable again
    let again = step(&h).await.unwrap();
    assert_eq!(again.id, JobId::new("doomed"));
}

#[rstest]
#[case::memory(Backend::Memory)]
#[case::sqlite(Backend::Sqlite)]
#[tokio::test]
async fn ids_are_unique_keys(#[case] backend: Backend) {
    let h = HarnessBuilder::new(backend).build();
    let queue = h.app.queue();
    queue.enqueue(JobSpec::new("a").with_id("x")).await.unwrap();
    queue.enqueue(JobSpec::new("b").with_id("y")).await.unwrap();

    let err = queue
        .enqueue(JobSpec::new("c").with_id("x"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.pending, 2);
    assert_eq!(stats.total, 2);
    assert_eq!(
        queue.get_job(&JobId::new("x")).await.unwrap().unwrap().command,
        "a"
    );
}

#[rstest]
#[case::memory(Backend::Memory)]
#[case::sqlite(Backend::Sqlite)]
#[tokio::test]
async fn release_puts_a_leased_job_back(#[case] backend: Backend) {
    let h = HarnessBuilder::new(backend).fixed_clock().build();
    let queue = h.app.queue();
    let job = queue.enqueue(JobSpec::new("held")).await.unwrap();
    h.app
        .lease_manager()
        .acquire(&WorkerId::new("w"))
        .await
        .unwrap()
        .unwrap();

    let released = queue.release(&job.id).await.unwrap();
    assert_eq!(released.state, JobState::Pending);
    assert!(released.lease_holder.is_none());
    assert!(released.lease_at.is_none());

    let err = queue.release(&JobId::new("ghost")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
