//! WorkerRuntime - タスク実行ループ
//!
//! One runtime = one worker identity = two tokio tasks:
//!
//! - the poll loop: acquire → run → resolve, one job at a time, idling for
//!   `poll_interval` when nothing is claimable
//! - the heartbeat: every `heartbeat_interval`, write `last_heartbeat` and
//!   `jobs_processed` to the registry
//!
//! They share only the processed counter (atomic) and the current job id
//! (mutex). Stopping is cooperative: the poll loop finishes its in-flight job
//! before it exits; the running command is never cancelled.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::app::{App, LeaseManager, RetryScheduler};
use crate::domain::{Job, JobId, Result, WorkerId, WorkerRecord, WorkerStatus};

/// A worker that has not been started yet.
pub struct WorkerRuntime {
    app: App,
    id: WorkerId,
}

impl WorkerRuntime {
    pub fn new(app: App, id: WorkerId) -> Self {
        Self { app, id }
    }

    /// Register the worker as `active` and spawn its poll loop and heartbeat.
    pub async fn start(self) -> Result<WorkerHandle> {
        let record = WorkerRecord::new(self.id.clone(), self.app.clock.now());
        self.app.workers.register(&record).await?;
        info!(worker_id = %self.id, "worker started");

        let jobs_processed = Arc::new(AtomicU64::new(0));
        let current_job = Arc::new(Mutex::new(None));
        let (stop_tx, stop_rx) = watch::channel(false);
        let (heartbeat_stop_tx, heartbeat_stop_rx) = watch::channel(false);

        let heartbeat = tokio::spawn(heartbeat_loop(
            self.app.clone(),
            self.id.clone(),
            Arc::clone(&jobs_processed),
            Arc::clone(&current_job),
            heartbeat_stop_rx,
        ));

        let poll_loop = PollLoop {
            leases: self.app.lease_manager(),
            retries: self.app.retry_scheduler(),
            app: self.app.clone(),
            id: self.id.clone(),
            jobs_processed: Arc::clone(&jobs_processed),
            current_job: Arc::clone(&current_job),
        };
        let poll = tokio::spawn(poll_loop.run(stop_rx));

        Ok(WorkerHandle {
            app: self.app,
            id: self.id,
            jobs_processed,
            current_job,
            stop_tx,
            heartbeat_stop_tx,
            poll,
            heartbeat,
        })
    }
}

/// Handle to a running worker.
/// - `request_stop()` で新しい lease の取得を止める
/// - `stop()` で in-flight job の完了まで待ってから `stopped` にする
pub struct WorkerHandle {
    app: App,
    id: WorkerId,
    jobs_processed: Arc<AtomicU64>,
    current_job: Arc<Mutex<Option<JobId>>>,
    stop_tx: watch::Sender<bool>,
    heartbeat_stop_tx: watch::Sender<bool>,
    poll: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    pub fn jobs_processed(&self) -> u64 {
        self.jobs_processed.load(Ordering::SeqCst)
    }

    pub async fn current_job(&self) -> Option<JobId> {
        self.current_job.lock().await.clone()
    }

    /// Stop taking new leases. Does not wait.
    pub fn request_stop(&self) {
        // receiver may already be gone if the loop panicked
        let _ = self.stop_tx.send(true);
    }

    /// Graceful stop: `stopping` → wait for the in-flight job → cancel the
    /// heartbeat → `stopped` with the final count.
    pub async fn stop(self) -> Result<()> {
        let now = self.app.clock.now();
        if let Err(e) = self
            .app
            .workers
            .set_status(&self.id, WorkerStatus::Stopping, self.jobs_processed(), now)
            .await
        {
            warn!(worker_id = %self.id, error = %e, "failed to mark worker stopping");
        }
        let in_flight = self.current_job().await;
        info!(worker_id = %self.id, current_job = ?in_flight, "worker stopping");

        self.request_stop();
        if let Err(e) = self.poll.await {
            error!(worker_id = %self.id, error = %e, "poll loop ended abnormally");
        }

        let _ = self.heartbeat_stop_tx.send(true);
        if let Err(e) = self.heartbeat.await {
            error!(worker_id = %self.id, error = %e, "heartbeat task ended abnormally");
        }

        let processed = self.jobs_processed.load(Ordering::SeqCst);
        self.app
            .workers
            .set_status(&self.id, WorkerStatus::Stopped, processed, self.app.clock.now())
            .await?;
        info!(worker_id = %self.id, jobs_processed = processed, "worker stopped");
        Ok(())
    }
}

struct PollLoop {
    app: App,
    id: WorkerId,
    leases: LeaseManager,
    retries: RetryScheduler,
    jobs_processed: Arc<AtomicU64>,
    current_job: Arc<Mutex<Option<JobId>>>,
}

impl PollLoop {
    async fn run(self, mut stop_rx: watch::Receiver<bool>) {
        loop {
            if *stop_rx.borrow() {
                break;
            }

            match self.leases.acquire(&self.id).await {
                Ok(Some(job)) => {
                    self.process(job).await;
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(worker_id = %self.id, error = %e, "claim failed; idling");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.app.settings.poll_interval) => {}
                changed = stop_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        debug!(worker_id = %self.id, "poll loop exited");
    }

    async fn process(&self, job: Job) {
        *self.current_job.lock().await = Some(job.id.clone());
        info!(
            worker_id = %self.id,
            job_id = %job.id,
            attempt = job.attempts + 1,
            command = %job.command,
            "executing job"
        );

        let outcome = self
            .app
            .runner
            .run(&job.command, self.app.settings.execution_timeout)
            .await;

        match self.retries.resolve(&job, &outcome).await {
            Ok(Some(_)) => {
                self.jobs_processed.fetch_add(1, Ordering::SeqCst);
            }
            Ok(None) => {}
            Err(e) => {
                // lease stays in place; the job becomes reclaimable once stale
                error!(worker_id = %self.id, job_id = %job.id, error = %e, "failed to record outcome");
            }
        }

        *self.current_job.lock().await = None;
    }
}

async fn heartbeat_loop(
    app: App,
    id: WorkerId,
    jobs_processed: Arc<AtomicU64>,
    current_job: Arc<Mutex<Option<JobId>>>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(app.settings.heartbeat_interval);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = stop_rx.changed() => break,
        }
        if *stop_rx.borrow() {
            break;
        }

        let processed = jobs_processed.load(Ordering::SeqCst);
        match app.workers.heartbeat(&id, app.clock.now(), processed).await {
            Ok(()) => {
                let current = current_job.lock().await.clone();
                debug!(worker_id = %id, jobs_processed = processed, current_job = ?current, "heartbeat");
            }
            Err(e) => warn!(worker_id = %id, error = %e, "heartbeat failed"),
        }
    }
}
