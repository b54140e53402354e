#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use spool_core::app::{App, AppBuilder, WorkerSettings};
use spool_core::domain::Outcome;
use spool_core::impls::{InMemoryStore, SqliteStore};
use spool_core::ports::{CommandRunner, FixedClock};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

pub fn fast_settings() -> WorkerSettings {
    WorkerSettings::default()
        .with_poll_interval(Duration::from_millis(10))
        .with_heartbeat_interval(Duration::from_millis(5))
        .with_launch_stagger(Duration::from_millis(1))
}

#[derive(Debug, Clone, Copy)]
pub enum Backend {
    Memory,
    Sqlite,
}

/// Keeps the database directory alive for the duration of a test.
pub struct Harness {
    pub app: App,
    pub clock: Option<Arc<FixedClock>>,
    pub runner: Arc<RecordingRunner>,
    _dir: Option<TempDir>,
}

pub struct HarnessBuilder {
    backend: Backend,
    clock: Option<Arc<FixedClock>>,
    runner: RecordingRunner,
    settings: WorkerSettings,
}

impl HarnessBuilder {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            clock: None,
            runner: RecordingRunner::succeeding(),
            settings: fast_settings(),
        }
    }

    pub fn fixed_clock(mut self) -> Self {
        self.clock = Some(Arc::new(FixedClock::new(t0())));
        self
    }

    pub fn runner(mut self, runner: RecordingRunner) -> Self {
        self.runner = runner;
        self
    }

    pub fn build(self) -> Harness {
        let runner = Arc::new(self.runner);
        let mut builder = AppBuilder::new()
            .with_runner(runner.clone())
            .with_settings(self.settings);
        if let Some(clock) = &self.clock {
            builder = builder.with_clock(clock.clone());
        }
        let (builder, dir) = match self.backend {
            Backend::Memory => (builder.with_store(Arc::new(InMemoryStore::new())), None),
            Backend::Sqlite => {
                let dir = tempfile::tempdir().unwrap();
                let store = SqliteStore::open(dir.path().join("spool.db")).unwrap();
                (builder.with_store(Arc::new(store)), Some(dir))
            }
        };
        Harness {
            app: builder.build().unwrap(),
            clock: self.clock,
            runner,
            _dir: dir,
        }
    }
}

/// Command runner that records every execution and flags overlapping runs of
/// the same command.
pub struct RecordingRunner {
    fail: bool,
    delay: Duration,
    in_flight: Mutex<HashSet<String>>,
    runs: Mutex<HashMap<String, usize>>,
    overlaps: Mutex<Vec<String>>,
}

impl RecordingRunner {
    pub fn succeeding() -> Self {
        Self::new(false, Duration::ZERO)
    }

    pub fn failing() -> Self {
        Self::new(true, Duration::ZERO)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn new(fail: bool, delay: Duration) -> Self {
        Self {
            fail,
            delay,
            in_flight: Mutex::new(HashSet::new()),
            runs: Mutex::new(HashMap::new()),
            overlaps: Mutex::new(Vec::new()),
        }
    }

    pub fn runs_of(&self, command: &str) -> usize {
        self.runs.lock().unwrap().get(command).copied().unwrap_or(0)
    }

    pub fn total_runs(&self) -> usize {
        self.runs.lock().unwrap().values().sum()
    }

    pub fn overlaps(&self) -> Vec<String> {
        self.overlaps.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, command: &str, _timeout: Duration) -> Outcome {
        if !self.in_flight.lock().unwrap().insert(command.to_string()) {
            self.overlaps.lock().unwrap().push(command.to_string());
        }
        *self
            .runs
            .lock()
            .unwrap()
            .entry(command.to_string())
            .or_default() += 1;

        tokio::time::sleep(self.delay).await;

        self.in_flight.lock().unwrap().remove(command);
        if self.fail {
            Outcome::failure(format!("{command} failed"))
        } else {
            Outcome::success()
        }
    }
}

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check().await
}
