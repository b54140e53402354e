//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! There is no global store: every component receives an [`App`], a cheap
//! clonable bundle of `Arc` handles to the ports plus the worker settings.
//! `build()` validates everything up front (fail-fast) so a misconfigured
//! fleet never starts.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::app::{FleetManager, LeaseManager, QueueService, RetryScheduler, WorkerSettings};
use crate::domain::{Decider, DefaultDecider};
use crate::impls::ShellRunner;
use crate::ports::{
    Clock, CommandRunner, ConfigStore, IdGenerator, JobStore, SystemClock, UlidGenerator,
    WorkerRegistry,
};

/// Builds an [`App`].
///
/// # 使用例
/// ```ignore
/// let store = Arc::new(SqliteStore::open("spool.db")?);
/// let app = AppBuilder::new()
///     .with_store(store)
///     .with_settings(WorkerSettings::default())
///     .build()?;
/// ```
pub struct AppBuilder {
    jobs: Option<Arc<dyn JobStore>>,
    workers: Option<Arc<dyn WorkerRegistry>>,
    config: Option<Arc<dyn ConfigStore>>,
    runner: Option<Arc<dyn CommandRunner>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    decider: Option<Arc<dyn Decider>>,
    settings: WorkerSettings,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum BuildError {
    #[error("no {0} configured; call with_store() or the matching with_* method")]
    MissingPort(&'static str),

    #[error("invalid worker settings: {0}")]
    InvalidSettings(String),
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            jobs: None,
            workers: None,
            config: None,
            runner: None,
            clock: None,
            ids: None,
            decider: None,
            settings: WorkerSettings::default(),
        }
    }

    /// Use one backend for jobs, the worker registry and config.
    pub fn with_store<S>(mut self, store: Arc<S>) -> Self
    where
        S: JobStore + WorkerRegistry + ConfigStore + 'static,
    {
        self.jobs = Some(store.clone());
        self.workers = Some(store.clone());
        self.config = Some(store);
        self
    }

    pub fn with_job_store(mut self, jobs: Arc<dyn JobStore>) -> Self {
        self.jobs = Some(jobs);
        self
    }

    pub fn with_worker_registry(mut self, workers: Arc<dyn WorkerRegistry>) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn with_config_store(mut self, config: Arc<dyn ConfigStore>) -> Self {
        self.config = Some(config);
        self
    }

    /// Defaults to [`ShellRunner`].
    pub fn with_runner<R: CommandRunner + 'static>(mut self, runner: Arc<R>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Defaults to [`SystemClock`].
    pub fn with_clock<C: Clock + 'static>(mut self, clock: Arc<C>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Defaults to ULIDs stamped by the app clock.
    pub fn with_id_generator<G: IdGenerator + 'static>(mut self, ids: Arc<G>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Defaults to [`DefaultDecider`].
    pub fn with_decider<D: Decider + 'static>(mut self, decider: Arc<D>) -> Self {
        self.decider = Some(decider);
        self
    }

    pub fn with_settings(mut self, settings: WorkerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// # 検証
    /// - all three store ports are present
    /// - worker settings pass [`WorkerSettings::check`]
    pub fn build(self) -> Result<App, BuildError> {
        let jobs = self.jobs.ok_or(BuildError::MissingPort("job store"))?;
        let workers = self
            .workers
            .ok_or(BuildError::MissingPort("worker registry"))?;
        let config = self.config.ok_or(BuildError::MissingPort("config store"))?;
        self.settings.check().map_err(BuildError::InvalidSettings)?;

        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));

        Ok(App {
            jobs,
            workers,
            config,
            runner: self.runner.unwrap_or_else(|| Arc::new(ShellRunner::new())),
            clock,
            ids,
            decider: self.decider.unwrap_or_else(|| Arc::new(DefaultDecider)),
            settings: self.settings,
        })
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared application context. Cloning is cheap.
#[derive(Clone)]
pub struct App {
    pub(crate) jobs: Arc<dyn JobStore>,
    pub(crate) workers: Arc<dyn WorkerRegistry>,
    pub(crate) config: Arc<dyn ConfigStore>,
    pub(crate) runner: Arc<dyn CommandRunner>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) decider: Arc<dyn Decider>,
    pub(crate) settings: WorkerSettings,
}

impl App {
    pub fn queue(&self) -> QueueService {
        QueueService::new(self.clone())
    }

    pub fn lease_manager(&self) -> LeaseManager {
        LeaseManager::new(self.clone())
    }

    pub fn retry_scheduler(&self) -> RetryScheduler {
        RetryScheduler::new(self.clone())
    }

    pub fn fleet(&self) -> FleetManager {
        FleetManager::new(self.clone())
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
