//! spool-core
//!
//! Durable shell-job queue shared by many workers.
//!
//! Workers coordinate only through the job store: every claim, completion and
//! retry is a conditional write, so no two workers ever hold the same job at
//! once, even across processes sharing one SQLite file.
//!
//! # モジュール構成
//! - **domain**: ids, job record + state machine, outcomes, retry decisions, errors
//! - **ports**: JobStore, WorkerRegistry, ConfigStore, CommandRunner, Clock, IdGenerator
//! - **app**: AppBuilder, QueueService, LeaseManager, RetryScheduler, WorkerRuntime, FleetManager
//! - **impls**: InMemoryStore, SqliteStore, ShellRunner
//! - **observability**: tracing subscriber setup

pub mod app;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;

pub use app::{App, AppBuilder, FleetManager, QueueService, WorkerSettings};
pub use domain::{ErrorKind, Job, JobId, JobSpec, JobState, QueueError, Result, WorkerId};
