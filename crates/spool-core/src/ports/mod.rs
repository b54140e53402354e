//! Ports - 抽象化レイヤー
//!
//! Traits for everything the engine consumes from the outside world. Each has
//! an in-tree implementation under `impls`.
//!
//! # 設計原則
//! - The job store is the only shared state between workers.
//! - Config is read on use, never cached.
//! - Time and ids come from ports so tests can pin them.

pub mod clock;
pub mod command_runner;
pub mod config_store;
pub mod id_generator;
pub mod job_store;
pub mod worker_registry;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::command_runner::CommandRunner;
pub use self::config_store::{ConfigStore, QueueConfig};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::job_store::{ClaimClass, Guard, JobStore};
pub use self::worker_registry::WorkerRegistry;
