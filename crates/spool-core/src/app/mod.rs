//! App - アプリケーション層
//!
//! Combines the ports into the queue's behaviour.
//!
//! # 主要コンポーネント
//! - **AppBuilder / App**: wiring and the shared context
//! - **QueueService**: enqueue, inspection, DLQ, config
//! - **LeaseManager**: the three-class claim protocol
//! - **RetryScheduler**: outcome → completed / failed + backoff / dead
//! - **WorkerRuntime**: poll loop + heartbeat for one worker
//! - **FleetManager**: start/stop N workers, liveness query

pub mod builder;
pub mod fleet;
pub mod lease;
pub mod queue;
pub mod retry;
pub mod settings;
pub mod status;
pub mod worker_loop;

pub use self::builder::{App, AppBuilder, BuildError};
pub use self::fleet::FleetManager;
pub use self::lease::LeaseManager;
pub use self::queue::QueueService;
pub use self::retry::RetryScheduler;
pub use self::settings::WorkerSettings;
pub use self::status::QueueStatus;
pub use self::worker_loop::{WorkerHandle, WorkerRuntime};
