//! WorkerRegistry port - ワーカーの生存情報
//!
//! Each runtime writes only its own row; everyone may read all rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Result, WorkerId, WorkerRecord, WorkerStatus};

#[async_trait]
pub trait WorkerRegistry: Send + Sync {
    /// Create (or replace) the record for a starting runtime.
    async fn register(&self, worker: &WorkerRecord) -> Result<()>;

    /// Refresh `last_heartbeat` and `jobs_processed`.
    async fn heartbeat(&self, id: &WorkerId, at: DateTime<Utc>, jobs_processed: u64) -> Result<()>;

    /// Record a lifecycle change along with the current counter.
    async fn set_status(
        &self,
        id: &WorkerId,
        status: WorkerStatus,
        jobs_processed: u64,
        at: DateTime<Utc>,
    ) -> Result<()>;

    async fn get_worker(&self, id: &WorkerId) -> Result<Option<WorkerRecord>>;

    /// Every record, most recently started first.
    async fn list_workers(&self) -> Result<Vec<WorkerRecord>>;

    /// Active or stopping workers with a heartbeat at or after `since`.
    async fn list_live(&self, since: DateTime<Utc>) -> Result<Vec<WorkerRecord>>;
}
