//! Status - ステータスクエリ

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::app::App;
use crate::domain::{QueueStats, Result, WorkerRecord};

/// Point-in-time view of the queue: job counts plus the live workers.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub at: DateTime<Utc>,
    pub jobs: QueueStats,
    pub active_workers: Vec<WorkerRecord>,
}

impl QueueStatus {
    pub async fn collect(app: &App) -> Result<Self> {
        let jobs = app.queue().stats().await?;
        let active_workers = app.fleet().list_active_workers().await?;
        Ok(Self {
            at: app.now(),
            jobs,
            active_workers,
        })
    }
}
