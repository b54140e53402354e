//! Worker registry record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::WorkerId;
use super::state::WorkerStatus;

/// One row of the worker registry. Written only by the runtime it describes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub id: WorkerId,
    pub status: WorkerStatus,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub jobs_processed: u64,
}

impl WorkerRecord {
    pub fn new(id: WorkerId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            status: WorkerStatus::Active,
            started_at: now,
            last_heartbeat: now,
            jobs_processed: 0,
        }
    }

    /// Live = still running (or draining) and heard from since `since`.
    pub fn is_live(&self, since: DateTime<Utc>) -> bool {
        self.status.is_live() && self.last_heartbeat >= since
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn liveness_needs_status_and_fresh_heartbeat() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut w = WorkerRecord::new(WorkerId::new("w1"), now);

        assert!(w.is_live(now - Duration::minutes(5)));
        assert!(!w.is_live(now + Duration::seconds(1)));

        w.status = WorkerStatus::Stopping;
        assert!(w.is_live(now));

        w.status = WorkerStatus::Stopped;
        assert!(!w.is_live(now));
    }
}
