//! JobStore port - 全ワーカーが共有する正本（source of truth）
//!
//! Workers never talk to each other. They coordinate only through the store,
//! and only through conditional writes: every state change names the
//! [`Guard`] it expects to still hold, and the store applies the write iff the
//! guard matches the current row, atomically.
//!
//! # 設計原則
//! - No read lock is taken before a write; a stale read simply loses its guard.
//! - `conditional_update` returning `None` is normal contention, not an error.
//! - Implementations must make guard check + write a single atomic step, also
//!   across OS processes when the backend is shared (see `SqliteStore`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Job, JobId, JobState, QueueStats, Result, WorkerId};

/// Condition a row must satisfy for a conditional update to apply.
#[derive(Debug, Clone, PartialEq)]
pub enum Guard {
    /// Row is in `state` and nobody holds its lease.
    Unleased { state: JobState },

    /// Row still matches a snapshot of a (stale) processing lease.
    Snapshot {
        state: JobState,
        lease_holder: Option<WorkerId>,
        lease_at: Option<DateTime<Utc>>,
    },

    /// `holder` still holds the lease it acquired at `lease_at`.
    LeaseHeldBy {
        holder: WorkerId,
        lease_at: DateTime<Utc>,
    },
}

impl Guard {
    /// Snapshot guard for the row as it was just read.
    pub fn snapshot_of(job: &Job) -> Self {
        Guard::Snapshot {
            state: job.state,
            lease_holder: job.lease_holder.clone(),
            lease_at: job.lease_at,
        }
    }

    /// Lease-held guard for a job this worker leased. `None` when the job
    /// carries no lease.
    pub fn lease_of(job: &Job) -> Option<Self> {
        match (&job.lease_holder, job.lease_at) {
            (Some(holder), Some(lease_at)) => Some(Guard::LeaseHeldBy {
                holder: holder.clone(),
                lease_at,
            }),
            _ => None,
        }
    }

    /// Evaluate the guard against the current row. Backends that keep rows in
    /// memory use this directly; SQL backends express the same predicate in
    /// their `WHERE` clause.
    pub fn matches(&self, current: &Job) -> bool {
        match self {
            Guard::Unleased { state } => current.state == *state && current.lease_holder.is_none(),
            Guard::Snapshot {
                state,
                lease_holder,
                lease_at,
            } => {
                current.state == *state
                    && current.lease_holder == *lease_holder
                    && current.lease_at == *lease_at
            }
            Guard::LeaseHeldBy { holder, lease_at } => {
                current.state == JobState::Processing
                    && current.lease_holder.as_ref() == Some(holder)
                    && current.lease_at == Some(*lease_at)
            }
        }
    }
}

/// The three kinds of claimable job, in the order the lease manager tries
/// them. Each has its own query and its own guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimClass {
    /// Unleased `pending`, oldest `created_at` first.
    Pending,

    /// Unleased `failed` whose `next_retry_at <= now`, soonest first.
    RetryDue,

    /// `processing` whose `lease_at < stale_before`, oldest lease first.
    StaleLease,
}

impl ClaimClass {
    pub const IN_PRIORITY_ORDER: [ClaimClass; 3] =
        [ClaimClass::Pending, ClaimClass::RetryDue, ClaimClass::StaleLease];
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job. A duplicate id is a `Conflict`.
    async fn insert(&self, job: &Job) -> Result<()>;

    async fn get(&self, id: &JobId) -> Result<Option<Job>>;

    /// Jobs in `state` (all when `None`), newest `created_at` first.
    async fn list_by_state(&self, state: Option<JobState>) -> Result<Vec<Job>>;

    /// Up to `limit` candidates of one claim class, in that class's order.
    async fn claim_candidates(
        &self,
        class: ClaimClass,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Job>>;

    /// Replace the row with `next` iff `guard` holds against the current row.
    /// Returns the stored row, or `None` if the guard failed (or the row is
    /// gone).
    async fn conditional_update(&self, id: &JobId, next: &Job, guard: &Guard)
    -> Result<Option<Job>>;

    /// Replace the row with `next` unconditionally. `NotFound` if absent.
    async fn update_unconditional(&self, id: &JobId, next: &Job) -> Result<Job>;

    async fn count_by_state(&self) -> Result<QueueStats>;
}
