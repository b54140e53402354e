//! Job record and its state machine.
//!
//! Every change to a job's state goes through [`Job::apply`], which checks the
//! edge against [`JobState::can_transition_to`] and rewrites the dependent
//! fields together so the record invariants hold after every step:
//!
//! - `lease_holder`/`lease_at` are set iff `state == Processing`
//! - `next_retry_at` is set iff `state == Failed`
//! - `completed_at` is set iff `state == Completed`
//! - `attempts` never decreases, except on a DLQ retry which resets it to 0
//!
//! `apply` is pure: it returns the next version of the record and leaves
//! persisting it (under the right guard) to the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::{QueueError, Result};
use super::ids::{JobId, WorkerId};
use super::state::JobState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub command: String,
    pub state: JobState,
    pub attempts: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub lease_holder: Option<WorkerId>,
    pub lease_at: Option<DateTime<Utc>>,
}

/// A requested change to a job.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Hand the job to `holder` (fresh claim, due retry, or stale reclaim).
    Lease { holder: WorkerId, at: DateTime<Utc> },

    /// The command succeeded.
    Complete { at: DateTime<Utc> },

    /// The command failed and will be retried at `next_retry_at`.
    Fail {
        at: DateTime<Utc>,
        error: String,
        next_retry_at: DateTime<Utc>,
    },

    /// The command failed for the last time.
    Bury { at: DateTime<Utc>, error: String },

    /// Give up the lease without recording an attempt.
    Release { at: DateTime<Utc> },

    /// Move a dead job back to the queue with a fresh attempt budget.
    Revive { at: DateTime<Utc> },
}

impl Transition {
    pub fn target(&self) -> JobState {
        match self {
            Transition::Lease { .. } => JobState::Processing,
            Transition::Complete { .. } => JobState::Completed,
            Transition::Fail { .. } => JobState::Failed,
            Transition::Bury { .. } => JobState::Dead,
            Transition::Release { .. } | Transition::Revive { .. } => JobState::Pending,
        }
    }

    /// States this transition may start from.
    fn sources(&self) -> &'static [JobState] {
        match self {
            Transition::Lease { .. } => &[JobState::Pending, JobState::Failed, JobState::Processing],
            Transition::Complete { .. }
            | Transition::Fail { .. }
            | Transition::Bury { .. }
            | Transition::Release { .. } => &[JobState::Processing],
            Transition::Revive { .. } => &[JobState::Dead],
        }
    }

    fn at(&self) -> DateTime<Utc> {
        match self {
            Transition::Lease { at, .. }
            | Transition::Complete { at }
            | Transition::Fail { at, .. }
            | Transition::Bury { at, .. }
            | Transition::Release { at }
            | Transition::Revive { at } => *at,
        }
    }
}

impl Job {
    pub fn new(id: JobId, command: impl Into<String>, max_retries: u32, now: DateTime<Utc>) -> Self {
        Self {
            id,
            command: command.into(),
            state: JobState::Pending,
            attempts: 0,
            max_retries,
            created_at: now,
            updated_at: now,
            next_retry_at: None,
            error_message: None,
            completed_at: None,
            lease_holder: None,
            lease_at: None,
        }
    }

    /// Compute the next version of this job, or reject an illegal edge.
    pub fn apply(&self, transition: Transition) -> Result<Job> {
        let to = transition.target();
        if !transition.sources().contains(&self.state) || !self.state.can_transition_to(to) {
            return Err(QueueError::InvalidTransition {
                job_id: self.id.to_string(),
                from: self.state,
                to,
            });
        }

        let mut next = self.clone();
        next.state = to;
        next.updated_at = transition.at();
        next.lease_holder = None;
        next.lease_at = None;
        next.next_retry_at = None;
        next.completed_at = None;

        match transition {
            Transition::Lease { holder, at } => {
                next.lease_holder = Some(holder);
                next.lease_at = Some(at);
            }
            Transition::Complete { at } => {
                next.completed_at = Some(at);
                next.error_message = None;
            }
            Transition::Fail {
                error,
                next_retry_at,
                ..
            } => {
                next.attempts = self.attempts.saturating_add(1);
                next.error_message = Some(error);
                next.next_retry_at = Some(next_retry_at);
            }
            Transition::Bury { error, .. } => {
                next.attempts = self.attempts.saturating_add(1);
                next.error_message = Some(error);
            }
            Transition::Release { .. } => {}
            Transition::Revive { .. } => {
                next.attempts = 0;
                next.error_message = None;
            }
        }

        Ok(next)
    }

    pub fn is_leased(&self) -> bool {
        self.lease_holder.is_some()
    }

    /// Whether the lease on this job was taken strictly before `stale_before`.
    pub fn lease_is_stale(&self, stale_before: DateTime<Utc>) -> bool {
        self.state == JobState::Processing
            && self.lease_at.is_some_and(|at| at < stale_before)
    }

    /// Check the field/state invariants listed in the module docs.
    pub fn is_consistent(&self) -> bool {
        let processing = self.state == JobState::Processing;
        let failed = self.state == JobState::Failed;
        let completed = self.state == JobState::Completed;

        self.lease_holder.is_some() == processing
            && self.lease_at.is_some() == processing
            && self.next_retry_at.is_some() == failed
            && self.completed_at.is_some() == completed
            && self.max_retries > 0
    }
}
