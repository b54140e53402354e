//! LeaseManager - claim protocol
//!
//! `acquire` walks the three claim classes in priority order and tries each
//! candidate with one conditional write. The first write whose guard holds
//! wins the job; a lost guard means another worker got there first, so we move
//! on to the next candidate and never retry the same row.

use tracing::{debug, info, warn};

use crate::app::App;
use crate::domain::{Job, JobId, JobState, QueueError, Result, Transition, WorkerId};
use crate::ports::{ClaimClass, Guard};

pub struct LeaseManager {
    app: App,
}

impl LeaseManager {
    pub fn new(app: App) -> Self {
        Self { app }
    }

    /// Claim the next eligible job for `worker_id`, or `None` if nothing is
    /// claimable right now. Store errors propagate; lost races do not.
    pub async fn acquire(&self, worker_id: &WorkerId) -> Result<Option<Job>> {
        let now = self.app.clock.now();
        let stale_before = now - self.app.settings.stale_lease_delta();
        let limit = self.app.settings.candidates_per_class;

        for class in ClaimClass::IN_PRIORITY_ORDER {
            let candidates = self
                .app
                .jobs
                .claim_candidates(class, now, stale_before, limit)
                .await?;

            for candidate in candidates {
                let guard = match class {
                    ClaimClass::Pending => Guard::Unleased {
                        state: JobState::Pending,
                    },
                    ClaimClass::RetryDue => Guard::Unleased {
                        state: JobState::Failed,
                    },
                    ClaimClass::StaleLease => Guard::snapshot_of(&candidate),
                };
                let next = match candidate.apply(Transition::Lease {
                    holder: worker_id.clone(),
                    at: now,
                }) {
                    Ok(next) => next,
                    Err(e) => {
                        debug!(job_id = %candidate.id, error = %e, "skipping unclaimable candidate");
                        continue;
                    }
                };

                match self
                    .app
                    .jobs
                    .conditional_update(&candidate.id, &next, &guard)
                    .await?
                {
                    Some(leased) => {
                        if class == ClaimClass::StaleLease {
                            warn!(
                                worker_id = %worker_id,
                                job_id = %leased.id,
                                previous_holder = ?candidate.lease_holder,
                                "reclaimed stale lease"
                            );
                        } else {
                            debug!(worker_id = %worker_id, job_id = %leased.id, ?class, "leased job");
                        }
                        return Ok(Some(leased));
                    }
                    None => {
                        debug!(worker_id = %worker_id, job_id = %candidate.id, ?class, "lost claim race");
                    }
                }
            }
        }

        Ok(None)
    }

    /// Give up whatever lease `job_id` carries. A processing job goes back to
    /// `pending` with its attempt count untouched; an unleased job is returned
    /// as is.
    pub async fn release(&self, job_id: &JobId) -> Result<Job> {
        let job = self
            .app
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| QueueError::job_not_found(job_id))?;

        let Some(guard) = Guard::lease_of(&job) else {
            return Ok(job);
        };
        let next = job.apply(Transition::Release {
            at: self.app.clock.now(),
        })?;

        match self.app.jobs.conditional_update(job_id, &next, &guard).await? {
            Some(released) => {
                info!(job_id = %job_id, previous_holder = ?job.lease_holder, "released lease");
                Ok(released)
            }
            None => Err(QueueError::Conflict(format!(
                "lease on job {job_id} changed while releasing"
            ))),
        }
    }
}
