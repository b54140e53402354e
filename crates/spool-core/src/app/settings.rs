//! Worker tunables.

use std::time::Duration;

use chrono::TimeDelta;

/// Timing knobs shared by every worker runtime an [`App`](super::App) starts.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSettings {
    /// Idle sleep between claim attempts when nothing is claimable.
    pub poll_interval: Duration,

    /// Heartbeat period. Must be shorter than `poll_interval`.
    pub heartbeat_interval: Duration,

    /// Hard limit on one command execution. Must be shorter than
    /// `stale_lease_threshold`, or a job still running gets reclaimed.
    pub execution_timeout: Duration,

    /// Lease age after which another worker may reclaim a processing job.
    pub stale_lease_threshold: Duration,

    /// A worker is listed as active while its last heartbeat is this recent.
    pub liveness_window: Duration,

    /// Delay between consecutive launches in `start_workers`.
    pub launch_stagger: Duration,

    /// Rows fetched per claim class per acquire attempt.
    pub candidates_per_class: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            heartbeat_interval: Duration::from_millis(500),
            execution_timeout: Duration::from_secs(60),
            stale_lease_threshold: Duration::from_secs(5 * 60),
            liveness_window: Duration::from_secs(5 * 60),
            launch_stagger: Duration::from_millis(100),
            candidates_per_class: 8,
        }
    }
}

impl WorkerSettings {
    pub fn with_poll_interval(mut self, d: Duration) -> Self {
        self.poll_interval = d;
        self
    }

    pub fn with_heartbeat_interval(mut self, d: Duration) -> Self {
        self.heartbeat_interval = d;
        self
    }

    pub fn with_execution_timeout(mut self, d: Duration) -> Self {
        self.execution_timeout = d;
        self
    }

    pub fn with_stale_lease_threshold(mut self, d: Duration) -> Self {
        self.stale_lease_threshold = d;
        self
    }

    pub fn with_liveness_window(mut self, d: Duration) -> Self {
        self.liveness_window = d;
        self
    }

    pub fn with_launch_stagger(mut self, d: Duration) -> Self {
        self.launch_stagger = d;
        self
    }

    pub fn with_candidates_per_class(mut self, n: usize) -> Self {
        self.candidates_per_class = n;
        self
    }

    /// Describe the first problem with these settings, if any.
    pub fn check(&self) -> Result<(), String> {
        let required = [
            ("poll_interval", self.poll_interval),
            ("heartbeat_interval", self.heartbeat_interval),
            ("execution_timeout", self.execution_timeout),
            ("stale_lease_threshold", self.stale_lease_threshold),
            ("liveness_window", self.liveness_window),
        ];
        if let Some((name, _)) = required.iter().find(|(_, d)| d.is_zero()) {
            return Err(format!("{name} must be greater than zero"));
        }
        if self.heartbeat_interval >= self.poll_interval {
            return Err(format!(
                "heartbeat_interval ({:?}) must be shorter than poll_interval ({:?})",
                self.heartbeat_interval, self.poll_interval
            ));
        }
        if self.execution_timeout >= self.stale_lease_threshold {
            return Err(format!(
                "execution_timeout ({:?}) must be shorter than stale_lease_threshold ({:?})",
                self.execution_timeout, self.stale_lease_threshold
            ));
        }
        if self.candidates_per_class == 0 {
            return Err("candidates_per_class must be at least 1".to_string());
        }
        Ok(())
    }

    pub(crate) fn stale_lease_delta(&self) -> TimeDelta {
        to_delta(self.stale_lease_threshold)
    }

    pub(crate) fn liveness_delta(&self) -> TimeDelta {
        to_delta(self.liveness_window)
    }
}

fn to_delta(d: Duration) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or(TimeDelta::MAX)
}
