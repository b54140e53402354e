use serde::{Deserialize, Serialize};

use super::state::JobState;

/// Job counts per state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub dead: usize,
    pub total: usize,
}

impl QueueStats {
    pub fn record(&mut self, state: JobState) {
        self.add(state, 1);
    }

    pub fn add(&mut self, state: JobState, n: usize) {
        match state {
            JobState::Pending => self.pending += n,
            JobState::Processing => self.processing += n,
            JobState::Completed => self.completed += n,
            JobState::Failed => self.failed += n,
            JobState::Dead => self.dead += n,
        }
        self.total += n;
    }

    pub fn get(&self, state: JobState) -> usize {
        match state {
            JobState::Pending => self.pending,
            JobState::Processing => self.processing,
            JobState::Completed => self.completed,
            JobState::Failed => self.failed,
            JobState::Dead => self.dead,
        }
    }
}
