//! Enqueue request.

use serde::{Deserialize, Serialize};

use super::errors::{QueueError, Result};

/// What a client submits. `id` and `max_retries` are optional; missing values
/// are filled in at enqueue time (generated id, configured default).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub command: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

impl JobSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            id: None,
            command: command.into(),
            max_retries: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Reject malformed requests before anything touches the store.
    pub fn validate(&self) -> Result<()> {
        if self.command.trim().is_empty() {
            return Err(QueueError::Validation("command is required".into()));
        }
        if let Some(id) = &self.id
            && id.trim().is_empty()
        {
            return Err(QueueError::Validation("id must not be blank".into()));
        }
        if self.max_retries == Some(0) {
            return Err(QueueError::Validation(
                "max_retries must be a positive integer".into(),
            ));
        }
        Ok(())
    }
}
