//! ConfigStore port - 運用中に変更できる設定
//!
//! A flat string map. [`QueueConfig`] is the typed view of the keys the queue
//! itself reads; it is rebuilt on every use so changes apply immediately.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::warn;

use crate::domain::{QueueError, Result, RetryPolicy};

pub const MAX_RETRIES_KEY: &str = "max_retries";
pub const BACKOFF_BASE_KEY: &str = "backoff_base";

#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get_config(&self, key: &str) -> Result<Option<String>>;

    async fn set_config(&self, key: &str, value: &str) -> Result<()>;

    async fn list_config(&self) -> Result<BTreeMap<String, String>>;
}

/// Typed view over the queue's own keys.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    pub max_retries: u32,
    pub backoff_base: f64,
}

impl QueueConfig {
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    /// Read the current values. Unset keys take their defaults; unparsable
    /// values are logged and replaced by the default.
    pub async fn load(store: &dyn ConfigStore) -> Result<Self> {
        let max_retries = match store.get_config(MAX_RETRIES_KEY).await? {
            Some(raw) => parse_max_retries(&raw).unwrap_or_else(|e| {
                warn!(key = MAX_RETRIES_KEY, value = %raw, error = %e, "ignoring invalid config value");
                Self::DEFAULT_MAX_RETRIES
            }),
            None => Self::DEFAULT_MAX_RETRIES,
        };
        let backoff_base = match store.get_config(BACKOFF_BASE_KEY).await? {
            Some(raw) => parse_backoff_base(&raw).unwrap_or_else(|e| {
                warn!(key = BACKOFF_BASE_KEY, value = %raw, error = %e, "ignoring invalid config value");
                RetryPolicy::DEFAULT_BACKOFF_BASE
            }),
            None => RetryPolicy::DEFAULT_BACKOFF_BASE,
        };
        Ok(Self {
            max_retries,
            backoff_base,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.backoff_base)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: Self::DEFAULT_MAX_RETRIES,
            backoff_base: RetryPolicy::DEFAULT_BACKOFF_BASE,
        }
    }
}

/// Validate a value for one of the queue's keys. Other keys pass through.
pub fn validate_config_value(key: &str, value: &str) -> Result<()> {
    match key {
        MAX_RETRIES_KEY => parse_max_retries(value).map(|_| ()),
        BACKOFF_BASE_KEY => parse_backoff_base(value).map(|_| ()),
        _ => Ok(()),
    }
}

fn parse_max_retries(raw: &str) -> Result<u32> {
    match raw.trim().parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(QueueError::Validation(format!(
            "{MAX_RETRIES_KEY} must be a positive integer, got {raw:?}"
        ))),
    }
}

fn parse_backoff_base(raw: &str) -> Result<f64> {
    match raw.trim().parse::<f64>() {
        Ok(b) if b.is_finite() && b >= 1.0 => Ok(b),
        _ => Err(QueueError::Validation(format!(
            "{BACKOFF_BASE_KEY} must be a number >= 1, got {raw:?}"
        ))),
    }
}
