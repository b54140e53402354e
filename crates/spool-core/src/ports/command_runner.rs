//! CommandRunner port - コマンド実行サンドボックス
//!
//! Opaque "run with timeout, capture output" capability. Failures of any kind
//! (spawn error, non-zero exit, timeout) come back as a failed [`Outcome`],
//! never as an `Err`, so they always flow into the retry scheduler.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::Outcome;

#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str, timeout: Duration) -> Outcome;
}
