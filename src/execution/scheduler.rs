//! Node scheduling strategy and the injectable wait scheduler

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Strategy for processing nodes during phase one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulingStrategy {
    /// One node at a time, in chain order
    #[default]
    Sequential,

    /// All nodes concurrently; one node's failure never cancels another
    Parallel,
}

/// Source of every wait the engine performs (retry and lock backoff)
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Waits on the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

#[async_trait]
impl Scheduler for TokioScheduler {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
