use anyhow::Result;
use async_trait::async_trait;

use crate::models::job::JobEnvelope;

pub mod memory;
pub mod redis_queue;

pub use self::memory::InMemoryJobQueue;
pub use self::redis_queue::RedisJobQueue;

/// FIFO work queue shared by producers and job workers. Delivery is
/// at-most-once: a popped job is gone even if its run fails.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn push(&self, envelope: JobEnvelope) -> Result<()>;

    /// Next job, or `None` when the queue is empty.
    async fn pop(&self) -> Result<Option<JobEnvelope>>;
}
