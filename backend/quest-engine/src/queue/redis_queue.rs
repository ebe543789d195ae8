use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;

use super::JobQueue;
use crate::models::job::JobEnvelope;

/// Redis list used as a queue: producers LPUSH, workers RPOP. RPOP does not
/// block, so the shared connection manager stays usable by other tasks.
#[derive(Clone)]
pub struct RedisJobQueue {
    redis: ConnectionManager,
    key: String,
}

impl RedisJobQueue {
    pub fn new(redis: ConnectionManager, key: impl Into<String>) -> Self {
        Self {
            redis,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn push(&self, envelope: JobEnvelope) -> Result<()> {
        let mut conn = self.redis.clone();
        let payload = serde_json::to_string(&envelope).context("Failed to serialize job")?;

        redis::cmd("LPUSH")
            .arg(&self.key)
            .arg(&payload)
            .query_async::<()>(&mut conn)
            .await
            .with_context(|| format!("Failed to push job onto {}", self.key))?;

        tracing::debug!(job = envelope.job.name(), job_id = %envelope.id, "Job enqueued");
        Ok(())
    }

    async fn pop(&self) -> Result<Option<JobEnvelope>> {
        let mut conn = self.redis.clone();

        let payload: Option<String> = redis::cmd("RPOP")
            .arg(&self.key)
            .query_async(&mut conn)
            .await
            .with_context(|| format!("Failed to pop job from {}", self.key))?;

        match payload {
            Some(json) => {
                let envelope: JobEnvelope =
                    serde_json::from_str(&json).context("Failed to deserialize job envelope")?;
                Ok(Some(envelope))
            }
            None => Ok(None),
        }
    }
}
