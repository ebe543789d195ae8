use std::collections::VecDeque;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use super::JobQueue;
use crate::models::job::{Job, JobEnvelope};

#[derive(Default)]
pub struct InMemoryJobQueue {
    jobs: Mutex<VecDeque<JobEnvelope>>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs still waiting, oldest first.
    pub async fn pending(&self) -> Vec<Job> {
        self.jobs
            .lock()
            .await
            .iter()
            .map(|envelope| envelope.job)
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn push(&self, envelope: JobEnvelope) -> Result<()> {
        self.jobs.lock().await.push_back(envelope);
        Ok(())
    }

    async fn pop(&self) -> Result<Option<JobEnvelope>> {
        Ok(self.jobs.lock().await.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn jobs_come_out_in_push_order() {
        let queue = InMemoryJobQueue::new();
        queue
            .push(JobEnvelope::new(Job::ScoreAttempt { attempt_id: 1 }))
            .await
            .unwrap();
        queue
            .push(JobEnvelope::new(Job::AwardExpert { quest_id: 2 }))
            .await
            .unwrap();

        assert_eq!(queue.len().await, 2);
        assert_eq!(
            queue.pop().await.unwrap().map(|envelope| envelope.job),
            Some(Job::ScoreAttempt { attempt_id: 1 })
        );
        assert_eq!(
            queue.pop().await.unwrap().map(|envelope| envelope.job),
            Some(Job::AwardExpert { quest_id: 2 })
        );
        assert!(queue.pop().await.unwrap().is_none());
    }
}
