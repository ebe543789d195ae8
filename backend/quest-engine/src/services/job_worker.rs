use std::{sync::Arc, time::Duration};

use anyhow::Result;
use tokio::{
    sync::{watch, Semaphore},
    task::JoinSet,
    time::sleep,
};
use tracing::{info, warn};

use super::job_runner::JobRunner;
use crate::{config::WorkerSettings, queue::JobQueue};

/// Pulls jobs off the queue and runs up to `concurrency` of them at once.
pub struct JobWorker {
    queue: Arc<dyn JobQueue>,
    runner: Arc<JobRunner>,
    permits: Arc<Semaphore>,
    poll_interval: Duration,
}

impl JobWorker {
    pub fn new(queue: Arc<dyn JobQueue>, runner: Arc<JobRunner>, settings: &WorkerSettings) -> Self {
        Self {
            queue,
            runner,
            permits: Arc::new(Semaphore::new(settings.concurrency.max(1))),
            poll_interval: settings.poll_interval(),
        }
    }

    /// Runs until `shutdown` flips to true, then waits for in-flight jobs.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            concurrency = self.permits.available_permits(),
            poll_ms = self.poll_interval.as_millis() as u64,
            "Starting job worker loop"
        );

        let mut in_flight = JoinSet::new();
        loop {
            if *shutdown.borrow() {
                break;
            }

            // reap finished tasks so the set does not grow unbounded
            while in_flight.try_join_next().is_some() {}

            let permit = tokio::select! {
                permit = self.permits.clone().acquire_owned() => permit?,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            match self.queue.pop().await {
                Ok(Some(envelope)) => {
                    let runner = self.runner.clone();
                    in_flight.spawn(async move {
                        let _permit = permit;
                        // outcome is already logged and counted by the runner
                        let _ = runner.process(envelope).await;
                    });
                }
                Ok(None) => {
                    drop(permit);
                    if !self.idle(&mut shutdown).await {
                        break;
                    }
                }
                Err(err) => {
                    drop(permit);
                    warn!(error = %err, "Failed to pop job from queue");
                    if !self.idle(&mut shutdown).await {
                        break;
                    }
                }
            }
        }

        info!(in_flight = in_flight.len(), "Job worker stopping, waiting for running jobs");
        while in_flight.join_next().await.is_some() {}
        Ok(())
    }

    /// Waits one poll interval or until shutdown changes. False once the
    /// shutdown sender is gone.
    async fn idle(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = sleep(self.poll_interval) => true,
            changed = shutdown.changed() => changed.is_ok(),
        }
    }

    /// Runs queued jobs until the queue is empty, including jobs enqueued by
    /// the jobs themselves. Returns how many ran.
    pub async fn drain(&self) -> Result<usize> {
        let mut processed = 0;
        while let Some(envelope) = self.queue.pop().await? {
            let _ = self.runner.process(envelope).await;
            processed += 1;
        }
        Ok(processed)
    }
}
