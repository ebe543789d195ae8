use std::{sync::Arc, time::Duration};

use mongodb::Client as MongoClient;
use redis::aio::ConnectionManager;

use crate::{
    config::Config,
    queue::{JobQueue, RedisJobQueue},
    store::{MongoStore, QuestStore},
    utils::locks::SubjectLocks,
};

pub mod badge_service;
pub mod cognitive_profile;
pub mod expiry_worker;
pub mod feedback_service;
pub mod job_runner;
pub mod job_worker;
pub mod points_ledger;
pub mod score_calculator;
pub mod trigger_orchestrator;

use self::{
    badge_service::BadgeService, cognitive_profile::CognitiveProfileService,
    expiry_worker::ExpiryWorker, feedback_service::FeedbackClient,
    feedback_service::FeedbackService, job_runner::JobRunner, job_worker::JobWorker,
    points_ledger::PointsLedgerUpdater, trigger_orchestrator::TriggerOrchestrator,
};

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn QuestStore>,
    pub queue: Arc<dyn JobQueue>,
    pub orchestrator: TriggerOrchestrator,
    locks: SubjectLocks,
}

impl AppState {
    /// Production wiring: MongoDB store and Redis queue.
    pub async fn new(
        config: Config,
        mongo_client: MongoClient,
        redis_client: redis::Client,
    ) -> anyhow::Result<Self> {
        let store = MongoStore::new(mongo_client, &config.mongo_database);
        store.ensure_indexes().await?;
        store.seed_badge_catalog().await?;

        tracing::info!("Attempting to connect to Redis...");

        let redis = tokio::time::timeout(
            Duration::from_secs(30),
            ConnectionManager::new(redis_client),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

        tracing::info!("Redis ConnectionManager created, testing with PING...");

        let mut conn = redis.clone();
        tokio::time::timeout(
            Duration::from_secs(5),
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

        tracing::info!("Redis connection established successfully");

        let queue = RedisJobQueue::new(redis, config.worker.queue_key.clone());
        Ok(Self::with_backends(config, Arc::new(store), Arc::new(queue)))
    }

    pub fn with_backends(
        config: Config,
        store: Arc<dyn QuestStore>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        let orchestrator = TriggerOrchestrator::new(store.clone(), queue.clone());
        Self {
            config,
            store,
            queue,
            orchestrator,
            locks: SubjectLocks::new(),
        }
    }

    pub fn job_runner(&self) -> anyhow::Result<JobRunner> {
        let client = FeedbackClient::new(&self.config.feedback)?;
        Ok(JobRunner::new(
            PointsLedgerUpdater::new(self.store.clone()),
            BadgeService::new(self.store.clone()),
            CognitiveProfileService::new(self.store.clone(), self.locks.clone()),
            FeedbackService::new(self.store.clone(), client),
            self.orchestrator.clone(),
        ))
    }

    pub fn job_worker(&self) -> anyhow::Result<JobWorker> {
        Ok(JobWorker::new(
            self.queue.clone(),
            Arc::new(self.job_runner()?),
            &self.config.worker,
        ))
    }

    pub fn expiry_worker(&self) -> ExpiryWorker {
        ExpiryWorker::new(
            self.store.clone(),
            self.orchestrator.clone(),
            Duration::from_secs(self.config.worker.expiry_sweep_secs),
        )
    }
}
