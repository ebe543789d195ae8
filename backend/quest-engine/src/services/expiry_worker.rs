use std::{sync::Arc, time::Duration};

use anyhow::Result;
use chrono::Utc;
use tokio::time::sleep;
use tracing::{info, warn};

use super::trigger_orchestrator::TriggerOrchestrator;
use crate::{
    metrics::EXPIRY_SWEEPS_TOTAL,
    models::{events::TriggerEvent, QuestId},
    store::QuestStore,
};

/// Periodically expires quests whose expiration date has passed and fires
/// their quest-expired jobs.
pub struct ExpiryWorker {
    store: Arc<dyn QuestStore>,
    orchestrator: TriggerOrchestrator,
    interval: Duration,
}

impl ExpiryWorker {
    pub fn new(
        store: Arc<dyn QuestStore>,
        orchestrator: TriggerOrchestrator,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            orchestrator,
            interval,
        }
    }

    pub async fn run(&self) -> Result<()> {
        info!(
            "Starting quest expiry loop (interval {}s)",
            self.interval.as_secs()
        );

        loop {
            match self.run_once().await {
                Ok(expired) => {
                    EXPIRY_SWEEPS_TOTAL.with_label_values(&["success"]).inc();
                    if !expired.is_empty() {
                        info!(quests = ?expired, "Expired overdue quests");
                    }
                }
                Err(err) => {
                    EXPIRY_SWEEPS_TOTAL.with_label_values(&["error"]).inc();
                    warn!(error = %err, "Quest expiry sweep failed");
                }
            }

            sleep(self.interval).await;
        }
    }

    /// One sweep. Returns the quests this sweep moved to Expired.
    pub async fn run_once(&self) -> Result<Vec<QuestId>> {
        let expired = self.store.expire_due_quests(Utc::now()).await?;
        for quest_id in &expired {
            self.orchestrator
                .dispatch(TriggerEvent::QuestExpired {
                    quest_id: *quest_id,
                })
                .await?;
        }
        Ok(expired)
    }
}
