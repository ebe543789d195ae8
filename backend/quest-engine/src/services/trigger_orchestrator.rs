use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;

use crate::{
    models::{
        course::CourseStatus,
        events::{attempt_submission, course_expiry, quest_expiry, TriggerEvent},
        job::{Job, JobEnvelope},
        quest::{QuestAttempt, QuestStatus},
        CourseId, QuestId,
    },
    queue::JobQueue,
    store::QuestStore,
};

/// Jobs an event fans out to. Course expiry also expires the course's quests,
/// which `TriggerOrchestrator::dispatch` handles separately.
pub fn jobs_for(event: &TriggerEvent) -> Vec<Job> {
    match *event {
        TriggerEvent::AttemptSubmitted {
            attempt_id,
            student_id,
        } => vec![
            Job::ScoreAttempt { attempt_id },
            Job::AwardFirstAttempt { attempt_id },
            Job::UpdateCognitiveProfile { student_id },
            Job::GenerateFeedback { attempt_id },
        ],
        TriggerEvent::QuestExpired { quest_id } => vec![
            Job::AwardExpert { quest_id },
            Job::AwardSpeedster { quest_id },
        ],
        TriggerEvent::CourseExpired { course_id } => vec![
            Job::AwardCompletionist { course_id },
            Job::AwardTutorialAttendance { course_id },
        ],
        TriggerEvent::FeedbackMissing { attempt_id } => vec![Job::GenerateFeedback { attempt_id }],
    }
}

/// Turns observed transitions into queued jobs. Enqueueing never undoes the
/// transition; the jobs run later on a worker.
#[derive(Clone)]
pub struct TriggerOrchestrator {
    store: Arc<dyn QuestStore>,
    queue: Arc<dyn JobQueue>,
}

impl TriggerOrchestrator {
    pub fn new(store: Arc<dyn QuestStore>, queue: Arc<dyn JobQueue>) -> Self {
        Self { store, queue }
    }

    pub async fn enqueue(&self, job: Job) -> Result<()> {
        let envelope = JobEnvelope::new(job);
        tracing::debug!(job = job.name(), job_id = %envelope.id, "Enqueueing job");
        self.queue.push(envelope).await
    }

    /// Enqueues every job for the event and returns them in enqueue order.
    pub async fn dispatch(&self, event: TriggerEvent) -> Result<Vec<Job>> {
        let mut jobs = Vec::new();

        if let TriggerEvent::CourseExpired { course_id } = event {
            let expired = self
                .store
                .expire_quests_in_course(course_id, Utc::now())
                .await?;
            tracing::info!(
                course_id,
                quests = expired.len(),
                "Course expired, cascading to its active quests"
            );
            for quest_id in expired {
                jobs.extend(jobs_for(&TriggerEvent::QuestExpired { quest_id }));
            }
        }
        jobs.extend(jobs_for(&event));

        for job in &jobs {
            self.enqueue(*job).await?;
        }
        tracing::info!(?event, jobs = jobs.len(), "Trigger dispatched");
        Ok(jobs)
    }

    /// Call after persisting an attempt, with the stored snapshot from before
    /// the save. Saving an already submitted attempt that still has no
    /// feedback queues feedback generation again.
    pub async fn attempt_saved(
        &self,
        before: &QuestAttempt,
        after: &QuestAttempt,
    ) -> Result<Vec<Job>> {
        if let Some(event) = attempt_submission(before, after)? {
            return self.dispatch(event).await;
        }
        if after.submitted && !self.store.has_feedback(after.id).await? {
            return self
                .dispatch(TriggerEvent::FeedbackMissing {
                    attempt_id: after.id,
                })
                .await;
        }
        Ok(Vec::new())
    }

    pub async fn quest_status_changed(
        &self,
        quest_id: QuestId,
        before: QuestStatus,
        after: QuestStatus,
    ) -> Result<Vec<Job>> {
        match quest_expiry(quest_id, before, after) {
            Some(event) => self.dispatch(event).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn course_status_changed(
        &self,
        course_id: CourseId,
        before: CourseStatus,
        after: CourseStatus,
    ) -> Result<Vec<Job>> {
        match course_expiry(course_id, before, after) {
            Some(event) => self.dispatch(event).await,
            None => Ok(Vec::new()),
        }
    }
}
