use std::time::Instant;

use anyhow::Result;
use tracing::Instrument;

use super::{
    badge_service::BadgeService, cognitive_profile::CognitiveProfileService,
    feedback_service::FeedbackService, points_ledger::PointsLedgerUpdater,
    trigger_orchestrator::TriggerOrchestrator,
};
use crate::{
    metrics::record_job,
    models::job::{Job, JobEnvelope, JobReport},
};

/// Runs one job against the engine services.
pub struct JobRunner {
    ledger: PointsLedgerUpdater,
    badges: BadgeService,
    profiles: CognitiveProfileService,
    feedback: FeedbackService,
    orchestrator: TriggerOrchestrator,
}

impl JobRunner {
    pub fn new(
        ledger: PointsLedgerUpdater,
        badges: BadgeService,
        profiles: CognitiveProfileService,
        feedback: FeedbackService,
        orchestrator: TriggerOrchestrator,
    ) -> Self {
        Self {
            ledger,
            badges,
            profiles,
            feedback,
            orchestrator,
        }
    }

    pub async fn execute(&self, job: Job) -> Result<JobReport> {
        match job {
            Job::ScoreAttempt { attempt_id } => {
                let report = self.ledger.score_and_credit(attempt_id).await?;
                // Perfectionist reads the committed total, so it waits for scoring
                if report.is_completed() {
                    self.orchestrator
                        .enqueue(Job::AwardPerfectionist { attempt_id })
                        .await?;
                }
                Ok(report)
            }
            Job::AwardFirstAttempt { attempt_id } => self.badges.award_first_attempt(attempt_id).await,
            Job::AwardPerfectionist { attempt_id } => {
                self.badges.award_perfectionist(attempt_id).await
            }
            Job::GenerateFeedback { attempt_id } => {
                self.feedback.generate_for_attempt(attempt_id).await
            }
            Job::UpdateCognitiveProfile { student_id } => self.profiles.recompute(student_id).await,
            Job::AwardSpeedster { quest_id } => self.badges.award_speedster(quest_id).await,
            Job::AwardExpert { quest_id } => self.badges.award_expert(quest_id).await,
            Job::AwardCompletionist { course_id } => {
                self.badges.award_completionist(course_id).await
            }
            Job::AwardTutorialAttendance { course_id } => {
                self.badges.award_tutorial_attendance(course_id).await
            }
        }
    }

    /// Executes a queued job with logging and metrics. Errors are terminal
    /// for this run and come back to the caller.
    pub async fn process(&self, envelope: JobEnvelope) -> Result<JobReport> {
        let job = envelope.job;
        let span = tracing::info_span!("job", job = job.name(), job_id = %envelope.id);

        async move {
            let started = Instant::now();
            let result = self.execute(job).await;
            let seconds = started.elapsed().as_secs_f64();

            match &result {
                Ok(report) => {
                    record_job(job.name(), report.status_label(), seconds);
                    match report {
                        JobReport::Completed(message) => tracing::info!("{}", message),
                        JobReport::Skipped(message) => tracing::info!(skipped = true, "{}", message),
                    }
                }
                Err(err) => {
                    record_job(job.name(), "failed", seconds);
                    tracing::error!(error = %err, "Job failed");
                }
            }
            result
        }
        .instrument(span)
        .await
    }
}
