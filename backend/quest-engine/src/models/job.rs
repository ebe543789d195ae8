use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AttemptId, CourseId, QuestId, StudentId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Job {
    ScoreAttempt { attempt_id: AttemptId },
    AwardFirstAttempt { attempt_id: AttemptId },
    AwardPerfectionist { attempt_id: AttemptId },
    GenerateFeedback { attempt_id: AttemptId },
    UpdateCognitiveProfile { student_id: StudentId },
    AwardSpeedster { quest_id: QuestId },
    AwardExpert { quest_id: QuestId },
    AwardCompletionist { course_id: CourseId },
    AwardTutorialAttendance { course_id: CourseId },
}

impl Job {
    /// Metric label and log name.
    pub fn name(&self) -> &'static str {
        match self {
            Job::ScoreAttempt { .. } => "score_attempt",
            Job::AwardFirstAttempt { .. } => "award_first_attempt",
            Job::AwardPerfectionist { .. } => "award_perfectionist",
            Job::GenerateFeedback { .. } => "generate_feedback",
            Job::UpdateCognitiveProfile { .. } => "update_cognitive_profile",
            Job::AwardSpeedster { .. } => "award_speedster",
            Job::AwardExpert { .. } => "award_expert",
            Job::AwardCompletionist { .. } => "award_completionist",
            Job::AwardTutorialAttendance { .. } => "award_tutorial_attendance",
        }
    }
}

/// Unit of work on the queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobEnvelope {
    pub id: Uuid,
    pub job: Job,
    pub enqueued_at: DateTime<Utc>,
}

impl JobEnvelope {
    pub fn new(job: Job) -> Self {
        Self {
            id: Uuid::new_v4(),
            job,
            enqueued_at: Utc::now(),
        }
    }
}

/// Result of one job run. Skips cover missing entities and ineligible
/// subjects; neither is an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobReport {
    Completed(String),
    Skipped(String),
}

impl JobReport {
    pub fn message(&self) -> &str {
        match self {
            JobReport::Completed(message) | JobReport::Skipped(message) => message,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, JobReport::Completed(_))
    }

    pub fn status_label(&self) -> &'static str {
        match self {
            JobReport::Completed(_) => "completed",
            JobReport::Skipped(_) => "skipped",
        }
    }
}
