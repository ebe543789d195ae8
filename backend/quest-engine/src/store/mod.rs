//! Storage seam for the engine. The entity store itself (users, courses,
//! quests, questions) is owned elsewhere; the engine only reads the records
//! listed here and writes scores, ledger points, badges, profiles and feedback.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    badge::{AwardOutcome, BadgeKind, CourseBadgeAward, QuestBadgeAward},
    cognitive::CognitiveProfile,
    course::{Course, Enrollment, Student},
    feedback::StudentFeedback,
    quest::{AnswerAttempt, Quest, QuestAttempt, Question},
    AnswerAttemptId, AttemptId, CourseGroupId, CourseId, EnrollmentId, QuestId, StudentId,
};

pub mod memory;
pub mod mongo;

pub use memory::InMemoryStore;
pub use mongo::MongoStore;

/// Everything the score commit writes, as one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredAttempt {
    pub attempt_id: AttemptId,
    pub student_id: StudentId,
    pub quest_id: QuestId,
    pub total_score: f64,
    pub answer_scores: Vec<(AnswerAttemptId, f64)>,
    /// False for private quests: the score is written, the ledger untouched.
    pub credit_ledger: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LedgerOutcome {
    NotEligible,
    Unchanged { prior_best: f64 },
    Credited { prior_best: f64, points: f64 },
}

#[async_trait]
pub trait QuestStore: Send + Sync {
    async fn get_student(&self, student_id: StudentId) -> Result<Option<Student>>;

    async fn get_course(&self, course_id: CourseId) -> Result<Option<Course>>;

    async fn get_quest(&self, quest_id: QuestId) -> Result<Option<Quest>>;

    async fn get_attempt(&self, attempt_id: AttemptId) -> Result<Option<QuestAttempt>>;

    /// Questions of a quest, ordered by question number.
    async fn questions_for_quest(&self, quest_id: QuestId) -> Result<Vec<Question>>;

    /// Answer attempts of a quest attempt, in insertion order.
    async fn answer_attempts_for(&self, attempt_id: AttemptId) -> Result<Vec<AnswerAttempt>>;

    /// Submitted attempts at a quest, by any student.
    async fn submitted_attempts_for_quest(&self, quest_id: QuestId) -> Result<Vec<QuestAttempt>>;

    async fn submitted_attempts_for_student(
        &self,
        student_id: StudentId,
    ) -> Result<Vec<QuestAttempt>>;

    /// Writes the answer scores and the attempt total and credits the marginal
    /// improvement over the student's prior best at the quest, all in one
    /// transaction. Prior best is read before the write and includes the
    /// attempt's own earlier total, so re-scoring is idempotent.
    async fn commit_score(&self, scored: &ScoredAttempt) -> Result<LedgerOutcome>;

    async fn award_quest_badge(&self, award: &QuestBadgeAward) -> Result<AwardOutcome>;

    async fn award_course_badge(&self, award: &CourseBadgeAward) -> Result<AwardOutcome>;

    async fn student_has_quest_badge(&self, student_id: StudentId, badge: BadgeKind)
        -> Result<bool>;

    async fn enrollments_for_course(&self, course_id: CourseId) -> Result<Vec<Enrollment>>;

    async fn quests_in_group(&self, course_group_id: CourseGroupId) -> Result<Vec<Quest>>;

    /// Subset of `quest_ids` the student has a submitted attempt for.
    async fn submitted_quest_ids(
        &self,
        student_id: StudentId,
        quest_ids: &[QuestId],
    ) -> Result<HashSet<QuestId>>;

    async fn mark_enrollment_completed(
        &self,
        enrollment_id: EnrollmentId,
        completed_on: DateTime<Utc>,
    ) -> Result<()>;

    async fn save_cognitive_profile(&self, profile: &CognitiveProfile) -> Result<()>;

    async fn upsert_feedback(&self, feedback: &StudentFeedback) -> Result<()>;

    /// Whether feedback is stored for the attempt.
    async fn has_feedback(&self, attempt_id: AttemptId) -> Result<bool>;

    /// Flips every Active quest of the course's groups to Expired and returns
    /// the ids that actually transitioned.
    async fn expire_quests_in_course(
        &self,
        course_id: CourseId,
        at: DateTime<Utc>,
    ) -> Result<Vec<QuestId>>;

    /// Flips Active quests whose expiration date is before `now` to Expired and
    /// returns the ids that actually transitioned.
    async fn expire_due_quests(&self, now: DateTime<Utc>) -> Result<Vec<QuestId>>;
}
