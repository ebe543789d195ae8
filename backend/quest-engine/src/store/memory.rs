use std::collections::{BTreeMap, BTreeSet, HashSet};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{LedgerOutcome, QuestStore, ScoredAttempt};
use crate::models::{
    badge::{AwardOutcome, BadgeKind, CourseBadgeAward, QuestBadgeAward},
    cognitive::CognitiveProfile,
    course::{Course, CourseGroup, CourseStatus, Enrollment, Student},
    feedback::StudentFeedback,
    quest::{AnswerAttempt, Quest, QuestAttempt, QuestStatus, Question},
    AnswerAttemptId, AttemptId, CourseGroupId, CourseId, EnrollmentId, QuestId, QuestionId,
    StudentId,
};
use crate::services::points_ledger::marginal_credit;

#[derive(Default)]
struct MemoryState {
    students: BTreeMap<StudentId, Student>,
    courses: BTreeMap<CourseId, Course>,
    course_groups: BTreeMap<CourseGroupId, CourseGroup>,
    enrollments: BTreeMap<EnrollmentId, Enrollment>,
    quests: BTreeMap<QuestId, Quest>,
    questions: BTreeMap<QuestionId, Question>,
    attempts: BTreeMap<AttemptId, QuestAttempt>,
    answer_attempts: BTreeMap<AnswerAttemptId, AnswerAttempt>,
    badge_catalog: BTreeSet<BadgeKind>,
    quest_badges: BTreeMap<String, QuestBadgeAward>,
    course_badges: BTreeMap<String, CourseBadgeAward>,
    profiles: BTreeMap<StudentId, CognitiveProfile>,
    feedback: BTreeMap<AttemptId, StudentFeedback>,
}

/// Process-local store. One mutex guards all state, so every trait method is
/// atomic, including `commit_score`.
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Empty store with the full badge catalog.
    pub fn new() -> Self {
        let state = MemoryState {
            badge_catalog: BadgeKind::ALL.into_iter().collect(),
            ..MemoryState::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    pub async fn insert_student(&self, student: Student) {
        self.state.lock().await.students.insert(student.id, student);
    }

    pub async fn insert_course(&self, course: Course) {
        self.state.lock().await.courses.insert(course.id, course);
    }

    pub async fn insert_course_group(&self, group: CourseGroup) {
        self.state.lock().await.course_groups.insert(group.id, group);
    }

    pub async fn insert_enrollment(&self, enrollment: Enrollment) {
        self.state
            .lock()
            .await
            .enrollments
            .insert(enrollment.id, enrollment);
    }

    pub async fn insert_quest(&self, quest: Quest) {
        self.state.lock().await.quests.insert(quest.id, quest);
    }

    pub async fn insert_question(&self, question: Question) {
        self.state.lock().await.questions.insert(question.id, question);
    }

    pub async fn insert_attempt(&self, attempt: QuestAttempt) {
        self.state.lock().await.attempts.insert(attempt.id, attempt);
    }

    pub async fn insert_answer_attempt(&self, answer_attempt: AnswerAttempt) {
        self.state
            .lock()
            .await
            .answer_attempts
            .insert(answer_attempt.id, answer_attempt);
    }

    /// Saves an attempt and hands back the stored snapshot it replaced, so the
    /// caller can diff the two.
    pub async fn replace_attempt(&self, attempt: QuestAttempt) -> Option<QuestAttempt> {
        self.state.lock().await.attempts.insert(attempt.id, attempt)
    }

    /// Sets a quest's status and returns the previous one. Moving a quest from
    /// Active to Expired stamps its expiration date.
    pub async fn set_quest_status(
        &self,
        quest_id: QuestId,
        status: QuestStatus,
    ) -> Option<QuestStatus> {
        let mut state = self.state.lock().await;
        let quest = state.quests.get_mut(&quest_id)?;
        let previous = quest.status;
        if previous == QuestStatus::Active && status == QuestStatus::Expired {
            quest.expiration_date = Some(Utc::now());
        }
        quest.status = status;
        Some(previous)
    }

    pub async fn set_course_status(
        &self,
        course_id: CourseId,
        status: CourseStatus,
    ) -> Option<CourseStatus> {
        let mut state = self.state.lock().await;
        let course = state.courses.get_mut(&course_id)?;
        Some(std::mem::replace(&mut course.status, status))
    }

    pub async fn remove_badge(&self, badge: BadgeKind) {
        self.state.lock().await.badge_catalog.remove(&badge);
    }

    pub async fn student(&self, student_id: StudentId) -> Option<Student> {
        self.state.lock().await.students.get(&student_id).cloned()
    }

    pub async fn quest(&self, quest_id: QuestId) -> Option<Quest> {
        self.state.lock().await.quests.get(&quest_id).cloned()
    }

    pub async fn attempt(&self, attempt_id: AttemptId) -> Option<QuestAttempt> {
        self.state.lock().await.attempts.get(&attempt_id).cloned()
    }

    pub async fn answer_attempt(&self, answer_attempt_id: AnswerAttemptId) -> Option<AnswerAttempt> {
        self.state
            .lock()
            .await
            .answer_attempts
            .get(&answer_attempt_id)
            .cloned()
    }

    pub async fn enrollment(&self, enrollment_id: EnrollmentId) -> Option<Enrollment> {
        self.state.lock().await.enrollments.get(&enrollment_id).cloned()
    }

    pub async fn quest_badges(&self) -> Vec<QuestBadgeAward> {
        self.state.lock().await.quest_badges.values().cloned().collect()
    }

    pub async fn course_badges(&self) -> Vec<CourseBadgeAward> {
        self.state.lock().await.course_badges.values().cloned().collect()
    }

    pub async fn cognitive_profile(&self, student_id: StudentId) -> Option<CognitiveProfile> {
        self.state.lock().await.profiles.get(&student_id).cloned()
    }

    pub async fn feedback_for(&self, attempt_id: AttemptId) -> Option<StudentFeedback> {
        self.state.lock().await.feedback.get(&attempt_id).cloned()
    }
}

#[async_trait]
impl QuestStore for InMemoryStore {
    async fn get_student(&self, student_id: StudentId) -> Result<Option<Student>> {
        Ok(self.student(student_id).await)
    }

    async fn get_course(&self, course_id: CourseId) -> Result<Option<Course>> {
        Ok(self.state.lock().await.courses.get(&course_id).cloned())
    }

    async fn get_quest(&self, quest_id: QuestId) -> Result<Option<Quest>> {
        Ok(self.quest(quest_id).await)
    }

    async fn get_attempt(&self, attempt_id: AttemptId) -> Result<Option<QuestAttempt>> {
        Ok(self.attempt(attempt_id).await)
    }

    async fn questions_for_quest(&self, quest_id: QuestId) -> Result<Vec<Question>> {
        let state = self.state.lock().await;
        let mut questions: Vec<Question> = state
            .questions
            .values()
            .filter(|question| question.quest_id == quest_id)
            .cloned()
            .collect();
        questions.sort_by_key(|question| (question.number, question.id));
        Ok(questions)
    }

    async fn answer_attempts_for(&self, attempt_id: AttemptId) -> Result<Vec<AnswerAttempt>> {
        let state = self.state.lock().await;
        Ok(state
            .answer_attempts
            .values()
            .filter(|answer_attempt| answer_attempt.quest_attempt_id == attempt_id)
            .cloned()
            .collect())
    }

    async fn submitted_attempts_for_quest(&self, quest_id: QuestId) -> Result<Vec<QuestAttempt>> {
        let state = self.state.lock().await;
        Ok(state
            .attempts
            .values()
            .filter(|attempt| attempt.quest_id == quest_id && attempt.submitted)
            .cloned()
            .collect())
    }

    async fn submitted_attempts_for_student(
        &self,
        student_id: StudentId,
    ) -> Result<Vec<QuestAttempt>> {
        let state = self.state.lock().await;
        Ok(state
            .attempts
            .values()
            .filter(|attempt| attempt.student_id == student_id && attempt.submitted)
            .cloned()
            .collect())
    }

    async fn commit_score(&self, scored: &ScoredAttempt) -> Result<LedgerOutcome> {
        let mut state = self.state.lock().await;

        // validate everything before the first write so a failure leaves no trace
        if !state.attempts.contains_key(&scored.attempt_id) {
            return Err(anyhow!("quest attempt {} not found", scored.attempt_id));
        }
        if scored.credit_ledger && !state.students.contains_key(&scored.student_id) {
            return Err(anyhow!("student {} not found", scored.student_id));
        }

        // the attempt's own earlier total counts, so re-scoring never credits twice
        let prior_best = state
            .attempts
            .values()
            .filter(|attempt| {
                attempt.student_id == scored.student_id
                    && attempt.quest_id == scored.quest_id
                    && attempt.submitted
            })
            .map(|attempt| attempt.total_score_achieved)
            .fold(0.0_f64, f64::max);

        for (answer_attempt_id, score) in &scored.answer_scores {
            if let Some(answer_attempt) = state.answer_attempts.get_mut(answer_attempt_id) {
                answer_attempt.score_achieved = *score;
            }
        }
        if let Some(attempt) = state.attempts.get_mut(&scored.attempt_id) {
            attempt.total_score_achieved = scored.total_score;
        }

        if !scored.credit_ledger {
            return Ok(LedgerOutcome::NotEligible);
        }

        let points = marginal_credit(scored.total_score, prior_best);
        if points <= 0.0 {
            return Ok(LedgerOutcome::Unchanged { prior_best });
        }
        if let Some(student) = state.students.get_mut(&scored.student_id) {
            student.total_points += points;
        }
        Ok(LedgerOutcome::Credited { prior_best, points })
    }

    async fn award_quest_badge(&self, award: &QuestBadgeAward) -> Result<AwardOutcome> {
        let mut state = self.state.lock().await;
        if !state.badge_catalog.contains(&award.badge) {
            return Ok(AwardOutcome::BadgeMissing);
        }
        if state.quest_badges.contains_key(&award.award_key) {
            return Ok(AwardOutcome::AlreadyAwarded);
        }
        state
            .quest_badges
            .insert(award.award_key.clone(), award.clone());
        Ok(AwardOutcome::Awarded)
    }

    async fn award_course_badge(&self, award: &CourseBadgeAward) -> Result<AwardOutcome> {
        let mut state = self.state.lock().await;
        if !state.badge_catalog.contains(&award.badge) {
            return Ok(AwardOutcome::BadgeMissing);
        }
        if state.course_badges.contains_key(&award.award_key) {
            return Ok(AwardOutcome::AlreadyAwarded);
        }
        state
            .course_badges
            .insert(award.award_key.clone(), award.clone());
        Ok(AwardOutcome::Awarded)
    }

    async fn student_has_quest_badge(
        &self,
        student_id: StudentId,
        badge: BadgeKind,
    ) -> Result<bool> {
        let state = self.state.lock().await;
        Ok(state
            .quest_badges
            .values()
            .any(|award| award.student_id == student_id && award.badge == badge))
    }

    async fn enrollments_for_course(&self, course_id: CourseId) -> Result<Vec<Enrollment>> {
        let state = self.state.lock().await;
        Ok(state
            .enrollments
            .values()
            .filter(|enrollment| {
                state
                    .course_groups
                    .get(&enrollment.course_group_id)
                    .is_some_and(|group| group.course_id == course_id)
            })
            .cloned()
            .collect())
    }

    async fn quests_in_group(&self, course_group_id: CourseGroupId) -> Result<Vec<Quest>> {
        let state = self.state.lock().await;
        Ok(state
            .quests
            .values()
            .filter(|quest| quest.course_group_id == course_group_id)
            .cloned()
            .collect())
    }

    async fn submitted_quest_ids(
        &self,
        student_id: StudentId,
        quest_ids: &[QuestId],
    ) -> Result<HashSet<QuestId>> {
        let state = self.state.lock().await;
        Ok(state
            .attempts
            .values()
            .filter(|attempt| {
                attempt.student_id == student_id
                    && attempt.submitted
                    && quest_ids.contains(&attempt.quest_id)
            })
            .map(|attempt| attempt.quest_id)
            .collect())
    }

    async fn mark_enrollment_completed(
        &self,
        enrollment_id: EnrollmentId,
        completed_on: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let enrollment = state
            .enrollments
            .get_mut(&enrollment_id)
            .ok_or_else(|| anyhow!("enrollment {} not found", enrollment_id))?;
        enrollment.completed_on = Some(completed_on);
        Ok(())
    }

    async fn save_cognitive_profile(&self, profile: &CognitiveProfile) -> Result<()> {
        self.state
            .lock()
            .await
            .profiles
            .insert(profile.student_id, profile.clone());
        Ok(())
    }

    async fn upsert_feedback(&self, feedback: &StudentFeedback) -> Result<()> {
        self.state
            .lock()
            .await
            .feedback
            .insert(feedback.quest_attempt_id, feedback.clone());
        Ok(())
    }

    async fn has_feedback(&self, attempt_id: AttemptId) -> Result<bool> {
        Ok(self.state.lock().await.feedback.contains_key(&attempt_id))
    }

    async fn expire_quests_in_course(
        &self,
        course_id: CourseId,
        at: DateTime<Utc>,
    ) -> Result<Vec<QuestId>> {
        let mut state = self.state.lock().await;
        let group_ids: HashSet<CourseGroupId> = state
            .course_groups
            .values()
            .filter(|group| group.course_id == course_id)
            .map(|group| group.id)
            .collect();

        let mut expired = Vec::new();
        for quest in state.quests.values_mut() {
            if group_ids.contains(&quest.course_group_id) && quest.status == QuestStatus::Active {
                quest.status = QuestStatus::Expired;
                quest.expiration_date = Some(at);
                expired.push(quest.id);
            }
        }
        Ok(expired)
    }

    async fn expire_due_quests(&self, now: DateTime<Utc>) -> Result<Vec<QuestId>> {
        let mut state = self.state.lock().await;
        let mut expired = Vec::new();
        for quest in state.quests.values_mut() {
            let due = quest.expiration_date.is_some_and(|date| date < now);
            if due && quest.status == QuestStatus::Active {
                quest.status = QuestStatus::Expired;
                quest.expiration_date = Some(now);
                expired.push(quest.id);
            }
        }
        Ok(expired)
    }
}
