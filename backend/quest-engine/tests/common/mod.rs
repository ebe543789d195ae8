#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use eduquest_engine::{
    config::{Config, FeedbackSettings},
    models::{
        cognitive::BloomLevel,
        course::{Course, CourseGroup, CourseStatus, Enrollment, Student},
        job::Job,
        quest::{Answer, AnswerAttempt, Quest, QuestAttempt, QuestStatus, QuestType, Question},
        AnswerAttemptId, AttemptId, CourseGroupId, CourseId, EnrollmentId, QuestId, QuestionId,
        StudentId,
    },
    queue::InMemoryJobQueue,
    services::{job_runner::JobRunner, job_worker::JobWorker, AppState},
    store::InMemoryStore,
};

/// Nothing listens here, so feedback calls fail fast with a transport error.
pub const UNREACHABLE_FEEDBACK_URL: &str = "http://127.0.0.1:9";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// In-memory engine with seeding helpers. Each test builds its own.
pub struct Fixture {
    pub store: Arc<InMemoryStore>,
    pub queue: Arc<InMemoryJobQueue>,
    pub state: AppState,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_feedback_url(UNREACHABLE_FEEDBACK_URL)
    }

    pub fn with_feedback_url(url: &str) -> Self {
        Self::with_feedback(FeedbackSettings {
            url: url.to_string(),
            timeout_secs: 2,
            max_attempts: 1,
            backoff_ms: 10,
        })
    }

    pub fn with_feedback(feedback: FeedbackSettings) -> Self {
        init_tracing();
        let config = Config {
            feedback,
            ..Config::default()
        };
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(InMemoryJobQueue::new());
        let state = AppState::with_backends(config, store.clone(), queue.clone());
        Self {
            store,
            queue,
            state,
        }
    }

    pub fn runner(&self) -> JobRunner {
        self.state.job_runner().expect("job runner")
    }

    pub fn worker(&self) -> JobWorker {
        self.state.job_worker().expect("job worker")
    }

    /// Runs every queued job, including follow-ups, to completion.
    pub async fn drain(&self) -> usize {
        self.worker().drain().await.expect("drain queue")
    }

    pub async fn student(&self, id: StudentId) {
        self.store
            .insert_student(Student {
                id,
                username: format!("student{}", id),
                total_points: 0.0,
            })
            .await;
    }

    pub async fn course(&self, id: CourseId) {
        self.store
            .insert_course(Course {
                id,
                name: format!("Course {}", id),
                status: CourseStatus::Active,
            })
            .await;
    }

    pub async fn group(&self, id: CourseGroupId, course_id: CourseId) {
        self.store
            .insert_course_group(CourseGroup {
                id,
                course_id,
                name: format!("Group {}", id),
            })
            .await;
    }

    pub async fn enroll(&self, id: EnrollmentId, student_id: StudentId, group_id: CourseGroupId) {
        self.store
            .insert_enrollment(Enrollment {
                id,
                student_id,
                course_group_id: group_id,
                completed_on: None,
            })
            .await;
    }

    pub async fn quest(&self, id: QuestId, group_id: CourseGroupId, quest_type: QuestType) {
        self.store
            .insert_quest(Quest {
                id,
                course_group_id: group_id,
                name: format!("Quest {}", id),
                quest_type,
                status: QuestStatus::Active,
                tutorial_date: None,
                expiration_date: None,
            })
            .await;
    }

    pub async fn tutorial_quest(&self, id: QuestId, group_id: CourseGroupId) {
        self.store
            .insert_quest(Quest {
                id,
                course_group_id: group_id,
                name: format!("Tutorial {}", id),
                quest_type: QuestType::EduquestMcq,
                status: QuestStatus::Active,
                tutorial_date: Some(Utc::now() - Duration::days(7)),
                expiration_date: None,
            })
            .await;
    }

    /// Question whose answers get ids `id * 10 + index`.
    pub async fn question(
        &self,
        id: QuestionId,
        quest_id: QuestId,
        max_score: f64,
        correct: &[bool],
    ) -> Question {
        let question = Question {
            id,
            quest_id,
            number: id as u32,
            text: format!("Question {}", id),
            max_score,
            hint: Some("Think it through".to_string()),
            cognitive_level: Some(BloomLevel::Remember),
            topic: Some("General".to_string()),
            difficulty_score: Some(5.0),
            explanation: Some(format!("Explanation {}", id)),
            answers: correct
                .iter()
                .enumerate()
                .map(|(index, is_correct)| Answer {
                    id: id * 10 + index as i64,
                    text: format!("Option {}", index),
                    is_correct: *is_correct,
                    reason: None,
                })
                .collect(),
        };
        self.store.insert_question(question.clone()).await;
        question
    }

    pub async fn insert_question(&self, question: Question) {
        self.store.insert_question(question).await;
    }

    /// Unsubmitted attempt.
    pub async fn attempt(&self, id: AttemptId, student_id: StudentId, quest_id: QuestId) {
        self.store
            .insert_attempt(QuestAttempt::new(id, student_id, quest_id))
            .await;
    }

    /// Already submitted and scored attempt that took `millis` milliseconds.
    pub async fn scored_attempt(
        &self,
        id: AttemptId,
        student_id: StudentId,
        quest_id: QuestId,
        score: f64,
        millis: i64,
    ) {
        let start = Utc::now() - Duration::hours(1);
        let mut attempt = QuestAttempt::new(id, student_id, quest_id);
        attempt.submitted = true;
        attempt.total_score_achieved = score;
        attempt.first_attempted_at = Some(start);
        attempt.last_attempted_at = Some(start + Duration::milliseconds(millis));
        self.store.insert_attempt(attempt).await;
    }

    pub async fn answer(
        &self,
        id: AnswerAttemptId,
        attempt_id: AttemptId,
        question_id: QuestionId,
        answer_id: i64,
        is_correct: bool,
        hint_used: bool,
    ) {
        self.store
            .insert_answer_attempt(AnswerAttempt {
                id,
                quest_attempt_id: attempt_id,
                question_id,
                answer_id,
                is_selected: true,
                is_correct,
                hint_used,
                score_achieved: 0.0,
            })
            .await;
    }

    /// Marks the attempt submitted and fires the transition, the way the
    /// entity layer does after a save.
    pub async fn submit(&self, attempt_id: AttemptId) -> Vec<Job> {
        let before = self.store.attempt(attempt_id).await.expect("attempt exists");
        let mut after = before.clone();
        after.submitted = true;
        after.first_attempted_at.get_or_insert(Utc::now() - Duration::seconds(30));
        after.last_attempted_at = Some(Utc::now());
        self.store.replace_attempt(after.clone()).await;
        self.state
            .orchestrator
            .attempt_saved(&before, &after)
            .await
            .expect("dispatch submission")
    }

    pub async fn expire_quest(&self, quest_id: QuestId) -> Vec<Job> {
        let before = self
            .store
            .set_quest_status(quest_id, QuestStatus::Expired)
            .await
            .expect("quest exists");
        self.state
            .orchestrator
            .quest_status_changed(quest_id, before, QuestStatus::Expired)
            .await
            .expect("dispatch quest expiry")
    }

    pub async fn expire_course(&self, course_id: CourseId) -> Vec<Job> {
        let before = self
            .store
            .set_course_status(course_id, CourseStatus::Expired)
            .await
            .expect("course exists");
        self.state
            .orchestrator
            .course_status_changed(course_id, before, CourseStatus::Expired)
            .await
            .expect("dispatch course expiry")
    }

    pub async fn total_points(&self, student_id: StudentId) -> f64 {
        self.store
            .student(student_id)
            .await
            .expect("student exists")
            .total_points
    }
}
