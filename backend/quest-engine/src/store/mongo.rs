use std::collections::HashSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{FutureExt, TryStreamExt};
use mongodb::{
    bson::{self, doc, Document},
    error::{ErrorKind, WriteFailure},
    Client, ClientSession, Collection, Database, IndexModel,
};

use super::{LedgerOutcome, QuestStore, ScoredAttempt};
use crate::metrics::track_store_operation;
use crate::models::{
    badge::{AwardOutcome, BadgeDefinition, BadgeKind, CourseBadgeAward, QuestBadgeAward},
    cognitive::CognitiveProfile,
    course::{Course, CourseGroup, Enrollment, Student},
    feedback::StudentFeedback,
    quest::{AnswerAttempt, Quest, QuestAttempt, QuestStatus, Question},
    AnswerAttemptId, AttemptId, CourseGroupId, CourseId, EnrollmentId, QuestId, StudentId,
};
use crate::services::points_ledger::marginal_credit;

const STUDENTS: &str = "students";
const COURSES: &str = "courses";
const COURSE_GROUPS: &str = "course_groups";
const ENROLLMENTS: &str = "enrollments";
const QUESTS: &str = "quests";
const QUESTIONS: &str = "questions";
const QUEST_ATTEMPTS: &str = "quest_attempts";
const ANSWER_ATTEMPTS: &str = "answer_attempts";
const BADGES: &str = "badges";
const QUEST_BADGE_AWARDS: &str = "quest_badge_awards";
const COURSE_BADGE_AWARDS: &str = "course_badge_awards";
const COGNITIVE_PROFILES: &str = "cognitive_profiles";
const STUDENT_FEEDBACK: &str = "student_feedback";

fn chrono_to_bson(value: DateTime<Utc>) -> bson::DateTime {
    bson::DateTime::from_millis(value.timestamp_millis())
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == 11000
    )
}

/// Raised inside the score transaction. Aborts it without a retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
enum ScoreCommitError {
    #[error("quest attempt {0} not found")]
    AttemptNotFound(AttemptId),
    #[error("student {0} not found")]
    StudentNotFound(StudentId),
}

fn score_commit_error(err: mongodb::error::Error) -> anyhow::Error {
    match err.get_custom::<ScoreCommitError>() {
        Some(missing) => anyhow::Error::new(missing.clone()),
        None => anyhow::Error::new(err).context("Failed to commit score transaction"),
    }
}

/// Filter and update pipeline writing every answer score in one statement.
fn answer_scores_update(scores: &[(AnswerAttemptId, f64)]) -> Option<(Document, Vec<Document>)> {
    if scores.is_empty() {
        return None;
    }
    let ids: Vec<AnswerAttemptId> = scores.iter().map(|(id, _)| *id).collect();
    let branches: Vec<Document> = scores
        .iter()
        .map(|(id, score)| doc! { "case": { "$eq": ["$_id", *id] }, "then": *score })
        .collect();
    Some((
        doc! { "_id": { "$in": ids } },
        vec![doc! { "$set": { "score_achieved": {
            "$switch": { "branches": branches, "default": "$score_achieved" }
        } } }],
    ))
}

fn expiry_update(at: DateTime<Utc>) -> Document {
    doc! { "$set": {
        "status": QuestStatus::Expired.as_str(),
        "expiration_date": chrono_to_bson(at),
    } }
}

/// MongoDB-backed store. `commit_score` uses a multi-document transaction,
/// so the deployment must be a replica set.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    db: Database,
}

impl MongoStore {
    pub fn new(client: Client, database: &str) -> Self {
        let db = client.database(database);
        Self { client, db }
    }

    fn students(&self) -> Collection<Student> {
        self.db.collection(STUDENTS)
    }

    fn questions(&self) -> Collection<Question> {
        self.db.collection(QUESTIONS)
    }

    fn quests(&self) -> Collection<Quest> {
        self.db.collection(QUESTS)
    }

    fn quest_attempts(&self) -> Collection<QuestAttempt> {
        self.db.collection(QUEST_ATTEMPTS)
    }

    fn answer_attempts(&self) -> Collection<AnswerAttempt> {
        self.db.collection(ANSWER_ATTEMPTS)
    }

    fn badges(&self) -> Collection<BadgeDefinition> {
        self.db.collection(BADGES)
    }

    pub async fn ensure_indexes(&self) -> Result<()> {
        self.questions()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "quest_id": 1, "number": 1 })
                    .build(),
            )
            .await
            .context("Failed to create questions index")?;

        self.quest_attempts()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "student_id": 1, "quest_id": 1, "submitted": 1 })
                    .build(),
            )
            .await
            .context("Failed to create quest_attempts student index")?;

        self.quest_attempts()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "quest_id": 1, "submitted": 1 })
                    .build(),
            )
            .await
            .context("Failed to create quest_attempts quest index")?;

        self.answer_attempts()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "quest_attempt_id": 1 })
                    .build(),
            )
            .await
            .context("Failed to create answer_attempts index")?;

        self.db
            .collection::<QuestBadgeAward>(QUEST_BADGE_AWARDS)
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "student_id": 1, "badge": 1 })
                    .build(),
            )
            .await
            .context("Failed to create quest_badge_awards index")?;

        tracing::info!("MongoDB indexes ensured");
        Ok(())
    }

    /// Inserts catalog entries that are not there yet; existing entries are
    /// left as the content layer wrote them.
    pub async fn seed_badge_catalog(&self) -> Result<()> {
        for kind in BadgeKind::ALL {
            let definition = BadgeDefinition::from(kind);
            let on_insert = bson::to_document(&definition)
                .context("Failed to serialize badge definition")?;
            self.badges()
                .update_one(doc! { "_id": kind.key() }, doc! { "$setOnInsert": on_insert })
                .upsert(true)
                .await
                .with_context(|| format!("Failed to seed badge {}", kind.key()))?;
        }
        Ok(())
    }

    async fn badge_exists(&self, badge: BadgeKind) -> Result<bool> {
        let found = self
            .badges()
            .find_one(doc! { "_id": badge.key() })
            .await
            .context("Failed to query badge catalog")?;
        Ok(found.is_some())
    }

    async fn commit_score_in(
        &self,
        session: &mut ClientSession,
        scored: &ScoredAttempt,
    ) -> mongodb::error::Result<LedgerOutcome> {
        // read before writing the new total: the attempt's own earlier total
        // counts as prior best, so re-scoring never credits twice
        let prior_best = if scored.credit_ledger {
            let best = self
                .quest_attempts()
                .find_one(doc! {
                    "student_id": scored.student_id,
                    "quest_id": scored.quest_id,
                    "submitted": true,
                })
                .sort(doc! { "total_score_achieved": -1 })
                .session(&mut *session)
                .await?;
            Some(
                best.map(|attempt| attempt.total_score_achieved.max(0.0))
                    .unwrap_or(0.0),
            )
        } else {
            None
        };

        if let Some((filter, pipeline)) = answer_scores_update(&scored.answer_scores) {
            self.answer_attempts()
                .update_many(filter, pipeline)
                .session(&mut *session)
                .await?;
        }

        let updated = self
            .quest_attempts()
            .update_one(
                doc! { "_id": scored.attempt_id },
                doc! { "$set": { "total_score_achieved": scored.total_score } },
            )
            .session(&mut *session)
            .await?;
        if updated.matched_count == 0 {
            return Err(mongodb::error::Error::custom(
                ScoreCommitError::AttemptNotFound(scored.attempt_id),
            ));
        }

        let Some(prior_best) = prior_best else {
            return Ok(LedgerOutcome::NotEligible);
        };

        let points = marginal_credit(scored.total_score, prior_best);
        if points <= 0.0 {
            return Ok(LedgerOutcome::Unchanged { prior_best });
        }

        let credited = self
            .students()
            .update_one(
                doc! { "_id": scored.student_id },
                doc! { "$inc": { "total_points": points } },
            )
            .session(&mut *session)
            .await?;
        if credited.matched_count == 0 {
            return Err(mongodb::error::Error::custom(
                ScoreCommitError::StudentNotFound(scored.student_id),
            ));
        }

        Ok(LedgerOutcome::Credited { prior_best, points })
    }

    async fn expire_quest(&self, quest_id: QuestId, at: DateTime<Utc>) -> Result<bool> {
        let result = self
            .quests()
            .update_one(
                doc! { "_id": quest_id, "status": QuestStatus::Active.as_str() },
                expiry_update(at),
            )
            .await
            .with_context(|| format!("Failed to expire quest {}", quest_id))?;
        Ok(result.modified_count == 1)
    }
}

#[async_trait]
impl QuestStore for MongoStore {
    async fn get_student(&self, student_id: StudentId) -> Result<Option<Student>> {
        self.students()
            .find_one(doc! { "_id": student_id })
            .await
            .context("Failed to query students collection")
    }

    async fn get_course(&self, course_id: CourseId) -> Result<Option<Course>> {
        self.db
            .collection::<Course>(COURSES)
            .find_one(doc! { "_id": course_id })
            .await
            .context("Failed to query courses collection")
    }

    async fn get_quest(&self, quest_id: QuestId) -> Result<Option<Quest>> {
        self.quests()
            .find_one(doc! { "_id": quest_id })
            .await
            .context("Failed to query quests collection")
    }

    async fn get_attempt(&self, attempt_id: AttemptId) -> Result<Option<QuestAttempt>> {
        self.quest_attempts()
            .find_one(doc! { "_id": attempt_id })
            .await
            .context("Failed to query quest_attempts collection")
    }

    async fn questions_for_quest(&self, quest_id: QuestId) -> Result<Vec<Question>> {
        self.questions()
            .find(doc! { "quest_id": quest_id })
            .sort(doc! { "number": 1, "_id": 1 })
            .await
            .context("Failed to query questions collection")?
            .try_collect()
            .await
            .context("Failed to read questions")
    }

    async fn answer_attempts_for(&self, attempt_id: AttemptId) -> Result<Vec<AnswerAttempt>> {
        self.answer_attempts()
            .find(doc! { "quest_attempt_id": attempt_id })
            .sort(doc! { "_id": 1 })
            .await
            .context("Failed to query answer_attempts collection")?
            .try_collect()
            .await
            .context("Failed to read answer attempts")
    }

    async fn submitted_attempts_for_quest(&self, quest_id: QuestId) -> Result<Vec<QuestAttempt>> {
        self.quest_attempts()
            .find(doc! { "quest_id": quest_id, "submitted": true })
            .sort(doc! { "_id": 1 })
            .await
            .context("Failed to query quest attempts by quest")?
            .try_collect()
            .await
            .context("Failed to read quest attempts")
    }

    async fn submitted_attempts_for_student(
        &self,
        student_id: StudentId,
    ) -> Result<Vec<QuestAttempt>> {
        self.quest_attempts()
            .find(doc! { "student_id": student_id, "submitted": true })
            .sort(doc! { "_id": 1 })
            .await
            .context("Failed to query quest attempts by student")?
            .try_collect()
            .await
            .context("Failed to read quest attempts")
    }

    async fn commit_score(&self, scored: &ScoredAttempt) -> Result<LedgerOutcome> {
        track_store_operation("commit_score", QUEST_ATTEMPTS, async {
            let mut session = self
                .client
                .start_session()
                .await
                .context("Failed to start MongoDB session")?;
            // transient errors rerun the whole callback, prior-best read included
            session
                .start_transaction()
                .and_run((self, scored), |session, (store, scored)| {
                    async move { store.commit_score_in(session, scored).await }.boxed()
                })
                .await
                .map_err(score_commit_error)
        })
        .await
    }

    async fn award_quest_badge(&self, award: &QuestBadgeAward) -> Result<AwardOutcome> {
        track_store_operation("award_badge", QUEST_BADGE_AWARDS, async {
            if !self.badge_exists(award.badge).await? {
                return Ok(AwardOutcome::BadgeMissing);
            }
            match self
                .db
                .collection::<QuestBadgeAward>(QUEST_BADGE_AWARDS)
                .insert_one(award)
                .await
            {
                Ok(_) => Ok(AwardOutcome::Awarded),
                Err(err) if is_duplicate_key(&err) => Ok(AwardOutcome::AlreadyAwarded),
                Err(err) => Err(anyhow::Error::new(err).context("Failed to insert quest badge")),
            }
        })
        .await
    }

    async fn award_course_badge(&self, award: &CourseBadgeAward) -> Result<AwardOutcome> {
        track_store_operation("award_badge", COURSE_BADGE_AWARDS, async {
            if !self.badge_exists(award.badge).await? {
                return Ok(AwardOutcome::BadgeMissing);
            }
            match self
                .db
                .collection::<CourseBadgeAward>(COURSE_BADGE_AWARDS)
                .insert_one(award)
                .await
            {
                Ok(_) => Ok(AwardOutcome::Awarded),
                Err(err) if is_duplicate_key(&err) => Ok(AwardOutcome::AlreadyAwarded),
                Err(err) => Err(anyhow::Error::new(err).context("Failed to insert course badge")),
            }
        })
        .await
    }

    async fn student_has_quest_badge(
        &self,
        student_id: StudentId,
        badge: BadgeKind,
    ) -> Result<bool> {
        let found = self
            .db
            .collection::<QuestBadgeAward>(QUEST_BADGE_AWARDS)
            .find_one(doc! { "student_id": student_id, "badge": badge.key() })
            .await
            .context("Failed to query quest badge awards")?;
        Ok(found.is_some())
    }

    async fn enrollments_for_course(&self, course_id: CourseId) -> Result<Vec<Enrollment>> {
        let groups: Vec<CourseGroup> = self
            .db
            .collection::<CourseGroup>(COURSE_GROUPS)
            .find(doc! { "course_id": course_id })
            .await
            .context("Failed to query course groups")?
            .try_collect()
            .await
            .context("Failed to read course groups")?;
        let group_ids: Vec<CourseGroupId> = groups.iter().map(|group| group.id).collect();

        self.db
            .collection::<Enrollment>(ENROLLMENTS)
            .find(doc! { "course_group_id": { "$in": group_ids } })
            .sort(doc! { "_id": 1 })
            .await
            .context("Failed to query enrollments")?
            .try_collect()
            .await
            .context("Failed to read enrollments")
    }

    async fn quests_in_group(&self, course_group_id: CourseGroupId) -> Result<Vec<Quest>> {
        self.quests()
            .find(doc! { "course_group_id": course_group_id })
            .sort(doc! { "_id": 1 })
            .await
            .context("Failed to query quests by group")?
            .try_collect()
            .await
            .context("Failed to read quests")
    }

    async fn submitted_quest_ids(
        &self,
        student_id: StudentId,
        quest_ids: &[QuestId],
    ) -> Result<HashSet<QuestId>> {
        let attempts: Vec<QuestAttempt> = self
            .quest_attempts()
            .find(doc! {
                "student_id": student_id,
                "submitted": true,
                "quest_id": { "$in": quest_ids.to_vec() },
            })
            .await
            .context("Failed to query submitted quests")?
            .try_collect()
            .await
            .context("Failed to read submitted quests")?;
        Ok(attempts.into_iter().map(|attempt| attempt.quest_id).collect())
    }

    async fn mark_enrollment_completed(
        &self,
        enrollment_id: EnrollmentId,
        completed_on: DateTime<Utc>,
    ) -> Result<()> {
        self.db
            .collection::<Enrollment>(ENROLLMENTS)
            .update_one(
                doc! { "_id": enrollment_id },
                doc! { "$set": { "completed_on": chrono_to_bson(completed_on) } },
            )
            .await
            .context("Failed to mark enrollment completed")?;
        Ok(())
    }

    async fn save_cognitive_profile(&self, profile: &CognitiveProfile) -> Result<()> {
        track_store_operation("save_profile", COGNITIVE_PROFILES, async {
            self.db
                .collection::<CognitiveProfile>(COGNITIVE_PROFILES)
                .replace_one(doc! { "_id": profile.student_id }, profile)
                .upsert(true)
                .await
                .context("Failed to save cognitive profile")?;
            Ok(())
        })
        .await
    }

    async fn upsert_feedback(&self, feedback: &StudentFeedback) -> Result<()> {
        track_store_operation("upsert_feedback", STUDENT_FEEDBACK, async {
            self.db
                .collection::<StudentFeedback>(STUDENT_FEEDBACK)
                .replace_one(doc! { "_id": feedback.quest_attempt_id }, feedback)
                .upsert(true)
                .await
                .context("Failed to upsert student feedback")?;
            Ok(())
        })
        .await
    }

    async fn has_feedback(&self, attempt_id: AttemptId) -> Result<bool> {
        let found = self
            .db
            .collection::<StudentFeedback>(STUDENT_FEEDBACK)
            .find_one(doc! { "_id": attempt_id })
            .await
            .context("Failed to query student feedback")?;
        Ok(found.is_some())
    }

    async fn expire_quests_in_course(
        &self,
        course_id: CourseId,
        at: DateTime<Utc>,
    ) -> Result<Vec<QuestId>> {
        track_store_operation("expire_course_quests", QUESTS, async {
            let groups: Vec<CourseGroup> = self
                .db
                .collection::<CourseGroup>(COURSE_GROUPS)
                .find(doc! { "course_id": course_id })
                .await
                .context("Failed to query course groups")?
                .try_collect()
                .await
                .context("Failed to read course groups")?;
            let group_ids: Vec<CourseGroupId> = groups.iter().map(|group| group.id).collect();

            let active: Vec<Quest> = self
                .quests()
                .find(doc! {
                    "course_group_id": { "$in": group_ids },
                    "status": QuestStatus::Active.as_str(),
                })
                .await
                .context("Failed to query active quests")?
                .try_collect()
                .await
                .context("Failed to read active quests")?;

            let mut expired = Vec::new();
            for quest in active {
                // conditional update: a concurrent expiry wins and we skip the quest
                if self.expire_quest(quest.id, at).await? {
                    expired.push(quest.id);
                }
            }
            Ok(expired)
        })
        .await
    }

    async fn expire_due_quests(&self, now: DateTime<Utc>) -> Result<Vec<QuestId>> {
        track_store_operation("expire_due_quests", QUESTS, async {
            let due: Vec<Quest> = self
                .quests()
                .find(doc! {
                    "status": QuestStatus::Active.as_str(),
                    "expiration_date": { "$lt": chrono_to_bson(now) },
                })
                .await
                .context("Failed to query due quests")?
                .try_collect()
                .await
                .context("Failed to read due quests")?;

            let mut expired = Vec::new();
            for quest in due {
                if self.expire_quest(quest.id, now).await? {
                    expired.push(quest.id);
                }
            }
            Ok(expired)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn answer_scores_go_out_as_one_pipeline_update() {
        let (filter, pipeline) = answer_scores_update(&[(10, 5.0), (11, 0.0)]).unwrap();
        assert_eq!(filter, doc! { "_id": { "$in": [10_i64, 11_i64] } });
        assert_eq!(pipeline.len(), 1);

        let switch = pipeline[0]
            .get_document("$set")
            .and_then(|set| set.get_document("score_achieved"))
            .and_then(|field| field.get_document("$switch"))
            .unwrap();
        let branches = switch.get_array("branches").unwrap();
        assert_eq!(branches.len(), 2);
        assert_eq!(
            branches[0],
            bson::Bson::Document(doc! { "case": { "$eq": ["$_id", 10_i64] }, "then": 5.0 })
        );
        assert_eq!(switch.get_str("default").unwrap(), "$score_achieved");
    }

    #[test]
    fn no_answers_means_no_answer_write() {
        assert!(answer_scores_update(&[]).is_none());
    }

    #[test]
    fn expiry_stamps_status_and_date() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let update = expiry_update(at);
        let set = update.get_document("$set").unwrap();
        assert_eq!(set.get_str("status").unwrap(), QuestStatus::Expired.as_str());
        assert_eq!(
            set.get_datetime("expiration_date").unwrap().timestamp_millis(),
            at.timestamp_millis()
        );
    }

    #[test]
    fn missing_records_surface_from_the_transaction() {
        let err = score_commit_error(mongodb::error::Error::custom(
            ScoreCommitError::AttemptNotFound(3),
        ));
        assert_eq!(
            err.downcast_ref::<ScoreCommitError>(),
            Some(&ScoreCommitError::AttemptNotFound(3))
        );
        assert_eq!(err.to_string(), "quest attempt 3 not found");

        let err = score_commit_error(mongodb::error::Error::custom(
            ScoreCommitError::StudentNotFound(8),
        ));
        assert_eq!(err.to_string(), "student 8 not found");
    }

    #[test]
    fn driver_errors_keep_their_source() {
        let err = score_commit_error(mongodb::error::Error::custom("write conflict"));
        assert_eq!(err.to_string(), "Failed to commit score transaction");
        assert!(err.downcast_ref::<mongodb::error::Error>().is_some());
    }
}
