use std::{collections::HashSet, sync::Arc};

use anyhow::Result;
use chrono::Utc;

use crate::{
    metrics::BADGES_AWARDED_TOTAL,
    models::{
        badge::{AwardOutcome, AwardUniqueness, BadgeKind, CourseBadgeAward, QuestBadgeAward},
        job::JobReport,
        quest::{total_max_score, Quest, QuestAttempt, QuestStatus},
        AttemptId, CourseId, QuestId,
    },
    store::QuestStore,
};

/// Speedster winners must hold one of this many distinct top scores.
pub const SPEEDSTER_TOP_SCORES: usize = 3;
pub const FULL_ATTENDANCE_RATIO: f64 = 0.70;
pub const HALF_ATTENDANCE_RATIO: f64 = 0.50;

const SCORE_EPSILON: f64 = 1e-9;

pub fn scores_match(a: f64, b: f64) -> bool {
    (a - b).abs() <= SCORE_EPSILON
}

/// Distinct positive scores, highest first, at most `limit` of them.
pub fn top_distinct_scores(attempts: &[QuestAttempt], limit: usize) -> Vec<f64> {
    let mut scores: Vec<f64> = attempts
        .iter()
        .map(|attempt| attempt.total_score_achieved)
        .filter(|score| *score > 0.0)
        .collect();
    scores.sort_by(|a, b| b.total_cmp(a));
    scores.dedup_by(|a, b| scores_match(*a, *b));
    scores.truncate(limit);
    scores
}

/// The fastest attempt with a positive score and a positive elapsed time,
/// provided its score is among the top distinct scores. Equal times go to the
/// lowest attempt id.
pub fn select_speedster(attempts: &[QuestAttempt]) -> Option<&QuestAttempt> {
    let fastest = attempts
        .iter()
        .filter(|attempt| attempt.total_score_achieved > 0.0 && attempt.elapsed_millis() > 0)
        .min_by_key(|attempt| (attempt.elapsed_millis(), attempt.id))?;

    let top = top_distinct_scores(attempts, SPEEDSTER_TOP_SCORES);
    top.iter()
        .any(|score| scores_match(*score, fastest.total_score_achieved))
        .then_some(fastest)
}

/// Every attempt holding the highest score, or none when nobody scored.
pub fn expert_winners(attempts: &[QuestAttempt]) -> Vec<&QuestAttempt> {
    let highest = attempts
        .iter()
        .map(|attempt| attempt.total_score_achieved)
        .fold(0.0_f64, f64::max);
    if highest <= 0.0 {
        return Vec::new();
    }
    attempts
        .iter()
        .filter(|attempt| scores_match(attempt.total_score_achieved, highest))
        .collect()
}

/// Attendance badge for a submitted/total tutorial ratio; only the highest
/// tier reached is returned.
pub fn attendance_tier(attended: usize, tutorials: usize) -> Option<BadgeKind> {
    if tutorials == 0 {
        return None;
    }
    let ratio = attended as f64 / tutorials as f64;
    if ratio >= FULL_ATTENDANCE_RATIO {
        Some(BadgeKind::FullAttendance)
    } else if ratio >= HALF_ATTENDANCE_RATIO {
        Some(BadgeKind::HalfAttendance)
    } else {
        None
    }
}

fn record_outcome(badge: BadgeKind, outcome: AwardOutcome) {
    if outcome == AwardOutcome::Awarded {
        BADGES_AWARDED_TOTAL.with_label_values(&[badge.key()]).inc();
    }
}

fn skipped(badge: BadgeKind, reason: String) -> JobReport {
    JobReport::Skipped(format!("[{}] {}", badge.name(), reason))
}

fn completed(badge: BadgeKind, summary: String) -> JobReport {
    JobReport::Completed(format!("[{}] {}", badge.name(), summary))
}

/// Badge eligibility rules. Each rule is independent, skips private quests,
/// and awards through the store's idempotency key.
pub struct BadgeService {
    store: Arc<dyn QuestStore>,
}

impl BadgeService {
    pub fn new(store: Arc<dyn QuestStore>) -> Self {
        Self { store }
    }

    async fn submitted_attempt_with_quest(
        &self,
        badge: BadgeKind,
        attempt_id: AttemptId,
    ) -> Result<Result<(QuestAttempt, Quest), JobReport>> {
        let Some(attempt) = self.store.get_attempt(attempt_id).await? else {
            return Ok(Err(skipped(
                badge,
                format!("Quest attempt {} not found", attempt_id),
            )));
        };
        if !attempt.submitted {
            return Ok(Err(skipped(
                badge,
                format!("Quest attempt {} is not submitted", attempt_id),
            )));
        }
        let Some(quest) = self.store.get_quest(attempt.quest_id).await? else {
            return Ok(Err(skipped(
                badge,
                format!("Quest {} not found", attempt.quest_id),
            )));
        };
        if quest.is_private() {
            return Ok(Err(skipped(
                badge,
                format!("Quest {} is private", quest.id),
            )));
        }
        Ok(Ok((attempt, quest)))
    }

    async fn scorable_quest(
        &self,
        badge: BadgeKind,
        quest_id: QuestId,
    ) -> Result<Result<Quest, JobReport>> {
        let Some(quest) = self.store.get_quest(quest_id).await? else {
            return Ok(Err(skipped(badge, format!("Quest {} not found", quest_id))));
        };
        if quest.is_private() {
            return Ok(Err(skipped(badge, format!("Quest {} is private", quest_id))));
        }
        let questions = self.store.questions_for_quest(quest_id).await?;
        if total_max_score(&questions) <= 0.0 {
            return Ok(Err(skipped(
                badge,
                format!("Quest {} has no scorable questions", quest_id),
            )));
        }
        Ok(Ok(quest))
    }

    async fn award_attempt(
        &self,
        badge: BadgeKind,
        uniqueness: AwardUniqueness,
        attempt: &QuestAttempt,
    ) -> Result<AwardOutcome> {
        let award = QuestBadgeAward::new(
            badge,
            uniqueness,
            attempt.id,
            attempt.student_id,
            attempt.quest_id,
        );
        let outcome = self.store.award_quest_badge(&award).await?;
        record_outcome(badge, outcome);
        Ok(outcome)
    }

    fn attempt_report(badge: BadgeKind, attempt: &QuestAttempt, outcome: AwardOutcome) -> JobReport {
        match outcome {
            AwardOutcome::Awarded => completed(
                badge,
                format!(
                    "Awarded to student {} for attempt {}",
                    attempt.student_id, attempt.id
                ),
            ),
            AwardOutcome::AlreadyAwarded => completed(
                badge,
                format!(
                    "Student {} already holds it for attempt {}",
                    attempt.student_id, attempt.id
                ),
            ),
            AwardOutcome::BadgeMissing => skipped(badge, "Badge not found in catalog".to_string()),
        }
    }

    pub async fn award_first_attempt(&self, attempt_id: AttemptId) -> Result<JobReport> {
        let badge = BadgeKind::FirstAttempt;
        let (attempt, _) = match self.submitted_attempt_with_quest(badge, attempt_id).await? {
            Ok(found) => found,
            Err(report) => return Ok(report),
        };

        if self
            .store
            .student_has_quest_badge(attempt.student_id, badge)
            .await?
        {
            return Ok(skipped(
                badge,
                format!("Student {} already earned it", attempt.student_id),
            ));
        }

        let outcome = self
            .award_attempt(badge, AwardUniqueness::PerStudent, &attempt)
            .await?;
        Ok(Self::attempt_report(badge, &attempt, outcome))
    }

    pub async fn award_perfectionist(&self, attempt_id: AttemptId) -> Result<JobReport> {
        let badge = BadgeKind::Perfectionist;
        let (attempt, quest) = match self.submitted_attempt_with_quest(badge, attempt_id).await? {
            Ok(found) => found,
            Err(report) => return Ok(report),
        };

        let questions = self.store.questions_for_quest(quest.id).await?;
        let max_score = total_max_score(&questions);
        if max_score <= 0.0 {
            return Ok(skipped(
                badge,
                format!("Quest {} has no scorable questions", quest.id),
            ));
        }
        if !scores_match(attempt.total_score_achieved, max_score) {
            return Ok(skipped(
                badge,
                format!(
                    "Attempt {} scored {} of {}",
                    attempt.id, attempt.total_score_achieved, max_score
                ),
            ));
        }

        let outcome = self
            .award_attempt(badge, AwardUniqueness::PerAttempt, &attempt)
            .await?;
        Ok(Self::attempt_report(badge, &attempt, outcome))
    }

    pub async fn award_speedster(&self, quest_id: QuestId) -> Result<JobReport> {
        let badge = BadgeKind::Speedster;
        let quest = match self.scorable_quest(badge, quest_id).await? {
            Ok(quest) => quest,
            Err(report) => return Ok(report),
        };

        let attempts = self.store.submitted_attempts_for_quest(quest.id).await?;
        let Some(winner) = select_speedster(&attempts) else {
            return Ok(skipped(
                badge,
                format!("No eligible fastest attempt among the top scores of quest {}", quest.id),
            ));
        };

        let outcome = self
            .award_attempt(badge, AwardUniqueness::PerAttempt, winner)
            .await?;
        Ok(Self::attempt_report(badge, winner, outcome))
    }

    pub async fn award_expert(&self, quest_id: QuestId) -> Result<JobReport> {
        let badge = BadgeKind::Expert;
        let quest = match self.scorable_quest(badge, quest_id).await? {
            Ok(quest) => quest,
            Err(report) => return Ok(report),
        };
        if quest.status != QuestStatus::Expired {
            return Ok(skipped(
                badge,
                format!("Quest {} is still {}", quest.id, quest.status.as_str()),
            ));
        }

        let attempts = self.store.submitted_attempts_for_quest(quest.id).await?;
        let winners = expert_winners(&attempts);
        if winners.is_empty() {
            return Ok(skipped(
                badge,
                format!("No positive score on quest {}", quest.id),
            ));
        }

        let mut awarded = 0;
        for winner in &winners {
            match self
                .award_attempt(badge, AwardUniqueness::PerAttempt, winner)
                .await?
            {
                AwardOutcome::Awarded => awarded += 1,
                AwardOutcome::AlreadyAwarded => {}
                AwardOutcome::BadgeMissing => {
                    return Ok(skipped(badge, "Badge not found in catalog".to_string()))
                }
            }
        }

        Ok(completed(
            badge,
            format!(
                "{} new award(s) for {} top attempt(s) on quest {}",
                awarded,
                winners.len(),
                quest.id
            ),
        ))
    }

    pub async fn award_completionist(&self, course_id: CourseId) -> Result<JobReport> {
        let badge = BadgeKind::Completionist;
        if self.store.get_course(course_id).await?.is_none() {
            return Ok(skipped(badge, format!("Course {} not found", course_id)));
        }

        let mut awarded = 0;
        for enrollment in self.store.enrollments_for_course(course_id).await? {
            let quest_ids: Vec<QuestId> = self
                .store
                .quests_in_group(enrollment.course_group_id)
                .await?
                .into_iter()
                .filter(|quest| !quest.is_private())
                .map(|quest| quest.id)
                .collect();
            if quest_ids.is_empty() {
                continue;
            }

            let submitted = self
                .store
                .submitted_quest_ids(enrollment.student_id, &quest_ids)
                .await?;
            let required: HashSet<QuestId> = quest_ids.into_iter().collect();
            if submitted != required {
                continue;
            }

            let award = CourseBadgeAward::new(badge, enrollment.id, enrollment.student_id);
            let outcome = self.store.award_course_badge(&award).await?;
            record_outcome(badge, outcome);
            match outcome {
                AwardOutcome::Awarded => awarded += 1,
                AwardOutcome::AlreadyAwarded => {}
                AwardOutcome::BadgeMissing => {
                    return Ok(skipped(badge, "Badge not found in catalog".to_string()))
                }
            }
            if enrollment.completed_on.is_none() {
                self.store
                    .mark_enrollment_completed(enrollment.id, Utc::now())
                    .await?;
            }
        }

        Ok(completed(
            badge,
            format!("{} new award(s) in course {}", awarded, course_id),
        ))
    }

    pub async fn award_tutorial_attendance(&self, course_id: CourseId) -> Result<JobReport> {
        if self.store.get_course(course_id).await?.is_none() {
            return Ok(skipped(
                BadgeKind::FullAttendance,
                format!("Course {} not found", course_id),
            ));
        }

        let mut full = 0;
        let mut half = 0;
        for enrollment in self.store.enrollments_for_course(course_id).await? {
            let tutorial_ids: Vec<QuestId> = self
                .store
                .quests_in_group(enrollment.course_group_id)
                .await?
                .into_iter()
                .filter(Quest::is_tutorial)
                .map(|quest| quest.id)
                .collect();
            if tutorial_ids.is_empty() {
                continue;
            }

            let attended = self
                .store
                .submitted_quest_ids(enrollment.student_id, &tutorial_ids)
                .await?
                .len();
            let Some(badge) = attendance_tier(attended, tutorial_ids.len()) else {
                continue;
            };

            let award = CourseBadgeAward::new(badge, enrollment.id, enrollment.student_id);
            let outcome = self.store.award_course_badge(&award).await?;
            record_outcome(badge, outcome);
            match (badge, outcome) {
                (_, AwardOutcome::BadgeMissing) => {
                    tracing::warn!(badge = badge.key(), "Attendance badge not found in catalog");
                }
                (BadgeKind::FullAttendance, AwardOutcome::Awarded) => full += 1,
                (_, AwardOutcome::Awarded) => half += 1,
                _ => {}
            }
        }

        Ok(JobReport::Completed(format!(
            "[Tutorial Attendance] {} full and {} half award(s) in course {}",
            full, half, course_id
        )))
    }
}
