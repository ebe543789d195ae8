use std::sync::Arc;

use anyhow::Result;

use super::score_calculator::score_attempt;
use crate::{
    metrics::POINTS_CREDITED_TOTAL,
    models::{job::JobReport, AttemptId},
    store::{LedgerOutcome, QuestStore, ScoredAttempt},
};

/// Points owed for a new score given the student's best earlier score at the
/// same quest. Only improvements count, so the lifetime total always equals
/// the sum of per-quest bests.
pub fn marginal_credit(new_score: f64, prior_best: f64) -> f64 {
    if new_score > prior_best {
        new_score - prior_best
    } else {
        0.0
    }
}

/// Scores a submitted attempt and credits the student's ledger in one store
/// transaction.
pub struct PointsLedgerUpdater {
    store: Arc<dyn QuestStore>,
}

impl PointsLedgerUpdater {
    pub fn new(store: Arc<dyn QuestStore>) -> Self {
        Self { store }
    }

    pub async fn score_and_credit(&self, attempt_id: AttemptId) -> Result<JobReport> {
        let Some(attempt) = self.store.get_attempt(attempt_id).await? else {
            return Ok(JobReport::Skipped(format!(
                "Quest attempt {} not found",
                attempt_id
            )));
        };
        if !attempt.submitted {
            return Ok(JobReport::Skipped(format!(
                "Quest attempt {} is not submitted",
                attempt_id
            )));
        }
        let Some(quest) = self.store.get_quest(attempt.quest_id).await? else {
            return Ok(JobReport::Skipped(format!(
                "Quest {} for attempt {} not found",
                attempt.quest_id, attempt_id
            )));
        };
        if self.store.get_student(attempt.student_id).await?.is_none() {
            return Ok(JobReport::Skipped(format!(
                "Student {} for attempt {} not found",
                attempt.student_id, attempt_id
            )));
        }

        let questions = self.store.questions_for_quest(quest.id).await?;
        let answer_attempts = self.store.answer_attempts_for(attempt_id).await?;
        let sheet = score_attempt(&questions, &answer_attempts);

        let scored = ScoredAttempt {
            attempt_id,
            student_id: attempt.student_id,
            quest_id: quest.id,
            total_score: sheet.total,
            answer_scores: sheet.answer_scores,
            credit_ledger: !quest.is_private(),
        };

        let message = match self.store.commit_score(&scored).await? {
            LedgerOutcome::NotEligible => format!(
                "Attempt {} scored {} on private quest {}; ledger untouched",
                attempt_id, scored.total_score, quest.id
            ),
            LedgerOutcome::Unchanged { prior_best } => format!(
                "Attempt {} scored {}, not above prior best {}; no points credited",
                attempt_id, scored.total_score, prior_best
            ),
            LedgerOutcome::Credited { prior_best, points } => {
                POINTS_CREDITED_TOTAL.inc_by(points);
                format!(
                    "Attempt {} scored {} over prior best {}; credited {} points to student {}",
                    attempt_id, scored.total_score, prior_best, points, attempt.student_id
                )
            }
        };

        tracing::info!(attempt_id, student_id = attempt.student_id, "{}", message);
        Ok(JobReport::Completed(message))
    }
}
