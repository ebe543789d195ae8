use crate::models::{
    quest::{AnswerAttempt, Question},
    AnswerAttemptId, QuestionId,
};

/// Flat deduction per question when any of its answer attempts used the hint.
pub const HINT_PENALTY: f64 = 5.0;

#[derive(Debug, Clone, PartialEq)]
pub struct QuestionScore {
    pub question_id: QuestionId,
    /// Sum of option scores before the hint penalty.
    pub raw: f64,
    pub subtotal: f64,
    pub hint_used: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreSheet {
    pub total: f64,
    pub questions: Vec<QuestionScore>,
    /// Per answer attempt write-back, in question order then encounter order.
    pub answer_scores: Vec<(AnswerAttemptId, f64)>,
}

/// Scores one attempt. Pure and deterministic: the same questions and answer
/// attempts always give the same sheet.
///
/// Each correct option is worth `max_score / max(correct options, 1)`. A
/// selected correct option earns that weight; everything else earns 0. If the
/// hint was used on a question, `HINT_PENALTY` is taken off the option scores
/// in encounter order and the subtotal never drops below 0. Questions without
/// options are skipped, as are answer attempts for questions outside the list.
pub fn score_attempt(questions: &[Question], answer_attempts: &[AnswerAttempt]) -> ScoreSheet {
    let mut sheet = ScoreSheet::default();

    for question in questions {
        if question.answers.is_empty() {
            continue;
        }

        let correct_options = question
            .answers
            .iter()
            .filter(|answer| answer.is_correct)
            .count();
        let weight = question.max_score / correct_options.max(1) as f64;

        let attempts: Vec<&AnswerAttempt> = answer_attempts
            .iter()
            .filter(|answer_attempt| answer_attempt.question_id == question.id)
            .collect();

        let mut scores: Vec<(AnswerAttemptId, f64)> = attempts
            .iter()
            .map(|answer_attempt| {
                let correct_pick = answer_attempt.is_selected
                    && question
                        .answer(answer_attempt.answer_id)
                        .is_some_and(|answer| answer.is_correct);
                (answer_attempt.id, if correct_pick { weight } else { 0.0 })
            })
            .collect();

        let raw: f64 = scores.iter().map(|(_, score)| score).sum();
        let hint_used = attempts.iter().any(|answer_attempt| answer_attempt.hint_used);

        let subtotal = if hint_used {
            let mut remaining = HINT_PENALTY;
            for (_, score) in scores.iter_mut() {
                if remaining <= 0.0 {
                    break;
                }
                let deduction = score.min(remaining);
                *score -= deduction;
                remaining -= deduction;
            }
            (raw - HINT_PENALTY).max(0.0)
        } else {
            raw
        };

        sheet.total += subtotal;
        sheet.answer_scores.extend(scores);
        sheet.questions.push(QuestionScore {
            question_id: question.id,
            raw,
            subtotal,
            hint_used,
        });
    }

    sheet
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::quest::Answer;

    fn question(id: QuestionId, max_score: f64, correct: &[bool]) -> Question {
        Question {
            id,
            quest_id: 1,
            number: id as u32,
            text: format!("Question {}", id),
            max_score,
            hint: None,
            cognitive_level: None,
            topic: None,
            difficulty_score: None,
            explanation: None,
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
        }
    }

    fn pick(id: AnswerAttemptId, question_id: QuestionId, answer_id: i64, hint: bool) -> AnswerAttempt {
        AnswerAttempt {
            id,
            quest_attempt_id: 1,
            question_id,
            answer_id,
            is_selected: true,
            is_correct: false,
            hint_used: hint,
            score_achieved: 0.0,
        }
    }

    #[test]
    fn multi_select_splits_max_score_across_correct_options() {
        let questions = vec![question(1, 6.0, &[true, true, true, false])];
        let attempts = vec![pick(1, 1, 10, false), pick(2, 1, 11, false), pick(3, 1, 13, false)];

        let sheet = score_attempt(&questions, &attempts);
        assert_eq!(sheet.total, 4.0);
        assert_eq!(sheet.answer_scores, vec![(1, 2.0), (2, 2.0), (3, 0.0)]);
    }

    #[test]
    fn unselected_correct_option_scores_nothing() {
        let questions = vec![question(1, 5.0, &[true, false])];
        let mut attempt = pick(1, 1, 10, false);
        attempt.is_selected = false;

        let sheet = score_attempt(&questions, &[attempt]);
        assert_eq!(sheet.total, 0.0);
    }

    #[test]
    fn hint_penalty_is_taken_in_encounter_order() {
        let questions = vec![question(1, 8.0, &[true, true])];
        let attempts = vec![pick(1, 1, 10, true), pick(2, 1, 11, false)];

        let sheet = score_attempt(&questions, &attempts);
        // 4 + 4 raw, the first option absorbs 4 of the penalty and the second 1
        assert_eq!(sheet.answer_scores, vec![(1, 0.0), (2, 3.0)]);
        assert_eq!(sheet.total, 3.0);
        assert!(sheet.questions[0].hint_used);
    }

    #[test]
    fn hint_penalty_never_goes_negative() {
        let questions = vec![question(1, 2.0, &[true])];
        let sheet = score_attempt(&questions, &[pick(1, 1, 10, true)]);

        assert_eq!(sheet.total, 0.0);
        assert_eq!(sheet.answer_scores, vec![(1, 0.0)]);
        assert_eq!(sheet.questions[0].raw, 2.0);
    }

    #[test]
    fn questions_without_options_are_skipped() {
        let questions = vec![question(1, 5.0, &[]), question(2, 5.0, &[true])];
        let attempts = vec![pick(1, 1, 10, false), pick(2, 2, 20, false)];

        let sheet = score_attempt(&questions, &attempts);
        assert_eq!(sheet.total, 5.0);
        assert_eq!(sheet.questions.len(), 1);
        assert_eq!(sheet.answer_scores, vec![(2, 5.0)]);
    }

    #[test]
    fn no_correct_options_scores_zero() {
        let questions = vec![question(1, 5.0, &[false, false])];
        let sheet = score_attempt(&questions, &[pick(1, 1, 10, false)]);
        assert_eq!(sheet.total, 0.0);
    }

    #[test]
    fn answers_for_other_questions_are_ignored() {
        let questions = vec![question(1, 5.0, &[true])];
        let sheet = score_attempt(&questions, &[pick(1, 99, 990, false)]);
        assert_eq!(sheet.total, 0.0);
        assert!(sheet.answer_scores.is_empty());
    }

    #[test]
    fn scoring_is_repeatable() {
        let questions = vec![question(1, 10.0, &[true, false]), question(2, 4.0, &[true, true])];
        let attempts = vec![pick(1, 1, 10, true), pick(2, 2, 20, false), pick(3, 2, 21, false)];

        let first = score_attempt(&questions, &attempts);
        let second = score_attempt(&questions, &attempts);
        assert_eq!(first, second);
        assert_eq!(first.total, 9.0);
    }
}
