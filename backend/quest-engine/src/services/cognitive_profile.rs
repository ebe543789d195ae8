use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::{
    metrics::COGNITIVE_PROFILE_UPDATES_TOTAL,
    models::{
        cognitive::{BloomLevel, CognitiveProfile, CompetencyTier},
        job::JobReport,
        quest::{AnswerAttempt, Question},
        QuestId, QuestionId, StudentId,
    },
    store::QuestStore,
    utils::locks::SubjectLocks,
};

/// Topics strictly below this accuracy are weak.
pub const WEAK_TOPIC_THRESHOLD: f64 = 60.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub correct: u32,
    pub total: u32,
}

impl Tally {
    fn record(&mut self, correct: bool) {
        self.total += 1;
        if correct {
            self.correct += 1;
        }
    }

    /// Percentage correct; 0 when nothing was observed.
    pub fn accuracy(&self) -> f64 {
        self.correct as f64 / self.total.max(1) as f64 * 100.0
    }
}

/// Builds a full profile from every (question, answer attempt) pair of the
/// student's submitted history. Correctness is the per-student flag on the
/// answer attempt.
pub fn build_profile<'a, I>(student_id: StudentId, observations: I, now: DateTime<Utc>) -> CognitiveProfile
where
    I: IntoIterator<Item = (&'a Question, &'a AnswerAttempt)>,
{
    let mut bloom: BTreeMap<BloomLevel, Tally> = BTreeMap::new();
    let mut topics: BTreeMap<String, Tally> = BTreeMap::new();

    for (question, answer_attempt) in observations {
        if let Some(level) = question.cognitive_level {
            bloom.entry(level).or_default().record(answer_attempt.is_correct);
        }
        topics
            .entry(question.topic_or_default().to_string())
            .or_default()
            .record(answer_attempt.is_correct);
    }

    let accuracy = |level: BloomLevel| bloom.get(&level).copied().unwrap_or_default().accuracy();

    let weak_topics = topics
        .into_iter()
        .filter(|(_, tally)| tally.total > 0 && tally.accuracy() < WEAK_TOPIC_THRESHOLD)
        .map(|(topic, tally)| (topic, tally.accuracy()))
        .collect();

    let mut profile = CognitiveProfile {
        student_id,
        remember_accuracy: accuracy(BloomLevel::Remember),
        understand_accuracy: accuracy(BloomLevel::Understand),
        apply_accuracy: accuracy(BloomLevel::Apply),
        analyze_accuracy: accuracy(BloomLevel::Analyze),
        evaluate_accuracy: accuracy(BloomLevel::Evaluate),
        create_accuracy: accuracy(BloomLevel::Create),
        weak_topics,
        competency_level: CompetencyTier::default(),
        recommended_difficulty: 0.0,
        last_updated_at: now,
    };
    let tier = CompetencyTier::from_mean_accuracy(profile.mean_accuracy());
    profile.competency_level = tier;
    profile.recommended_difficulty = tier.recommended_difficulty();
    profile
}

/// Recomputes and overwrites a student's profile. Runs for one student at a
/// time within this process.
pub struct CognitiveProfileService {
    store: Arc<dyn QuestStore>,
    locks: SubjectLocks,
}

impl CognitiveProfileService {
    pub fn new(store: Arc<dyn QuestStore>, locks: SubjectLocks) -> Self {
        Self { store, locks }
    }

    pub async fn recompute(&self, student_id: StudentId) -> Result<JobReport> {
        let _guard = self.locks.lock(student_id).await;

        if self.store.get_student(student_id).await?.is_none() {
            return Ok(JobReport::Skipped(format!(
                "Student {} not found",
                student_id
            )));
        }

        let attempts = self.store.submitted_attempts_for_student(student_id).await?;

        let mut questions_by_quest: HashMap<QuestId, HashMap<QuestionId, Question>> =
            HashMap::new();
        let mut history: Vec<(QuestId, AnswerAttempt)> = Vec::new();
        for attempt in &attempts {
            if !questions_by_quest.contains_key(&attempt.quest_id) {
                let questions = self.store.questions_for_quest(attempt.quest_id).await?;
                questions_by_quest.insert(
                    attempt.quest_id,
                    questions
                        .into_iter()
                        .map(|question| (question.id, question))
                        .collect(),
                );
            }
            for answer_attempt in self.store.answer_attempts_for(attempt.id).await? {
                history.push((attempt.quest_id, answer_attempt));
            }
        }

        let observations = history.iter().filter_map(|(quest_id, answer_attempt)| {
            questions_by_quest
                .get(quest_id)
                .and_then(|questions| questions.get(&answer_attempt.question_id))
                .map(|question| (question, answer_attempt))
        });
        let profile = build_profile(student_id, observations, Utc::now());

        self.store.save_cognitive_profile(&profile).await?;
        COGNITIVE_PROFILE_UPDATES_TOTAL
            .with_label_values(&[profile.competency_level.as_str()])
            .inc();

        tracing::info!(
            student_id,
            tier = profile.competency_level.as_str(),
            weak_topics = profile.weak_topics.len(),
            "Cognitive profile updated"
        );

        Ok(JobReport::Completed(format!(
            "Profile for student {} recomputed from {} attempt(s): {} ({} weak topic(s))",
            student_id,
            attempts.len(),
            profile.competency_level.as_str(),
            profile.weak_topics.len()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::quest::DEFAULT_TOPIC;

    fn question(id: QuestionId, level: Option<BloomLevel>, topic: Option<&str>) -> Question {
        Question {
            id,
            quest_id: 1,
            number: id as u32,
            text: String::new(),
            max_score: 1.0,
            hint: None,
            cognitive_level: level,
            topic: topic.map(str::to_string),
            difficulty_score: None,
            explanation: None,
            answers: Vec::new(),
        }
    }

    fn answered(id: i64, question_id: QuestionId, correct: bool) -> AnswerAttempt {
        AnswerAttempt {
            id,
            quest_attempt_id: 1,
            question_id,
            answer_id: 1,
            is_selected: true,
            is_correct: correct,
            hint_used: false,
            score_achieved: 0.0,
        }
    }

    #[test]
    fn empty_history_is_a_beginner_profile() {
        let profile = build_profile(1, std::iter::empty(), Utc::now());
        assert_eq!(profile.mean_accuracy(), 0.0);
        assert_eq!(profile.competency_level, CompetencyTier::Beginner);
        assert_eq!(profile.recommended_difficulty, 3.0);
        assert!(profile.weak_topics.is_empty());
    }

    #[test]
    fn weak_topic_threshold_is_strict() {
        let weak = question(1, None, Some("Recursion"));
        let borderline = question(2, None, Some("Loops"));
        let mut answers = Vec::new();
        for (index, correct) in [true, true, false, false, false].into_iter().enumerate() {
            answers.push((&weak, answered(index as i64, 1, correct)));
        }
        for (index, correct) in [true, true, true, false, false].into_iter().enumerate() {
            answers.push((&borderline, answered(10 + index as i64, 2, correct)));
        }

        let profile = build_profile(
            1,
            answers.iter().map(|(question, answer)| (*question, answer)),
            Utc::now(),
        );
        assert_eq!(profile.weak_topics.get("Recursion"), Some(&40.0));
        assert!(!profile.weak_topics.contains_key("Loops"));
    }

    #[test]
    fn untagged_questions_fall_into_general_topic_only() {
        let untagged = question(1, None, None);
        let answer = answered(1, 1, false);

        let profile = build_profile(1, [(&untagged, &answer)], Utc::now());
        assert_eq!(profile.weak_topics.get(DEFAULT_TOPIC), Some(&0.0));
        for level in BloomLevel::ALL {
            assert_eq!(profile.accuracy(level), 0.0);
        }
    }

    #[test]
    fn tier_follows_mean_of_all_six_levels() {
        let questions: Vec<Question> = BloomLevel::ALL
            .iter()
            .enumerate()
            .map(|(index, level)| question(index as i64, Some(*level), Some("Core")))
            .collect();
        let answers: Vec<AnswerAttempt> = questions
            .iter()
            .map(|question| answered(question.id, question.id, true))
            .collect();

        let profile = build_profile(1, questions.iter().zip(answers.iter()), Utc::now());
        assert_eq!(profile.mean_accuracy(), 100.0);
        assert_eq!(profile.competency_level, CompetencyTier::Advanced);
        assert_eq!(profile.recommended_difficulty, 8.0);
    }
}
