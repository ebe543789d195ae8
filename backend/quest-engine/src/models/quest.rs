use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    bson_datetime_as_chrono_option,
    cognitive::{lenient_bloom_level, BloomLevel},
    AnswerAttemptId, AnswerId, AttemptId, CourseGroupId, QuestId, QuestionId, StudentId,
};

/// Topic for questions stored without one.
pub const DEFAULT_TOPIC: &str = "General";

/// Quest type as stored by the content layer. Private quests are practice-only
/// and never count towards points or badges.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum QuestType {
    #[serde(rename = "EduQuest MCQ")]
    EduquestMcq,
    #[serde(rename = "Kahoot!")]
    Kahoot,
    #[serde(rename = "WooClap")]
    Wooclap,
    Private,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum QuestStatus {
    #[default]
    Active,
    Expired,
}

impl QuestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestStatus::Active => "Active",
            QuestStatus::Expired => "Expired",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quest {
    #[serde(rename = "_id")]
    pub id: QuestId,
    pub course_group_id: CourseGroupId,
    pub name: String,
    #[serde(rename = "type")]
    pub quest_type: QuestType,
    #[serde(default)]
    pub status: QuestStatus,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "bson_datetime_as_chrono_option"
    )]
    pub tutorial_date: Option<DateTime<Utc>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "bson_datetime_as_chrono_option"
    )]
    pub expiration_date: Option<DateTime<Utc>>,
}

impl Quest {
    pub fn is_private(&self) -> bool {
        self.quest_type == QuestType::Private
    }

    /// Tutorial quests are the scheduled in-class quests counted for attendance.
    pub fn is_tutorial(&self) -> bool {
        !self.is_private() && self.tutorial_date.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub id: AnswerId,
    pub text: String,
    #[serde(default)]
    pub is_correct: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    #[serde(rename = "_id")]
    pub id: QuestionId,
    pub quest_id: QuestId,
    pub number: u32,
    pub text: String,
    pub max_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_bloom_level::deserialize"
    )]
    pub cognitive_level: Option<BloomLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// 1-10 scale
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default)]
    pub answers: Vec<Answer>,
}

impl Question {
    pub fn answer(&self, answer_id: AnswerId) -> Option<&Answer> {
        self.answers.iter().find(|answer| answer.id == answer_id)
    }

    pub fn first_correct_answer(&self) -> Option<&Answer> {
        self.answers.iter().find(|answer| answer.is_correct)
    }

    /// Stored topic, or "General" when missing or blank.
    pub fn topic_or_default(&self) -> &str {
        self.topic
            .as_deref()
            .filter(|topic| !topic.trim().is_empty())
            .unwrap_or(DEFAULT_TOPIC)
    }
}

/// Sum of `max_score` over every question of a quest.
pub fn total_max_score(questions: &[Question]) -> f64 {
    questions.iter().map(|question| question.max_score).sum()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestAttempt {
    #[serde(rename = "_id")]
    pub id: AttemptId,
    pub student_id: StudentId,
    pub quest_id: QuestId,
    #[serde(default)]
    pub submitted: bool,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "bson_datetime_as_chrono_option"
    )]
    pub first_attempted_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "bson_datetime_as_chrono_option"
    )]
    pub last_attempted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_score_achieved: f64,
    #[serde(default)]
    pub bonus_points: f64,
    #[serde(default)]
    pub bonus_awarded: bool,
}

impl QuestAttempt {
    pub fn new(id: AttemptId, student_id: StudentId, quest_id: QuestId) -> Self {
        Self {
            id,
            student_id,
            quest_id,
            submitted: false,
            first_attempted_at: None,
            last_attempted_at: None,
            total_score_achieved: 0.0,
            bonus_points: 0.0,
            bonus_awarded: false,
        }
    }

    /// Whole milliseconds between first and last activity, 0 when either
    /// timestamp is missing or the clock went backwards.
    pub fn elapsed_millis(&self) -> i64 {
        match (self.first_attempted_at, self.last_attempted_at) {
            (Some(first), Some(last)) => (last - first).num_milliseconds().max(0),
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerAttempt {
    #[serde(rename = "_id")]
    pub id: AnswerAttemptId,
    pub quest_attempt_id: AttemptId,
    pub question_id: QuestionId,
    pub answer_id: AnswerId,
    #[serde(default)]
    pub is_selected: bool,
    /// Whether this specific student got this answer right.
    #[serde(default)]
    pub is_correct: bool,
    #[serde(default)]
    pub hint_used: bool,
    #[serde(default)]
    pub score_achieved: f64,
}
