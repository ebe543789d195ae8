use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{
    bson_datetime_as_chrono, cognitive::BloomLevel, AttemptId, QuestId, QuestionId, StudentId,
};

/// Payload sent to the feedback service's `/generate_feedback` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedbackRequest {
    pub student_id: StudentId,
    pub quest_id: QuestId,
    pub answers: Vec<FeedbackAnswer>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedbackAnswer {
    pub question_id: QuestionId,
    pub question_text: String,
    pub cognitive_level: Option<BloomLevel>,
    pub topic: String,
    pub selected_answer: String,
    pub is_selected: bool,
    /// Global correctness of the selected option.
    pub answer_is_correct: bool,
    /// Correctness for this student.
    pub is_correct: bool,
    pub correct_answer: String,
    pub explanation: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FeedbackResponse {
    #[serde(default)]
    pub quest_summary: Map<String, Value>,
    #[serde(default)]
    pub subtopic_feedback: Vec<Value>,
    #[serde(default)]
    pub study_tips: Vec<Value>,
    #[serde(default)]
    pub strengths: Vec<Value>,
    #[serde(default)]
    pub weaknesses: Vec<Value>,
    #[serde(default)]
    pub recommendations: String,
    #[serde(default)]
    pub question_feedback: Map<String, Value>,
}

/// Stored feedback, one per quest attempt, replaced wholesale on regeneration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StudentFeedback {
    #[serde(rename = "_id")]
    pub quest_attempt_id: AttemptId,
    pub quest_summary: Map<String, Value>,
    pub subtopic_feedback: Vec<Value>,
    pub study_tips: Vec<Value>,
    pub strengths: Vec<Value>,
    pub weaknesses: Vec<Value>,
    pub recommendations: String,
    pub question_feedback: Map<String, Value>,
    #[serde(rename = "createdAt", with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
}

impl StudentFeedback {
    pub fn from_response(quest_attempt_id: AttemptId, response: FeedbackResponse) -> Self {
        Self {
            quest_attempt_id,
            quest_summary: response.quest_summary,
            subtopic_feedback: response.subtopic_feedback,
            study_tips: response.study_tips,
            strengths: response.strengths,
            weaknesses: response.weaknesses,
            recommendations: response.recommendations,
            question_feedback: response.question_feedback,
            created_at: Utc::now(),
        }
    }
}
