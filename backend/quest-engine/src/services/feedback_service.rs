use std::{collections::HashMap, sync::Arc};

use anyhow::{Context, Result};
use reqwest::Client;

use crate::{
    config::FeedbackSettings,
    metrics::FEEDBACK_REQUESTS_TOTAL,
    models::{
        feedback::{FeedbackAnswer, FeedbackRequest, FeedbackResponse, StudentFeedback},
        job::JobReport,
        quest::{AnswerAttempt, Question},
        AttemptId, QuestId, QuestionId, StudentId,
    },
    store::QuestStore,
    utils::retry::{retry_async_if, RetryConfig},
};

#[derive(Debug, thiserror::Error)]
pub enum FeedbackError {
    #[error("feedback service returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("feedback service request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("feedback service response could not be parsed: {0}")]
    Decode(#[source] reqwest::Error),
}

impl FeedbackError {
    /// Transport errors and 5xx responses may succeed on a later try.
    pub fn is_retryable(&self) -> bool {
        match self {
            FeedbackError::Status { status, .. } => *status >= 500,
            FeedbackError::Transport(_) => true,
            FeedbackError::Decode(_) => false,
        }
    }

    pub fn status_label(&self) -> &'static str {
        match self {
            FeedbackError::Status { .. } => "http_error",
            FeedbackError::Transport(_) => "unreachable",
            FeedbackError::Decode(_) => "bad_response",
        }
    }
}

/// Builds the request body: one entry per answer attempt whose question is
/// part of the quest.
pub fn build_request(
    student_id: StudentId,
    quest_id: QuestId,
    questions: &[Question],
    answer_attempts: &[AnswerAttempt],
) -> FeedbackRequest {
    let by_id: HashMap<QuestionId, &Question> = questions
        .iter()
        .map(|question| (question.id, question))
        .collect();

    let answers = answer_attempts
        .iter()
        .filter_map(|answer_attempt| {
            let question = by_id.get(&answer_attempt.question_id)?;
            let selected = question.answer(answer_attempt.answer_id);

            let explanation = selected
                .and_then(|answer| answer.reason.as_deref())
                .filter(|reason| !reason.is_empty())
                .or(question.explanation.as_deref())
                .unwrap_or_default()
                .to_string();

            Some(FeedbackAnswer {
                question_id: question.id,
                question_text: question.text.clone(),
                cognitive_level: question.cognitive_level,
                topic: question.topic_or_default().to_string(),
                selected_answer: selected
                    .map(|answer| answer.text.clone())
                    .unwrap_or_default(),
                is_selected: answer_attempt.is_selected,
                answer_is_correct: selected.is_some_and(|answer| answer.is_correct),
                is_correct: answer_attempt.is_correct,
                correct_answer: question
                    .first_correct_answer()
                    .map(|answer| answer.text.clone())
                    .unwrap_or_default(),
                explanation,
            })
        })
        .collect();

    FeedbackRequest {
        student_id,
        quest_id,
        answers,
    }
}

/// HTTP client for the feedback-generation service.
#[derive(Clone)]
pub struct FeedbackClient {
    http: Client,
    endpoint: String,
    retry: RetryConfig,
}

impl FeedbackClient {
    pub fn new(settings: &FeedbackSettings) -> Result<Self> {
        let http = Client::builder()
            .timeout(settings.timeout())
            .build()
            .context("Failed to build feedback HTTP client")?;
        Ok(Self {
            http,
            endpoint: format!("{}/generate_feedback", settings.url.trim_end_matches('/')),
            retry: settings.retry_config(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn generate(
        &self,
        request: &FeedbackRequest,
    ) -> Result<FeedbackResponse, FeedbackError> {
        retry_async_if(
            self.retry.clone(),
            || self.post_once(request),
            FeedbackError::is_retryable,
        )
        .await
    }

    async fn post_once(&self, request: &FeedbackRequest) -> Result<FeedbackResponse, FeedbackError> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(FeedbackError::Transport)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(FeedbackError::Status { status, body });
        }

        response.json().await.map_err(FeedbackError::Decode)
    }
}

/// Generates and stores feedback for one attempt. Service failures are
/// logged and reported as a skip; they never fail the job.
pub struct FeedbackService {
    store: Arc<dyn QuestStore>,
    client: FeedbackClient,
}

impl FeedbackService {
    pub fn new(store: Arc<dyn QuestStore>, client: FeedbackClient) -> Self {
        Self { store, client }
    }

    pub async fn generate_for_attempt(&self, attempt_id: AttemptId) -> Result<JobReport> {
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

        let questions = self.store.questions_for_quest(attempt.quest_id).await?;
        let answer_attempts = self.store.answer_attempts_for(attempt_id).await?;
        let request = build_request(
            attempt.student_id,
            attempt.quest_id,
            &questions,
            &answer_attempts,
        );

        let response = match self.client.generate(&request).await {
            Ok(response) => response,
            Err(err) => {
                FEEDBACK_REQUESTS_TOTAL
                    .with_label_values(&[err.status_label()])
                    .inc();
                tracing::warn!(
                    attempt_id,
                    endpoint = self.client.endpoint(),
                    error = %err,
                    "Feedback generation failed"
                );
                return Ok(JobReport::Skipped(format!(
                    "Feedback for attempt {} not generated: {}",
                    attempt_id, err
                )));
            }
        };
        FEEDBACK_REQUESTS_TOTAL.with_label_values(&["success"]).inc();

        let feedback = StudentFeedback::from_response(attempt_id, response);
        self.store.upsert_feedback(&feedback).await?;

        tracing::info!(attempt_id, answers = request.answers.len(), "Feedback stored");
        Ok(JobReport::Completed(format!(
            "Feedback stored for attempt {} ({} answer(s))",
            attempt_id,
            request.answers.len()
        )))
    }
}
