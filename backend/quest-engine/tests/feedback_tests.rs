use eduquest_engine::{
    config::FeedbackSettings,
    models::{
        job::{Job, JobReport},
        quest::QuestType,
    },
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod common;

use common::Fixture;

fn feedback_body(recommendations: &str) -> serde_json::Value {
    json!({
        "quest_summary": {"headline": "Solid effort", "score": "1/2"},
        "subtopic_feedback": [{"topic": "General", "feedback": "Review the basics"}],
        "study_tips": ["Re-read chapter 2"],
        "strengths": ["Question 1"],
        "weaknesses": ["Question 2"],
        "recommendations": recommendations,
        "question_feedback": {"1": "Correct", "2": "Check the definition"}
    })
}

/// Student 1, quest 1 with two questions, and submitted-ready attempt 1
/// answering question 1 right and question 2 wrong.
async fn answered_attempt(fixture: &Fixture) {
    fixture.student(1).await;
    fixture.quest(1, 1, QuestType::EduquestMcq).await;
    fixture.question(1, 1, 5.0, &[true, false]).await;
    fixture.question(2, 1, 5.0, &[true, false]).await;
    fixture.attempt(1, 1, 1).await;
    fixture.answer(1, 1, 1, 10, true, false).await;
    fixture.answer(2, 1, 2, 21, false, false).await;
}

fn settings(server: &MockServer, max_attempts: usize) -> FeedbackSettings {
    FeedbackSettings {
        url: server.uri(),
        timeout_secs: 5,
        max_attempts,
        backoff_ms: 10,
    }
}

#[tokio::test]
async fn test_submission_stores_generated_feedback() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/generate_feedback"))
        .and(body_partial_json(json!({"student_id": 1, "quest_id": 1})))
        .respond_with(ResponseTemplate::new(200).set_body_json(feedback_body("Keep practicing")))
        .expect(1)
        .mount(&server)
        .await;

    let fixture = Fixture::with_feedback_url(&server.uri());
    answered_attempt(&fixture).await;
    fixture.submit(1).await;
    fixture.drain().await;

    let feedback = fixture.store.feedback_for(1).await.unwrap();
    assert_eq!(feedback.recommendations, "Keep practicing");
    assert_eq!(feedback.study_tips, vec![json!("Re-read chapter 2")]);
    assert_eq!(feedback.quest_summary["headline"], "Solid effort");
    assert_eq!(feedback.question_feedback.len(), 2);
}

#[tokio::test]
async fn test_request_carries_selected_and_correct_answers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/generate_feedback"))
        .and(body_partial_json(json!({
            "answers": [
                {
                    "question_id": 1,
                    "selected_answer": "Option 0",
                    "is_correct": true,
                    "correct_answer": "Option 0",
                    "topic": "General"
                },
                {
                    "question_id": 2,
                    "selected_answer": "Option 1",
                    "answer_is_correct": false,
                    "is_correct": false,
                    "correct_answer": "Option 0"
                }
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(feedback_body("ok")))
        .expect(1)
        .mount(&server)
        .await;

    let fixture = Fixture::with_feedback_url(&server.uri());
    answered_attempt(&fixture).await;
    // submitted without going through the trigger, so nothing is queued
    let mut attempt = fixture.store.attempt(1).await.unwrap();
    attempt.submitted = true;
    fixture.store.replace_attempt(attempt).await;

    let report = fixture
        .runner()
        .execute(Job::GenerateFeedback { attempt_id: 1 })
        .await
        .unwrap();
    assert!(report.is_completed(), "{:?}", report);
}

#[tokio::test]
async fn test_server_error_leaves_no_feedback() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/generate_feedback"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model overloaded"))
        .expect(1)
        .mount(&server)
        .await;

    let fixture = Fixture::with_feedback(settings(&server, 1));
    answered_attempt(&fixture).await;
    fixture.submit(1).await;
    fixture.drain().await;

    assert!(fixture.store.feedback_for(1).await.is_none());
    // the other submission jobs are unaffected
    assert_eq!(fixture.total_points(1).await, 5.0);
    assert!(fixture.store.cognitive_profile(1).await.is_some());
}

#[tokio::test]
async fn test_failure_is_reported_as_skip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/generate_feedback"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let fixture = Fixture::with_feedback(settings(&server, 1));
    answered_attempt(&fixture).await;
    fixture.submit(1).await;

    let report = fixture
        .runner()
        .execute(Job::GenerateFeedback { attempt_id: 1 })
        .await
        .unwrap();
    match report {
        JobReport::Skipped(message) => assert!(message.contains("502"), "{}", message),
        other => panic!("expected skip, got {:?}", other),
    }
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/generate_feedback"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/generate_feedback"))
        .respond_with(ResponseTemplate::new(200).set_body_json(feedback_body("Second try")))
        .with_priority(2)
        .expect(1)
        .mount(&server)
        .await;

    let fixture = Fixture::with_feedback(settings(&server, 3));
    answered_attempt(&fixture).await;
    fixture.submit(1).await;
    fixture.drain().await;

    let feedback = fixture.store.feedback_for(1).await.unwrap();
    assert_eq!(feedback.recommendations, "Second try");
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/generate_feedback"))
        .respond_with(ResponseTemplate::new(422).set_body_string("bad payload"))
        .expect(1)
        .mount(&server)
        .await;

    let fixture = Fixture::with_feedback(settings(&server, 3));
    answered_attempt(&fixture).await;
    fixture.submit(1).await;
    fixture.drain().await;

    assert!(fixture.store.feedback_for(1).await.is_none());
}

#[tokio::test]
async fn test_regeneration_replaces_stored_feedback() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/generate_feedback"))
        .respond_with(ResponseTemplate::new(200).set_body_json(feedback_body("First")))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/generate_feedback"))
        .respond_with(ResponseTemplate::new(200).set_body_json(feedback_body("Second")))
        .with_priority(2)
        .mount(&server)
        .await;

    let fixture = Fixture::with_feedback_url(&server.uri());
    answered_attempt(&fixture).await;
    fixture.submit(1).await;
    fixture.drain().await;
    assert_eq!(
        fixture.store.feedback_for(1).await.unwrap().recommendations,
        "First"
    );

    fixture
        .runner()
        .execute(Job::GenerateFeedback { attempt_id: 1 })
        .await
        .unwrap();
    assert_eq!(
        fixture.store.feedback_for(1).await.unwrap().recommendations,
        "Second"
    );
}

#[tokio::test]
async fn test_unreachable_service_does_not_fail_submission() {
    let fixture = Fixture::new();
    answered_attempt(&fixture).await;
    fixture.submit(1).await;
    fixture.drain().await;

    assert!(fixture.store.feedback_for(1).await.is_none());
    assert_eq!(fixture.total_points(1).await, 5.0);
}

#[tokio::test]
async fn test_unsubmitted_attempt_gets_no_feedback() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/generate_feedback"))
        .respond_with(ResponseTemplate::new(200).set_body_json(feedback_body("never")))
        .expect(0)
        .mount(&server)
        .await;

    let fixture = Fixture::with_feedback_url(&server.uri());
    answered_attempt(&fixture).await;

    let report = fixture
        .runner()
        .execute(Job::GenerateFeedback { attempt_id: 1 })
        .await
        .unwrap();
    assert_eq!(
        report,
        JobReport::Skipped("Quest attempt 1 is not submitted".to_string())
    );
}

#[tokio::test]
async fn test_resaving_after_failure_regenerates_feedback() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/generate_feedback"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/generate_feedback"))
        .respond_with(ResponseTemplate::new(200).set_body_json(feedback_body("Recovered")))
        .with_priority(2)
        .expect(1)
        .mount(&server)
        .await;

    let fixture = Fixture::with_feedback(settings(&server, 1));
    answered_attempt(&fixture).await;
    fixture.submit(1).await;
    fixture.drain().await;
    assert!(fixture.store.feedback_for(1).await.is_none());

    let jobs = fixture.submit(1).await;
    assert_eq!(jobs, vec![Job::GenerateFeedback { attempt_id: 1 }]);
    assert_eq!(fixture.drain().await, 1);

    let feedback = fixture.store.feedback_for(1).await.unwrap();
    assert_eq!(feedback.recommendations, "Recovered");
    // the score was credited once, on the original submission
    assert_eq!(fixture.total_points(1).await, 5.0);

    // stored feedback ends the regeneration
    assert!(fixture.submit(1).await.is_empty());
}
