mod common;

use axum::http::StatusCode;
use serde_json::json;
use uuid::Uuid;

use common::{bearer_token, create_test_app, request_json};

async fn run_quiz(
    app: &axum::Router,
    token: &str,
    quiz_id: &str,
    answers: &[(&str, &str)],
) -> serde_json::Value {
    let (status, session) = request_json(
        app,
        "POST",
        "/api/v1/sessions",
        token,
        Some(json!({ "quiz_id": quiz_id })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "body: {}", session);
    let session_id = session["_id"].as_str().unwrap().to_string();

    for (question_id, selected) in answers {
        let (status, body) = request_json(
            app,
            "POST",
            &format!("/api/v1/sessions/{}/answers", session_id),
            token,
            Some(json!({
                "question_id": question_id,
                "selected_answer": selected,
                "time_spent_seconds": 15,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "body: {}", body);
    }

    let (status, result) = request_json(
        app,
        "POST",
        &format!("/api/v1/sessions/{}/finalize", session_id),
        token,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "body: {}", result);
    result
}

#[tokio::test]
async fn test_essay_questions_are_excluded_from_scoring() {
    let app = create_test_app().await;
    let token = bearer_token(&format!("essay-user-{}", Uuid::new_v4()), "student");

    let result = run_quiz(
        &app,
        &token,
        "essay-quiz",
        &[
            ("test-q1", "a1"),
            ("test-q2", "a2"),
            ("test-essay", "A long argument about the topic."),
        ],
    )
    .await;

    // both gradable answers correct; the essay neither helps nor hurts
    assert_eq!(result["gradable_count"], 2);
    assert_eq!(result["correct_count"], 2);
    assert_eq!(result["score"], 100);

    let feedback = result["question_feedback"].as_array().unwrap();
    let essay_feedback = feedback
        .iter()
        .find(|f| f["question_id"] == "test-essay")
        .expect("essay feedback present");
    assert_eq!(essay_feedback["correct"], serde_json::Value::Null);
}

#[tokio::test]
async fn test_feedback_band_selection() {
    let app = create_test_app().await;

    let perfect_token = bearer_token(&format!("band-hi-{}", Uuid::new_v4()), "student");
    let perfect = run_quiz(
        &app,
        &perfect_token,
        "test-quiz",
        &[
            ("test-q1", "a1"),
            ("test-q2", "a2"),
            ("test-q3", "a3"),
            ("test-q4", "a4"),
            ("test-q5", "a5"),
        ],
    )
    .await;
    assert_eq!(perfect["score"], 100);
    assert_eq!(perfect["feedback"]["title"], "Excellent");

    let zero_token = bearer_token(&format!("band-lo-{}", Uuid::new_v4()), "student");
    let zero = run_quiz(
        &app,
        &zero_token,
        "test-quiz",
        &[("test-q1", "wrong")],
    )
    .await;
    assert_eq!(zero["score"], 0);
    assert_eq!(zero["feedback"]["title"], "Needs review");
}

#[tokio::test]
async fn test_latest_answer_wins_on_resubmission() {
    let app = create_test_app().await;
    let token = bearer_token(&format!("resubmit-{}", Uuid::new_v4()), "student");

    let (_, session) = request_json(
        &app,
        "POST",
        "/api/v1/sessions",
        &token,
        Some(json!({ "quiz_id": "test-quiz" })),
    )
    .await;
    let session_id = session["_id"].as_str().unwrap().to_string();

    for selected in ["wrong", "a1"] {
        request_json(
            &app,
            "POST",
            &format!("/api/v1/sessions/{}/answers", session_id),
            &token,
            Some(json!({
                "question_id": "test-q1",
                "selected_answer": selected,
                "time_spent_seconds": 5,
            })),
        )
        .await;
    }

    let (_, result) = request_json(
        &app,
        "POST",
        &format!("/api/v1/sessions/{}/finalize", session_id),
        &token,
        None,
    )
    .await;

    assert_eq!(result["correct_count"], 1);
    // both submissions count toward total time
    assert_eq!(result["time_taken_seconds"], 10);
}

#[tokio::test]
async fn test_append_feedback_to_result() {
    let app = create_test_app().await;
    let token = bearer_token(&format!("feedback-{}", Uuid::new_v4()), "student");

    let result = run_quiz(&app, &token, "test-quiz", &[("test-q1", "a1")]).await;
    let result_id = result["_id"].as_str().unwrap();
    let before = result["question_feedback"].as_array().unwrap().len();

    let (status, updated) = request_json(
        &app,
        "POST",
        &format!("/api/v1/results/{}/feedback", result_id),
        &token,
        Some(json!({
            "question_id": "test-q1",
            "comment": "Re-derive this without the shortcut next time.",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "body: {}", updated);
    let after = updated["question_feedback"].as_array().unwrap();
    assert_eq!(after.len(), before + 1);
    assert_eq!(
        after.last().unwrap()["comment"],
        "Re-derive this without the shortcut next time."
    );

    // scoring fields stay frozen
    assert_eq!(updated["score"], result["score"]);
    assert_eq!(updated["completed_at"], result["completed_at"]);

    // feedback for a question outside the result is rejected
    let (status, body) = request_json(
        &app,
        "POST",
        &format!("/api/v1/results/{}/feedback", result_id),
        &token,
        Some(json!({ "question_id": "hint-question", "comment": "n/a" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");
}

#[tokio::test]
async fn test_hint_entries_are_linked_to_the_result() {
    let app = create_test_app().await;
    let user_id = format!("linked-{}", Uuid::new_v4());
    let token = bearer_token(&user_id, "student");

    let (_, session) = request_json(
        &app,
        "POST",
        "/api/v1/sessions",
        &token,
        Some(json!({ "quiz_id": "test-quiz" })),
    )
    .await;
    let session_id = session["_id"].as_str().unwrap().to_string();

    // a hint revealed during the attempt, keyed to this session
    let (status, _) = request_json(
        &app,
        "POST",
        "/api/v1/hints",
        &token,
        Some(json!({
            "question_id": "test-q1",
            "session_id": session_id,
            "step_number": 0,
            "points_deducted": 2,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    request_json(
        &app,
        "POST",
        &format!("/api/v1/sessions/{}/answers", session_id),
        &token,
        Some(json!({
            "question_id": "test-q1",
            "selected_answer": "a1",
            "time_spent_seconds": 20,
        })),
    )
    .await;

    let (_, result) = request_json(
        &app,
        "POST",
        &format!("/api/v1/sessions/{}/finalize", session_id),
        &token,
        None,
    )
    .await;

    assert_eq!(result["hint_entry_ids"].as_array().unwrap().len(), 1);
}
