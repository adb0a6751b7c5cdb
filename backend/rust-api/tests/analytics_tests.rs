mod common;

use axum::http::StatusCode;
use chrono::{Datelike, Utc};
use mongodb::bson::doc;
use serde_json::json;
use serial_test::serial;
use uuid::Uuid;

use common::{bearer_token, create_test_app, request_json, test_database};

/// Seeds a scenario-local question so aggregate counts are isolated from
/// other tests and reruns.
async fn seed_question(question_id: &str, steps: u32) {
    let db = test_database().await;
    let steps: Vec<String> = (0..steps).map(|i| format!("Step {}", i)).collect();
    db.collection("questions")
        .replace_one(
            doc! { "_id": question_id },
            doc! {
                "_id": question_id,
                "topic_id": "test-topic",
                "subject_id": "math",
                "body": { "type": "short_answer", "correct_answer": "x" },
                "steps": steps,
                "difficulty": "medium",
                "points": 10,
            },
        )
        .upsert(true)
        .await
        .expect("Failed to seed question");
}

async fn reveal(
    app: &axum::Router,
    token: &str,
    question_id: &str,
    step: u32,
    time: i64,
    points: i64,
) {
    let (status, body) = request_json(
        app,
        "POST",
        "/api/v1/hints",
        token,
        Some(json!({
            "question_id": question_id,
            "step_number": step,
            "time_spent_on_hint": time,
            "points_deducted": points,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "body: {}", body);
}

#[tokio::test]
#[serial]
async fn test_question_stats_aggregation_and_flag() {
    let app = create_test_app().await;
    let question_id = format!("stats-q-{}", Uuid::new_v4());
    seed_question(&question_id, 5).await;

    // 10 users each view 3 steps and spend 150s: usage=10, avg_steps=3,
    // avg_time=150 — all three flag thresholds met
    for i in 0..10 {
        let token = bearer_token(&format!("stats-user-{}-{}", i, Uuid::new_v4()), "student");
        for step in 0..3 {
            reveal(&app, &token, &question_id, step, 50, 1).await;
        }
    }

    let (status, stats) = request_json(
        &app,
        "GET",
        &format!("/api/v1/hints/question/{}/stats", question_id),
        &bearer_token("any-user", "student"),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK, "body: {}", stats);
    assert_eq!(stats["usage_count"], 10);
    assert_eq!(stats["unique_users"], 10);
    assert_eq!(stats["avg_steps_viewed"], 3.0);
    assert_eq!(stats["avg_time_spent_seconds"], 150.0);
    assert_eq!(stats["total_points_deducted"], 30);
    assert_eq!(stats["needs_better_hints"], true);
}

#[tokio::test]
#[serial]
async fn test_needs_better_hints_requires_all_three_thresholds() {
    let app = create_test_app().await;
    let question_id = format!("stats-q9-{}", Uuid::new_v4());
    seed_question(&question_id, 5).await;

    // 9 users with otherwise-flagging metrics: usage falls short
    for i in 0..9 {
        let token = bearer_token(&format!("stats9-user-{}-{}", i, Uuid::new_v4()), "student");
        for step in 0..3 {
            reveal(&app, &token, &question_id, step, 50, 1).await;
        }
    }

    let (status, stats) = request_json(
        &app,
        "GET",
        &format!("/api/v1/hints/question/{}/stats", question_id),
        &bearer_token("any-user", "student"),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["usage_count"], 9);
    assert_eq!(stats["avg_steps_viewed"], 3.0);
    assert_eq!(stats["needs_better_hints"], false);
}

#[tokio::test]
async fn test_question_stats_for_unused_question_are_zeroed() {
    let app = create_test_app().await;
    let question_id = format!("stats-empty-{}", Uuid::new_v4());
    seed_question(&question_id, 3).await;

    let (status, stats) = request_json(
        &app,
        "GET",
        &format!("/api/v1/hints/question/{}/stats", question_id),
        &bearer_token("any-user", "student"),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["usage_count"], 0);
    assert_eq!(stats["unique_users"], 0);
    assert_eq!(stats["needs_better_hints"], false);
}

#[tokio::test]
async fn test_user_analytics_totals_and_monthly_trend() {
    let app = create_test_app().await;
    let user_id = format!("analytics-user-{}", Uuid::new_v4());
    let token = bearer_token(&user_id, "student");

    let q1 = format!("ua-q1-{}", Uuid::new_v4());
    let q2 = format!("ua-q2-{}", Uuid::new_v4());
    seed_question(&q1, 5).await;
    seed_question(&q2, 5).await;

    // two entries: q1 with 2 steps, q2 with 4 steps
    reveal(&app, &token, &q1, 0, 20, 2).await;
    reveal(&app, &token, &q1, 1, 20, 2).await;
    for step in 0..4 {
        reveal(&app, &token, &q2, step, 10, 1).await;
    }

    let (status, analytics) = request_json(
        &app,
        "GET",
        &format!("/api/v1/hints/user/{}/analytics", user_id),
        &token,
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK, "body: {}", analytics);
    assert_eq!(analytics["total_hints_used"], 2);
    assert_eq!(analytics["avg_steps_per_hint"], 3.0);
    assert_eq!(analytics["by_difficulty"]["medium"], 2);
    assert_eq!(analytics["by_type"]["step_by_step"], 2);

    // everything recorded just now lands in the current calendar month
    let now = Utc::now();
    let month = format!("{:04}-{:02}", now.year(), now.month());
    let trend = analytics["monthly_trend"].as_array().unwrap();
    let bucket = trend
        .iter()
        .find(|b| b["month"] == month.as_str())
        .expect("current month bucket present");
    assert_eq!(bucket["hints_used"], 2);
    assert_eq!(bucket["steps_viewed"], 6);
    assert_eq!(bucket["time_spent_seconds"], 80);
}

#[tokio::test]
async fn test_user_analytics_respects_ownership() {
    let app = create_test_app().await;
    let user_id = format!("analytics-own-{}", Uuid::new_v4());

    let (status, _) = request_json(
        &app,
        "GET",
        &format!("/api/v1/hints/user/{}/analytics", user_id),
        &bearer_token(&format!("peek-{}", Uuid::new_v4()), "student"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // admins may read anyone; an unused user degrades to zeroed analytics
    let (status, analytics) = request_json(
        &app,
        "GET",
        &format!("/api/v1/hints/user/{}/analytics", user_id),
        &bearer_token("root", "admin"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(analytics["total_hints_used"], 0);
}
