#![allow(dead_code)]

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use mongodb::bson::doc;
use std::sync::Arc;
use tower::ServiceExt;

use studyforge_api::{
    config::Config,
    create_router,
    middlewares::auth::{JwtClaims, JwtService},
    services::{self, AppState},
};

pub async fn create_test_app() -> Router {
    // Initialize tracing for tests
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    // Load test environment from .env.test
    dotenvy::from_filename(".env.test").ok();

    // Load test configuration
    let config = Config::load().expect("Failed to load test configuration");

    // Connect to test databases
    let mongo_client = mongodb::Client::with_uri_str(&config.mongo_uri)
        .await
        .expect("Failed to connect to test MongoDB");

    let redis_client =
        redis::Client::open(config.redis_uri.clone()).expect("Failed to create test Redis client");

    // Create app state (connection is established inside)
    let app_state = Arc::new(
        AppState::new(config.clone(), mongo_client.clone(), redis_client)
            .await
            .expect("Failed to initialize test app state"),
    );

    // The engine's invariants rest on these indexes
    services::ensure_indexes(&app_state.mongo)
        .await
        .expect("Failed to ensure test indexes");

    // Seed test data
    seed_test_data(&mongo_client, &config.mongo_database).await;

    // Build test router (same as main app)
    create_router(app_state)
}

/// Mints a bearer token the way the external identity service would.
pub fn bearer_token(user_id: &str, role: &str) -> String {
    dotenvy::from_filename(".env.test").ok();
    let config = Config::load().expect("Failed to load test configuration");
    let jwt = JwtService::new(&config.jwt_secret);

    let now = chrono::Utc::now().timestamp();
    let token = jwt
        .generate_token(JwtClaims {
            sub: user_id.to_string(),
            role: role.to_string(),
            exp: (now + 3600) as usize,
            iat: now as usize,
        })
        .expect("Failed to mint test token");

    format!("Bearer {}", token)
}

/// Direct handle to the test database for seeding scenario-local fixtures.
pub async fn test_database() -> mongodb::Database {
    dotenvy::from_filename(".env.test").ok();
    let config = Config::load().expect("Failed to load test configuration");
    let client = mongodb::Client::with_uri_str(&config.mongo_uri)
        .await
        .expect("Failed to connect to test MongoDB");
    client.database(&config.mongo_database)
}

pub async fn request_json(
    app: &Router,
    method: &str,
    uri: &str,
    token: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", token);

    let request = if let Some(json) = body {
        builder = builder.header("content-type", "application/json");
        builder
            .body(Body::from(serde_json::to_string(&json).unwrap()))
            .unwrap()
    } else {
        builder.body(Body::empty()).unwrap()
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };

    (status, json)
}

async fn seed_test_data(mongo_client: &mongodb::Client, db_name: &str) {
    let db = mongo_client.database(db_name);
    let questions = db.collection::<mongodb::bson::Document>("questions");
    let quizzes = db.collection::<mongodb::bson::Document>("quizzes");

    // Five short-answer questions for the unrestricted quiz
    for i in 1..=5 {
        upsert(
            &questions,
            &format!("test-q{}", i),
            doc! {
                "_id": format!("test-q{}", i),
                "topic_id": "test-topic",
                "subject_id": "math",
                "body": { "type": "short_answer", "correct_answer": format!("a{}", i) },
                "steps": [
                    "Restate the problem",
                    "Isolate the unknown",
                    "Solve",
                ],
                "difficulty": "easy",
                "points": 10,
            },
        )
        .await;
    }

    // An essay question plus a quiz mixing it with gradable questions
    upsert(
        &questions,
        "test-essay",
        doc! {
            "_id": "test-essay",
            "topic_id": "test-topic",
            "subject_id": "math",
            "body": { "type": "essay", "guidelines": "Explain your reasoning." },
            "steps": [],
            "difficulty": "medium",
            "points": 20,
        },
    )
    .await;

    // A question with four solution steps for hint ledger tests
    upsert(
        &questions,
        "hint-question",
        doc! {
            "_id": "hint-question",
            "topic_id": "test-topic",
            "subject_id": "math",
            "body": { "type": "multiple_choice", "options": ["1", "2", "3"], "correct_answer": "2" },
            "steps": ["Read", "Plan", "Compute", "Verify"],
            "difficulty": "hard",
            "points": 15,
        },
    )
    .await;

    upsert(
        &quizzes,
        "test-quiz",
        doc! {
            "_id": "test-quiz",
            "title": "Unrestricted quiz",
            "question_ids": ["test-q1", "test-q2", "test-q3", "test-q4", "test-q5"],
            "retake_policy": { "max_attempts": null, "cooldown_minutes": 0 },
        },
    )
    .await;

    upsert(
        &quizzes,
        "essay-quiz",
        doc! {
            "_id": "essay-quiz",
            "title": "Quiz with an essay",
            "question_ids": ["test-q1", "test-q2", "test-essay"],
            "retake_policy": { "max_attempts": null, "cooldown_minutes": 0 },
        },
    )
    .await;

    upsert(
        &quizzes,
        "single-attempt-quiz",
        doc! {
            "_id": "single-attempt-quiz",
            "title": "One attempt only",
            "question_ids": ["test-q1"],
            "retake_policy": { "max_attempts": 1, "cooldown_minutes": 0 },
        },
    )
    .await;

    upsert(
        &quizzes,
        "cooldown-quiz",
        doc! {
            "_id": "cooldown-quiz",
            "title": "Daily cooldown",
            "question_ids": ["test-q1"],
            "retake_policy": { "max_attempts": null, "cooldown_minutes": 1440 },
        },
    )
    .await;

    // Catalog records referenced by adaptive profiles
    upsert(
        &db.collection("topics"),
        "test-topic",
        doc! { "_id": "test-topic", "title": "Algebra" },
    )
    .await;
    upsert(
        &db.collection("resources"),
        "test-resource",
        doc! { "_id": "test-resource", "title": "Worked examples", "url": "https://example.test/r1" },
    )
    .await;
}

async fn upsert(
    collection: &mongodb::Collection<mongodb::bson::Document>,
    id: &str,
    document: mongodb::bson::Document,
) {
    collection
        .replace_one(doc! { "_id": id }, document)
        .upsert(true)
        .await
        .expect("Failed to seed test document");
}
