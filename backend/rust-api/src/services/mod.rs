use crate::config::Config;
use mongodb::bson::{doc, Document};
use mongodb::options::IndexOptions;
use mongodb::{Client as MongoClient, Database, IndexModel};
use redis::aio::ConnectionManager;

pub struct AppState {
    pub config: Config,
    pub mongo: Database,
    pub redis: ConnectionManager,
}

impl AppState {
    pub async fn new(
        config: Config,
        mongo_client: MongoClient,
        redis_client: redis::Client,
    ) -> anyhow::Result<Self> {
        let mongo = mongo_client.database(&config.mongo_database);

        tracing::info!("Attempting to connect to Redis...");

        // Create ConnectionManager with longer timeout
        let redis = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            ConnectionManager::new(redis_client),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

        tracing::info!("Redis ConnectionManager created, testing with PING...");

        // Test connection
        let mut conn = redis.clone();
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

        tracing::info!("Redis connection established successfully");

        Ok(Self {
            config,
            mongo,
            redis,
        })
    }
}

/// Creates the unique indexes the engine's invariants rest on. Idempotent;
/// called at startup and before integration test runs.
///
/// - `hint_ledger`: one entry per (user, question, session) — the upsert key.
/// - `results`: one Result per finalized session.
/// - `attempt_sessions`: at most one in-progress session per (user, quiz),
///   enforced at the store layer rather than in application logic.
pub async fn ensure_indexes(db: &Database) -> anyhow::Result<()> {
    let hint_index = IndexModel::builder()
        .keys(doc! { "user_id": 1, "question_id": 1, "session_id": 1 })
        .options(IndexOptions::builder().unique(true).build())
        .build();
    db.collection::<Document>("hint_ledger")
        .create_index(hint_index)
        .await?;

    let result_index = IndexModel::builder()
        .keys(doc! { "session_id": 1 })
        .options(IndexOptions::builder().unique(true).build())
        .build();
    db.collection::<Document>("results")
        .create_index(result_index)
        .await?;

    let active_session_index = IndexModel::builder()
        .keys(doc! { "user_id": 1, "quiz_id": 1 })
        .options(
            IndexOptions::builder()
                .unique(true)
                .partial_filter_expression(doc! { "status": "in_progress" })
                .build(),
        )
        .build();
    db.collection::<Document>("attempt_sessions")
        .create_index(active_session_index)
        .await?;

    tracing::info!("Store indexes ensured");
    Ok(())
}

pub mod adaptive_service;
pub mod analytics_service;
pub mod hint_service;
pub mod question_store;
pub mod retake_guard;
pub mod scoring_service;
pub mod session_service;
