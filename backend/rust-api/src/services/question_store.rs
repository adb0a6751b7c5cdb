use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::Database;
use redis::aio::ConnectionManager;

use crate::error::ApiError;
use crate::metrics::{record_cache_hit, record_cache_miss, track_cache_operation};
use crate::models::{Question, Quiz};

const QUESTION_CACHE_TTL: u64 = 300; // 5 minutes

/// Read-only access to the content catalog. Questions and quizzes are
/// consumed, never mutated, by the attempt engine; hot question documents
/// are served read-through from Redis.
pub struct QuestionStore {
    mongo: Database,
    redis: ConnectionManager,
}

impl QuestionStore {
    pub fn new(mongo: Database, redis: ConnectionManager) -> Self {
        Self { mongo, redis }
    }

    pub async fn fetch_question(&self, question_id: &str) -> Result<Question, ApiError> {
        if let Some(question) = self.cached_question(question_id).await {
            record_cache_hit();
            return Ok(question);
        }
        record_cache_miss();

        let question = self
            .mongo
            .collection::<Question>("questions")
            .find_one(doc! { "_id": question_id })
            .await?
            .ok_or_else(|| ApiError::not_found(format!("Question {} not found", question_id)))?;

        self.cache_question(&question).await;

        Ok(question)
    }

    /// Batch fetch, uncached; preserves the order of `question_ids` and
    /// errors if any id is unknown so scoring never grades half a quiz.
    pub async fn fetch_questions(&self, question_ids: &[String]) -> Result<Vec<Question>, ApiError> {
        if question_ids.is_empty() {
            return Ok(Vec::new());
        }

        let found: Vec<Question> = self
            .mongo
            .collection::<Question>("questions")
            .find(doc! { "_id": { "$in": question_ids } })
            .await?
            .try_collect()
            .await?;

        let mut by_id: std::collections::HashMap<&str, Question> = found
            .iter()
            .map(|q| (q.id.as_str(), q.clone()))
            .collect();

        let mut ordered = Vec::with_capacity(question_ids.len());
        let mut missing = Vec::new();
        for id in question_ids {
            match by_id.remove(id.as_str()) {
                Some(q) => ordered.push(q),
                None => missing.push(id.as_str()),
            }
        }

        if !missing.is_empty() {
            return Err(ApiError::not_found(format!(
                "Questions not found: {}",
                missing.join(", ")
            )));
        }

        Ok(ordered)
    }

    pub async fn fetch_quiz(&self, quiz_id: &str) -> Result<Quiz, ApiError> {
        self.mongo
            .collection::<Quiz>("quizzes")
            .find_one(doc! { "_id": quiz_id })
            .await?
            .ok_or_else(|| ApiError::not_found(format!("Quiz {} not found", quiz_id)))
    }

    async fn cached_question(&self, question_id: &str) -> Option<Question> {
        let mut conn = self.redis.clone();
        let cache_key = format!("question:cache:{}", question_id);

        let raw: Option<String> = redis::cmd("GET")
            .arg(&cache_key)
            .query_async(&mut conn)
            .await
            .ok()?;

        raw.and_then(|json| serde_json::from_str(&json).ok())
    }

    async fn cache_question(&self, question: &Question) {
        let Ok(json) = serde_json::to_string(question) else {
            return;
        };

        let mut conn = self.redis.clone();
        let cache_key = format!("question:cache:{}", question.id);

        // Cache failures only cost the next reader a Mongo round trip.
        let _ = track_cache_operation("setex", async {
            redis::cmd("SETEX")
                .arg(&cache_key)
                .arg(QUESTION_CACHE_TTL)
                .arg(json)
                .query_async::<()>(&mut conn)
                .await
                .map_err(anyhow::Error::new)
        })
        .await;
    }
}
