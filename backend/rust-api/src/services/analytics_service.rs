use std::collections::BTreeMap;

use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::{Collection, Database};
use redis::aio::ConnectionManager;

use crate::error::ApiError;
use crate::metrics::{record_cache_hit, record_cache_miss, track_cache_operation};
use crate::models::analytics::{
    needs_better_hints, MonthlyHintTrend, QuestionHintStats, UserHintAnalytics,
};
use crate::utils::time::month_floor;

const STATS_CACHE_TTL: u64 = 300; // 5 minutes

/// Query-time aggregation over the hint ledger. Read-only and advisory:
/// pipeline failures degrade to zeroed results instead of failing the
/// request.
pub struct AnalyticsService {
    mongo: Database,
    redis: ConnectionManager,
    trend_months: u32,
}

impl AnalyticsService {
    pub fn new(mongo: Database, redis: ConnectionManager, trend_months: u32) -> Self {
        Self {
            mongo,
            redis,
            trend_months,
        }
    }

    fn ledger(&self) -> Collection<Document> {
        self.mongo.collection("hint_ledger")
    }

    pub async fn question_stats(&self, question_id: &str) -> QuestionHintStats {
        if let Some(cached) = self.cached_question_stats(question_id).await {
            record_cache_hit();
            return cached;
        }
        record_cache_miss();

        let stats = match self.compute_question_stats(question_id).await {
            Ok(stats) => stats,
            Err(err) => {
                tracing::warn!(
                    "Question stats aggregation degraded to zeroes for {}: {:#}",
                    question_id,
                    err
                );
                QuestionHintStats::empty(question_id)
            }
        };

        self.cache_question_stats(&stats).await;

        stats
    }

    async fn compute_question_stats(
        &self,
        question_id: &str,
    ) -> Result<QuestionHintStats, ApiError> {
        let pipeline = vec![
            doc! { "$match": { "question_id": question_id } },
            doc! { "$group": {
                "_id": Bson::Null,
                "usage_count": { "$sum": 1 },
                "users": { "$addToSet": "$user_id" },
                "avg_steps_viewed": { "$avg": { "$size": { "$ifNull": ["$steps_viewed", []] } } },
                "avg_time_spent": { "$avg": "$time_spent_on_hint_seconds" },
                "total_points_deducted": { "$sum": "$points_deducted" },
            }},
            doc! { "$project": {
                "_id": 0,
                "usage_count": 1,
                "unique_users": { "$size": "$users" },
                "avg_steps_viewed": 1,
                "avg_time_spent": 1,
                "total_points_deducted": 1,
            }},
        ];

        let mut cursor = self.ledger().aggregate(pipeline).await?;
        let Some(row) = cursor.try_next().await? else {
            return Ok(QuestionHintStats::empty(question_id));
        };

        let usage_count = doc_u64(&row, "usage_count");
        let avg_steps_viewed = doc_f64(&row, "avg_steps_viewed");
        let avg_time_spent_seconds = doc_f64(&row, "avg_time_spent");

        Ok(QuestionHintStats {
            question_id: question_id.to_string(),
            usage_count,
            unique_users: doc_u64(&row, "unique_users"),
            avg_steps_viewed,
            avg_time_spent_seconds,
            total_points_deducted: doc_i64(&row, "total_points_deducted"),
            needs_better_hints: needs_better_hints(
                usage_count,
                avg_steps_viewed,
                avg_time_spent_seconds,
            ),
        })
    }

    pub async fn user_analytics(&self, user_id: &str) -> UserHintAnalytics {
        match self.compute_user_analytics(user_id).await {
            Ok(analytics) => analytics,
            Err(err) => {
                tracing::warn!(
                    "User hint analytics degraded to zeroes for {}: {:#}",
                    user_id,
                    err
                );
                UserHintAnalytics::empty(user_id)
            }
        }
    }

    async fn compute_user_analytics(&self, user_id: &str) -> Result<UserHintAnalytics, ApiError> {
        // created_at is stored RFC3339, so lexicographic $gte works and the
        // first 7 chars are the calendar month key.
        let cutoff = mongodb::bson::to_bson(&month_floor(Utc::now(), self.trend_months - 1))
            .map_err(anyhow::Error::new)?;

        let pipeline = vec![
            doc! { "$match": { "user_id": user_id } },
            doc! { "$facet": {
                "totals": [
                    { "$group": {
                        "_id": Bson::Null,
                        "total": { "$sum": 1 },
                        "avg_steps": { "$avg": { "$size": { "$ifNull": ["$steps_viewed", []] } } },
                    }},
                ],
                "by_difficulty": [
                    { "$group": {
                        "_id": { "$ifNull": ["$context.difficulty", "unknown"] },
                        "count": { "$sum": 1 },
                    }},
                ],
                "by_type": [
                    { "$group": { "_id": "$hint_type", "count": { "$sum": 1 } } },
                ],
                "monthly": [
                    { "$match": { "created_at": { "$gte": cutoff } } },
                    { "$group": {
                        "_id": { "$substrCP": ["$created_at", 0, 7] },
                        "hints_used": { "$sum": 1 },
                        "steps_viewed": { "$sum": { "$size": { "$ifNull": ["$steps_viewed", []] } } },
                        "time_spent": { "$sum": "$time_spent_on_hint_seconds" },
                    }},
                    { "$sort": { "_id": 1 } },
                ],
            }},
        ];

        let mut cursor = self.ledger().aggregate(pipeline).await?;
        let Some(facets) = cursor.try_next().await? else {
            return Ok(UserHintAnalytics::empty(user_id));
        };

        let totals = facet_rows(&facets, "totals");
        let (total_hints_used, avg_steps_per_hint) = match totals.first() {
            Some(row) => (doc_u64(row, "total"), doc_f64(row, "avg_steps")),
            None => (0, 0.0),
        };

        let by_difficulty = bucket_counts(&facet_rows(&facets, "by_difficulty"));
        let by_type = bucket_counts(&facet_rows(&facets, "by_type"));

        let monthly_trend = facet_rows(&facets, "monthly")
            .iter()
            .map(|row| MonthlyHintTrend {
                month: row.get_str("_id").unwrap_or_default().to_string(),
                hints_used: doc_u64(row, "hints_used"),
                steps_viewed: doc_u64(row, "steps_viewed"),
                time_spent_seconds: doc_i64(row, "time_spent"),
            })
            .collect();

        Ok(UserHintAnalytics {
            user_id: user_id.to_string(),
            total_hints_used,
            avg_steps_per_hint,
            by_difficulty,
            by_type,
            monthly_trend,
        })
    }

    async fn cached_question_stats(&self, question_id: &str) -> Option<QuestionHintStats> {
        let mut conn = self.redis.clone();
        let cache_key = format!("hint:stats:question:{}", question_id);

        let raw: Option<String> = redis::cmd("GET")
            .arg(&cache_key)
            .query_async(&mut conn)
            .await
            .ok()?;

        raw.and_then(|json| serde_json::from_str(&json).ok())
    }

    async fn cache_question_stats(&self, stats: &QuestionHintStats) {
        let Ok(json) = serde_json::to_string(stats) else {
            return;
        };

        let mut conn = self.redis.clone();
        let cache_key = format!("hint:stats:question:{}", stats.question_id);

        let _ = track_cache_operation("setex", async {
            redis::cmd("SETEX")
                .arg(&cache_key)
                .arg(STATS_CACHE_TTL)
                .arg(json)
                .query_async::<()>(&mut conn)
                .await
                .map_err(anyhow::Error::new)
        })
        .await;
    }
}

fn facet_rows(facets: &Document, key: &str) -> Vec<Document> {
    facets
        .get_array(key)
        .map(|rows| {
            rows.iter()
                .filter_map(|b| b.as_document().cloned())
                .collect()
        })
        .unwrap_or_default()
}

fn bucket_counts(rows: &[Document]) -> BTreeMap<String, u64> {
    rows.iter()
        .map(|row| {
            let key = row.get_str("_id").unwrap_or("unknown").to_string();
            (key, doc_u64(row, "count"))
        })
        .collect()
}

fn doc_f64(doc: &Document, key: &str) -> f64 {
    match doc.get(key) {
        Some(Bson::Double(v)) => *v,
        Some(Bson::Int32(v)) => *v as f64,
        Some(Bson::Int64(v)) => *v as f64,
        _ => 0.0,
    }
}

fn doc_i64(doc: &Document, key: &str) -> i64 {
    match doc.get(key) {
        Some(Bson::Int64(v)) => *v,
        Some(Bson::Int32(v)) => *v as i64,
        Some(Bson::Double(v)) => *v as i64,
        _ => 0,
    }
}

fn doc_u64(doc: &Document, key: &str) -> u64 {
    doc_i64(doc, key).max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_extraction_tolerates_mixed_bson_types() {
        let row = doc! { "a": 3_i32, "b": 4_i64, "c": 2.5_f64 };
        assert_eq!(doc_u64(&row, "a"), 3);
        assert_eq!(doc_i64(&row, "b"), 4);
        assert_eq!(doc_f64(&row, "c"), 2.5);
        assert_eq!(doc_f64(&row, "missing"), 0.0);
    }

    #[test]
    fn bucket_counts_keyed_by_group_id() {
        let rows = vec![
            doc! { "_id": "easy", "count": 3_i32 },
            doc! { "_id": "hard", "count": 1_i64 },
        ];
        let counts = bucket_counts(&rows);
        assert_eq!(counts.get("easy"), Some(&3));
        assert_eq!(counts.get("hard"), Some(&1));
    }
}
