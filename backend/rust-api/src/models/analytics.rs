use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Aggregated hint usage for one question. Advisory data: readers must
/// tolerate zeroed values when aggregation degrades.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionHintStats {
    pub question_id: String,
    pub usage_count: u64,
    pub unique_users: u64,
    pub avg_steps_viewed: f64,
    pub avg_time_spent_seconds: f64,
    pub total_points_deducted: i64,
    pub needs_better_hints: bool,
}

impl QuestionHintStats {
    pub fn empty(question_id: impl Into<String>) -> Self {
        Self {
            question_id: question_id.into(),
            usage_count: 0,
            unique_users: 0,
            avg_steps_viewed: 0.0,
            avg_time_spent_seconds: 0.0,
            total_points_deducted: 0,
            needs_better_hints: false,
        }
    }
}

/// All three thresholds conjunctively; values are fixed by product, not
/// configurable.
pub fn needs_better_hints(usage_count: u64, avg_steps_viewed: f64, avg_time_spent: f64) -> bool {
    usage_count >= 10 && avg_steps_viewed >= 3.0 && avg_time_spent >= 120.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserHintAnalytics {
    pub user_id: String,
    pub total_hints_used: u64,
    pub avg_steps_per_hint: f64,
    pub by_difficulty: BTreeMap<String, u64>,
    pub by_type: BTreeMap<String, u64>,
    /// Trailing calendar-month buckets, oldest first.
    pub monthly_trend: Vec<MonthlyHintTrend>,
}

impl UserHintAnalytics {
    pub fn empty(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            total_hints_used: 0,
            avg_steps_per_hint: 0.0,
            by_difficulty: BTreeMap::new(),
            by_type: BTreeMap::new(),
            monthly_trend: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthlyHintTrend {
    /// Calendar month key, `YYYY-MM`.
    pub month: String,
    pub hints_used: u64,
    pub steps_viewed: u64,
    pub time_spent_seconds: i64,
}
