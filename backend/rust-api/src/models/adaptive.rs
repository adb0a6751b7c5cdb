use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Per-user difficulty level and rule set driving content and difficulty
/// recommendations. One profile per user (unique index on `user_id`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveProfile {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub current_level: DifficultyLevel,
    /// Evaluated in list order; effects apply cumulatively.
    #[serde(default)]
    pub adjustment_rules: Vec<AdjustmentRule>,
    #[serde(default)]
    pub recommended_content: Vec<ContentRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifficultyLevel {
    Beginner,
    Intermediate,
    Advanced,
}

impl DifficultyLevel {
    fn ordinal(self) -> i32 {
        match self {
            DifficultyLevel::Beginner => 0,
            DifficultyLevel::Intermediate => 1,
            DifficultyLevel::Advanced => 2,
        }
    }

    /// Moves the level by `delta` ordinal steps, clamped to the
    /// beginner..advanced range.
    pub fn shifted(self, delta: i32) -> Self {
        match (self.ordinal() + delta).clamp(0, 2) {
            0 => DifficultyLevel::Beginner,
            1 => DifficultyLevel::Intermediate,
            _ => DifficultyLevel::Advanced,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DifficultyLevel::Beginner => "beginner",
            DifficultyLevel::Intermediate => "intermediate",
            DifficultyLevel::Advanced => "advanced",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustmentRule {
    pub metric: MetricKind,
    pub threshold: f64,
    pub action: RuleAction,
    /// Required iff `action` is `suggest_resource`.
    #[serde(default)]
    pub resource_ref: Option<ContentRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Score,
    TimeSpent,
    Accuracy,
    CompletionRate,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Score => "score",
            MetricKind::TimeSpent => "time_spent",
            MetricKind::Accuracy => "accuracy",
            MetricKind::CompletionRate => "completion_rate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    IncreaseDifficulty,
    DecreaseDifficulty,
    SuggestResource,
}

/// Explicit tagged reference: the `kind` decides which catalog collection
/// `id` points into, resolved through a lookup at the call site rather than
/// any runtime reflection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentRef {
    Topic { id: String },
    Quiz { id: String },
    Resource { id: String },
}

impl ContentRef {
    pub fn kind(&self) -> &'static str {
        match self {
            ContentRef::Topic { .. } => "topic",
            ContentRef::Quiz { .. } => "quiz",
            ContentRef::Resource { .. } => "resource",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            ContentRef::Topic { id } | ContentRef::Quiz { id } | ContentRef::Resource { id } => id,
        }
    }

    /// Kind → collection lookup table.
    pub fn collection(&self) -> &'static str {
        match self {
            ContentRef::Topic { .. } => "topics",
            ContentRef::Quiz { .. } => "quizzes",
            ContentRef::Resource { .. } => "resources",
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProfileRequest {
    #[validate(length(min = 1, max = 128))]
    pub user_id: String,
    pub current_level: Option<DifficultyLevel>,
    #[serde(default)]
    pub adjustment_rules: Vec<AdjustmentRule>,
    #[serde(default)]
    pub recommended_content: Vec<ContentRef>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProfileRequest {
    pub current_level: Option<DifficultyLevel>,
    pub adjustment_rules: Option<Vec<AdjustmentRule>>,
    pub recommended_content: Option<Vec<ContentRef>>,
}
