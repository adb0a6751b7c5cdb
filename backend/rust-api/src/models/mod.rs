use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod adaptive;
pub mod analytics;
pub mod hint;
pub mod result;

/// A question as stored in the catalog. Read-only for this service: the
/// attempt engine consumes questions, it never mutates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    #[serde(rename = "_id")]
    pub id: String,
    pub topic_id: Option<String>,
    pub subject_id: Option<String>,
    pub body: QuestionBody,
    /// Ordered solution steps. The length bounds valid hint step indices.
    #[serde(default)]
    pub steps: Vec<String>,
    pub difficulty: Difficulty,
    pub points: u32,
}

impl Question {
    pub fn total_steps(&self) -> u32 {
        self.steps.len() as u32
    }
}

/// Question payload, discriminated by `type`. Grading dispatches with an
/// exhaustive match; adding a variant forces every call site to decide.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestionBody {
    MultipleChoice {
        options: Vec<String>,
        correct_answer: String,
    },
    ShortAnswer {
        correct_answer: String,
    },
    Essay {
        #[serde(default)]
        guidelines: Option<String>,
    },
}

impl QuestionBody {
    pub fn kind(&self) -> &'static str {
        match self {
            QuestionBody::MultipleChoice { .. } => "multiple_choice",
            QuestionBody::ShortAnswer { .. } => "short_answer",
            QuestionBody::Essay { .. } => "essay",
        }
    }

    pub fn is_gradable(&self) -> bool {
        !matches!(self, QuestionBody::Essay { .. })
    }

    /// Type-specific equality check. `None` means the answer cannot be
    /// auto-scored (essay).
    pub fn grade(&self, selected: &str) -> Option<bool> {
        match self {
            QuestionBody::MultipleChoice { correct_answer, .. }
            | QuestionBody::ShortAnswer { correct_answer } => {
                Some(selected.trim() == correct_answer.trim())
            }
            QuestionBody::Essay { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

/// A quiz definition from the catalog, read-only here. The retake policy
/// travels with the quiz and is evaluated by the retake guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quiz {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub question_ids: Vec<String>,
    #[serde(default)]
    pub retake_policy: RetakePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetakePolicy {
    /// Absent or zero means unlimited attempts.
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// Zero means an immediate retake is allowed.
    #[serde(default)]
    pub cooldown_minutes: u32,
}

impl Default for RetakePolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            cooldown_minutes: 0,
        }
    }
}

/// One quiz attempt from start to a terminal state. Owned exclusively by
/// the user who created it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptSession {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub quiz_id: String,
    pub started_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub status: SessionStatus,
    #[serde(default)]
    pub answers: Vec<AnswerRecord>,
    pub device: Option<DeviceContext>,
    /// Set once the session is finalized into a Result.
    pub result_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Completed,
    Abandoned,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Abandoned)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Abandoned => "abandoned",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub question_id: String,
    pub selected_answer: String,
    pub time_spent_seconds: u64,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceContext {
    pub platform: String,
    #[serde(default)]
    pub app_version: Option<String>,
    #[serde(default)]
    pub os_version: Option<String>,
}

#[derive(Debug, Deserialize, validator::Validate)]
pub struct CreateSessionRequest {
    #[validate(length(min = 1, max = 128))]
    pub quiz_id: String,
    pub device: Option<DeviceContext>,
}

#[derive(Debug, Deserialize, validator::Validate)]
pub struct SubmitAnswerRequest {
    #[validate(length(min = 1, max = 128))]
    pub question_id: String,
    #[validate(length(max = 10_000))]
    pub selected_answer: String,
    pub time_spent_seconds: u64,
}
