use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// The finalized, scored outcome of one attempt session. Created exactly
/// once per session (unique index on `session_id`); immutable afterwards
/// except for appended `question_feedback` comments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizResult {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub quiz_id: String,
    pub session_id: String,
    pub question_ids: Vec<String>,
    pub correct_count: u32,
    /// Number of machine-checkable questions in the quiz; essays excluded.
    pub gradable_count: u32,
    /// 0–100, rounded, computed over gradable questions only.
    pub score: u32,
    pub time_taken_seconds: u64,
    pub completed_at: DateTime<Utc>,
    /// Hint ledger entries consumed during this attempt.
    #[serde(default)]
    pub hint_entry_ids: Vec<String>,
    #[serde(default)]
    pub question_feedback: Vec<QuestionFeedback>,
    pub feedback: MotivationalFeedback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionFeedback {
    pub question_id: String,
    /// `None` for questions that are not auto-scored (essay).
    pub correct: Option<bool>,
    pub comment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotivationalFeedback {
    pub title: String,
    pub message: String,
}

/// Fixed band table, checked high to low; the first band whose floor the
/// score reaches wins.
const SCORE_BANDS: &[(u32, &str, &str)] = &[
    (
        90,
        "Excellent",
        "Outstanding work — you have mastered this material.",
    ),
    (
        70,
        "Good",
        "Solid result. A little more practice will close the remaining gaps.",
    ),
    (
        50,
        "Keep practicing",
        "You are getting there. Review the missed questions and try again.",
    ),
    (
        0,
        "Needs review",
        "This topic needs another pass. Revisit the lessons before retaking the quiz.",
    ),
];

pub fn feedback_for_score(score: u32) -> MotivationalFeedback {
    let (_, title, message) = SCORE_BANDS
        .iter()
        .find(|(floor, _, _)| score >= *floor)
        .unwrap_or(&SCORE_BANDS[SCORE_BANDS.len() - 1]);

    MotivationalFeedback {
        title: (*title).to_string(),
        message: (*message).to_string(),
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct AppendFeedbackRequest {
    #[validate(length(min = 1, max = 128))]
    pub question_id: String,
    #[validate(length(min = 1, max = 2000))]
    pub comment: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_edges_check_high_to_low() {
        assert_eq!(feedback_for_score(100).title, "Excellent");
        assert_eq!(feedback_for_score(90).title, "Excellent");
        assert_eq!(feedback_for_score(89).title, "Good");
        assert_eq!(feedback_for_score(70).title, "Good");
        assert_eq!(feedback_for_score(69).title, "Keep practicing");
        assert_eq!(feedback_for_score(50).title, "Keep practicing");
        assert_eq!(feedback_for_score(49).title, "Needs review");
        assert_eq!(feedback_for_score(0).title, "Needs review");
    }
}
