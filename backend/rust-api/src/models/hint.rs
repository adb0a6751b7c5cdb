use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{DeviceContext, Difficulty};

/// One row of the hint ledger, uniquely keyed by
/// (user_id, question_id, session_id). Repeat reveals for the same key merge
/// into this entry instead of creating duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HintLedgerEntry {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub user_id: String,
    pub question_id: String,
    pub session_id: Option<String>,
    /// Deduplicated, ascending step indices. Every value is strictly below
    /// `total_steps_available` when the latter is known.
    #[serde(default)]
    pub steps_viewed: Vec<u32>,
    pub total_steps_available: Option<u32>,
    pub hint_type: HintType,
    /// Accumulated, never decreasing.
    pub points_deducted: i64,
    /// Accumulated, never decreasing.
    pub time_spent_on_hint_seconds: i64,
    pub context: HintContext,
    pub device: Option<DeviceContext>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HintLedgerEntry {
    /// Share of solution steps the user has revealed so far.
    pub fn completion_percentage(&self) -> Option<f64> {
        match self.total_steps_available {
            Some(total) if total > 0 => Some(self.steps_viewed.len() as f64 / total as f64),
            _ => None,
        }
    }
}

/// Snapshot taken when the entry is first created; later reveals do not
/// rewrite it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HintContext {
    pub attempt_number: u32,
    pub difficulty: Option<Difficulty>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HintType {
    StepByStep,
    Conceptual,
    FullSolution,
}

impl Default for HintType {
    fn default() -> Self {
        HintType::StepByStep
    }
}

impl HintType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HintType::StepByStep => "step_by_step",
            HintType::Conceptual => "conceptual",
            HintType::FullSolution => "full_solution",
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct RecordHintRequest {
    #[validate(length(min = 1, max = 128))]
    pub question_id: String,
    /// Defaults to the caller; only admins may record for another user.
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub step_number: Option<u32>,
    #[validate(range(min = 0))]
    pub time_spent_on_hint: Option<i64>,
    #[validate(range(min = 0))]
    pub points_deducted: Option<i64>,
    pub hint_type: Option<HintType>,
    pub device_info: Option<DeviceContext>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateHintRequest {
    pub hint_type: Option<HintType>,
    /// Replaces the set wholesale; input is deduplicated and sorted, then
    /// validated against the stored step bound.
    pub steps_viewed: Option<Vec<u32>>,
    #[validate(range(min = 0))]
    pub points_deducted: Option<i64>,
    #[validate(range(min = 0))]
    pub time_spent_on_hint_seconds: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct HintEntryResponse {
    #[serde(flatten)]
    pub entry: HintLedgerEntry,
    pub completion_percentage: Option<f64>,
}

impl From<HintLedgerEntry> for HintEntryResponse {
    fn from(entry: HintLedgerEntry) -> Self {
        let completion_percentage = entry.completion_percentage();
        Self {
            entry,
            completion_percentage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(steps: Vec<u32>, total: Option<u32>) -> HintLedgerEntry {
        HintLedgerEntry {
            id: ObjectId::new(),
            user_id: "u1".into(),
            question_id: "q1".into(),
            session_id: None,
            steps_viewed: steps,
            total_steps_available: total,
            hint_type: HintType::default(),
            points_deducted: 0,
            time_spent_on_hint_seconds: 0,
            context: HintContext {
                attempt_number: 1,
                difficulty: None,
            },
            device: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn completion_percentage_needs_a_known_total() {
        assert_eq!(entry(vec![0, 1], None).completion_percentage(), None);
        assert_eq!(entry(vec![0, 1], Some(0)).completion_percentage(), None);
        assert_eq!(
            entry(vec![0, 1], Some(4)).completion_percentage(),
            Some(0.5)
        );
    }

    #[test]
    fn hint_type_serializes_snake_case() {
        let json = serde_json::to_string(&HintType::FullSolution).unwrap();
        assert_eq!(json, "\"full_solution\"");
    }
}
