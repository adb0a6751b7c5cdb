use std::collections::HashMap;

use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::{doc, to_bson, Document};
use mongodb::options::ReturnDocument;
use mongodb::{Collection, Database};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{is_duplicate_key, ApiError};
use crate::metrics::ADAPTIVE_EVALUATIONS_TOTAL;
use crate::models::adaptive::{
    AdaptiveProfile, AdjustmentRule, ContentRef, CreateProfileRequest, DifficultyLevel,
    MetricKind, RuleAction, UpdateProfileRequest,
};
use crate::models::result::QuizResult;
use crate::models::{AttemptSession, SessionStatus};

/// Bounded recent metrics the rule evaluator consumes. Units are chosen so
/// thresholds compare naturally: score 0–100, accuracy 0–100, completion
/// rate 0–100, time spent in seconds. Thresholds compare against the
/// windowed average, not the latest value.
#[derive(Debug, Clone, Default)]
pub struct MetricsWindow {
    pub scores: Vec<f64>,
    pub time_spent: Vec<f64>,
    pub accuracy: Vec<f64>,
    pub completion_rate: Option<f64>,
}

impl MetricsWindow {
    fn average(values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        }
    }

    /// Windowed-average value for a metric; `None` when no data exists, in
    /// which case no rule on that metric fires.
    pub fn value_for(&self, metric: MetricKind) -> Option<f64> {
        match metric {
            MetricKind::Score => Self::average(&self.scores),
            MetricKind::TimeSpent => Self::average(&self.time_spent),
            MetricKind::Accuracy => Self::average(&self.accuracy),
            MetricKind::CompletionRate => self.completion_rate,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FiredRule {
    pub index: usize,
    pub metric: MetricKind,
    pub threshold: f64,
    pub observed: f64,
    pub action: RuleAction,
}

#[derive(Debug)]
pub struct EvaluationOutcome {
    pub new_level: DifficultyLevel,
    pub recommended: Vec<ContentRef>,
    pub fired: Vec<FiredRule>,
}

/// For `time_spent` lower is better; for every other metric higher is
/// better. `increase_difficulty` fires on the meeting side of the threshold,
/// the remedial actions fire on the failing side.
fn rule_fires(metric: MetricKind, observed: f64, threshold: f64, action: RuleAction) -> bool {
    let meets = match metric {
        MetricKind::TimeSpent => observed <= threshold,
        _ => observed >= threshold,
    };
    match action {
        RuleAction::IncreaseDifficulty => meets,
        RuleAction::DecreaseDifficulty | RuleAction::SuggestResource => !meets,
    }
}

/// Pure rule evaluation: (profile, metrics) → new profile state. Rules run
/// in list order; level shifts accumulate and clamp to the ordinal range;
/// suggested resources dedupe by (kind, id).
pub fn evaluate_rules(profile: &AdaptiveProfile, window: &MetricsWindow) -> EvaluationOutcome {
    let mut shift: i32 = 0;
    let mut recommended = profile.recommended_content.clone();
    let mut fired = Vec::new();

    for (index, rule) in profile.adjustment_rules.iter().enumerate() {
        let Some(observed) = window.value_for(rule.metric) else {
            continue;
        };
        if !rule_fires(rule.metric, observed, rule.threshold, rule.action) {
            continue;
        }

        fired.push(FiredRule {
            index,
            metric: rule.metric,
            threshold: rule.threshold,
            observed,
            action: rule.action,
        });

        match rule.action {
            RuleAction::IncreaseDifficulty => shift += 1,
            RuleAction::DecreaseDifficulty => shift -= 1,
            RuleAction::SuggestResource => {
                if let Some(resource) = &rule.resource_ref {
                    if !recommended.contains(resource) {
                        recommended.push(resource.clone());
                    }
                }
            }
        }
    }

    EvaluationOutcome {
        new_level: profile.current_level.shifted(shift),
        recommended,
        fired,
    }
}

#[derive(Debug, Serialize)]
pub struct EvaluationReport {
    pub profile: AdaptiveProfile,
    pub fired_rules: Vec<FiredRule>,
}

pub struct AdaptiveService {
    mongo: Database,
    metrics_window: u32,
}

impl AdaptiveService {
    pub fn new(mongo: Database, metrics_window: u32) -> Self {
        Self {
            mongo,
            metrics_window,
        }
    }

    fn profiles(&self) -> Collection<AdaptiveProfile> {
        self.mongo.collection("adaptive_profiles")
    }

    pub async fn create_profile(
        &self,
        req: &CreateProfileRequest,
    ) -> Result<AdaptiveProfile, ApiError> {
        validate_rule_shape(&req.adjustment_rules)?;
        self.validate_content_refs(
            req.adjustment_rules
                .iter()
                .filter_map(|r| r.resource_ref.as_ref())
                .chain(req.recommended_content.iter()),
        )
        .await?;

        let now = Utc::now();
        let profile = AdaptiveProfile {
            id: Uuid::new_v4().to_string(),
            user_id: req.user_id.clone(),
            current_level: req.current_level.unwrap_or(DifficultyLevel::Beginner),
            adjustment_rules: req.adjustment_rules.clone(),
            recommended_content: req.recommended_content.clone(),
            created_at: now,
            updated_at: now,
        };

        match self.profiles().insert_one(&profile).await {
            Ok(_) => {}
            Err(e) if is_duplicate_key(&e) => {
                return Err(ApiError::conflict(format!(
                    "Adaptive profile already exists for user {}",
                    req.user_id
                )));
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!("Adaptive profile created for user {}", profile.user_id);

        Ok(profile)
    }

    pub async fn get_profile(&self, user_id: &str) -> Result<AdaptiveProfile, ApiError> {
        self.profiles()
            .find_one(doc! { "user_id": user_id })
            .await?
            .ok_or_else(|| {
                ApiError::not_found(format!("Adaptive profile not found for user {}", user_id))
            })
    }

    pub async fn update_profile(
        &self,
        user_id: &str,
        req: &UpdateProfileRequest,
    ) -> Result<AdaptiveProfile, ApiError> {
        if let Some(rules) = &req.adjustment_rules {
            validate_rule_shape(rules)?;
        }

        let rule_refs = req
            .adjustment_rules
            .iter()
            .flatten()
            .filter_map(|r| r.resource_ref.as_ref());
        let content_refs = req.recommended_content.iter().flatten();
        self.validate_content_refs(rule_refs.chain(content_refs))
            .await?;

        let mut set = Document::new();
        if let Some(level) = req.current_level {
            set.insert("current_level", level.as_str());
        }
        if let Some(rules) = &req.adjustment_rules {
            set.insert("adjustment_rules", to_bson(rules).map_err(anyhow::Error::new)?);
        }
        if let Some(content) = &req.recommended_content {
            set.insert(
                "recommended_content",
                to_bson(content).map_err(anyhow::Error::new)?,
            );
        }
        if set.is_empty() {
            return Err(ApiError::validation("No fields to update"));
        }
        set.insert(
            "updated_at",
            to_bson(&Utc::now()).map_err(anyhow::Error::new)?,
        );

        self.profiles()
            .find_one_and_update(doc! { "user_id": user_id }, doc! { "$set": set })
            .return_document(ReturnDocument::After)
            .await?
            .ok_or_else(|| {
                ApiError::not_found(format!("Adaptive profile not found for user {}", user_id))
            })
    }

    /// Read-evaluate-write over the whole profile document. Rule effects
    /// commit entirely or not at all; two racing evaluations resolve
    /// last-writer-wins, acceptable because rule application is clamped and
    /// not safety-critical.
    pub async fn evaluate(&self, user_id: &str) -> Result<EvaluationReport, ApiError> {
        let profile = self.get_profile(user_id).await?;
        let window = self.load_metrics_window(user_id).await?;

        let outcome = evaluate_rules(&profile, &window);

        let mut updated = profile.clone();
        updated.current_level = outcome.new_level;
        updated.recommended_content = outcome.recommended;
        updated.updated_at = Utc::now();

        self.profiles()
            .replace_one(doc! { "_id": &profile.id }, &updated)
            .await?;

        let label = if outcome.fired.is_empty() {
            "no_change"
        } else {
            "applied"
        };
        ADAPTIVE_EVALUATIONS_TOTAL.with_label_values(&[label]).inc();

        tracing::info!(
            "Adaptive evaluation for user {}: {} rule(s) fired, level {} -> {}",
            user_id,
            outcome.fired.len(),
            profile.current_level.as_str(),
            updated.current_level.as_str()
        );

        Ok(EvaluationReport {
            profile: updated,
            fired_rules: outcome.fired,
        })
    }

    async fn load_metrics_window(&self, user_id: &str) -> Result<MetricsWindow, ApiError> {
        let results: Vec<QuizResult> = self
            .mongo
            .collection::<QuizResult>("results")
            .find(doc! { "user_id": user_id })
            .sort(doc! { "completed_at": -1 })
            .limit(self.metrics_window as i64)
            .await?
            .try_collect()
            .await?;

        let scores = results.iter().map(|r| r.score as f64).collect();
        let time_spent = results.iter().map(|r| r.time_taken_seconds as f64).collect();
        let accuracy = results
            .iter()
            .filter(|r| r.gradable_count > 0)
            .map(|r| 100.0 * r.correct_count as f64 / r.gradable_count as f64)
            .collect();

        let sessions: Vec<AttemptSession> = self
            .mongo
            .collection::<AttemptSession>("attempt_sessions")
            .find(doc! { "user_id": user_id })
            .sort(doc! { "started_at": -1 })
            .limit(self.metrics_window as i64)
            .await?
            .try_collect()
            .await?;

        let completion_rate = if sessions.is_empty() {
            None
        } else {
            let completed = sessions
                .iter()
                .filter(|s| s.status == SessionStatus::Completed)
                .count();
            Some(100.0 * completed as f64 / sessions.len() as f64)
        };

        Ok(MetricsWindow {
            scores,
            time_spent,
            accuracy,
            completion_rate,
        })
    }

    /// Existence check for every referenced content id before persisting,
    /// reporting all invalid references at once instead of failing on the
    /// first.
    async fn validate_content_refs<'a>(
        &self,
        refs: impl Iterator<Item = &'a ContentRef>,
    ) -> Result<(), ApiError> {
        let mut by_collection: HashMap<&'static str, Vec<&'a ContentRef>> = HashMap::new();
        for reference in refs {
            by_collection
                .entry(reference.collection())
                .or_default()
                .push(reference);
        }

        let mut missing: Vec<String> = Vec::new();
        for (collection, refs) in by_collection {
            let ids: Vec<&str> = refs.iter().map(|r| r.id()).collect();
            let present = self
                .mongo
                .collection::<Document>(collection)
                .distinct("_id", doc! { "_id": { "$in": ids } })
                .await?;
            let present: Vec<&str> = present.iter().filter_map(|b| b.as_str()).collect();

            for reference in refs {
                if !present.contains(&reference.id()) {
                    missing.push(format!("{}/{}", reference.kind(), reference.id()));
                }
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            missing.sort();
            Err(ApiError::validation(format!(
                "Unknown content references: {}",
                missing.join(", ")
            )))
        }
    }
}

/// `resource_ref` is required iff the action is `suggest_resource`; every
/// offending rule is reported in one error.
fn validate_rule_shape(rules: &[AdjustmentRule]) -> Result<(), ApiError> {
    let mut problems = Vec::new();
    for (index, rule) in rules.iter().enumerate() {
        match (rule.action, &rule.resource_ref) {
            (RuleAction::SuggestResource, None) => {
                problems.push(format!("rule {}: suggest_resource requires resource_ref", index));
            }
            (RuleAction::IncreaseDifficulty | RuleAction::DecreaseDifficulty, Some(_)) => {
                problems.push(format!(
                    "rule {}: resource_ref is only valid for suggest_resource",
                    index
                ));
            }
            _ => {}
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(ApiError::validation(format!(
            "Invalid adjustment rules: {}",
            problems.join("; ")
        )))
    }
}
