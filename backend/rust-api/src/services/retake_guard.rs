use chrono::{DateTime, Duration, Utc};
use mongodb::bson::doc;
use mongodb::Database;

use crate::error::ApiError;
use crate::models::result::QuizResult;
use crate::models::RetakePolicy;

/// Pure retake decision. The caller creates a session only after a positive
/// decision; this function has no side effects.
pub fn check_retake(
    policy: &RetakePolicy,
    prior_results: u64,
    last_completed_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<(), ApiError> {
    if let Some(max) = policy.max_attempts {
        if max > 0 && prior_results >= max as u64 {
            return Err(ApiError::policy_violation(format!(
                "Retake limit reached ({} attempts allowed)",
                max
            )));
        }
    }

    if policy.cooldown_minutes > 0 {
        if let Some(last) = last_completed_at {
            let elapsed = now - last;
            let cooldown = Duration::minutes(policy.cooldown_minutes as i64);
            if elapsed < cooldown {
                let remaining = (cooldown - elapsed).num_minutes().max(1);
                return Err(ApiError::policy_violation(format!(
                    "Retake cooldown active: try again in {} minutes",
                    remaining
                )));
            }
        }
    }

    Ok(())
}

/// Loads the guard's inputs for (user, quiz): how many attempts have been
/// completed and when the latest one finished. Abandoned sessions never
/// produce a Result, so they do not count against the limit.
pub async fn load_retake_inputs(
    mongo: &Database,
    user_id: &str,
    quiz_id: &str,
) -> Result<(u64, Option<DateTime<Utc>>), ApiError> {
    let results = mongo.collection::<QuizResult>("results");
    let filter = doc! { "user_id": user_id, "quiz_id": quiz_id };

    let prior = results.count_documents(filter.clone()).await?;

    let last_completed_at = if prior > 0 {
        results
            .find_one(filter)
            .sort(doc! { "completed_at": -1 })
            .await?
            .map(|r| r.completed_at)
    } else {
        None
    };

    Ok((prior, last_completed_at))
}
