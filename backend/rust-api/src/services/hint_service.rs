use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, to_bson, Bson, Document};
use mongodb::options::ReturnDocument;
use mongodb::{Collection, Database};
use redis::aio::ConnectionManager;

use crate::error::{is_duplicate_key, ApiError};
use crate::metrics::HINTS_RECORDED_TOTAL;
use crate::models::hint::{HintLedgerEntry, HintType, RecordHintRequest, UpdateHintRequest};
use crate::models::AttemptSession;
use crate::services::question_store::QuestionStore;

pub struct HintService {
    mongo: Database,
    redis: ConnectionManager,
}

impl HintService {
    pub fn new(mongo: Database, redis: ConnectionManager) -> Self {
        Self { mongo, redis }
    }

    fn ledger(&self) -> Collection<HintLedgerEntry> {
        self.mongo.collection("hint_ledger")
    }

    /// Upserts a hint reveal into the ledger entry keyed by
    /// (user, question, session). The merge runs as one aggregation-pipeline
    /// `find_one_and_update` on the store: `$setUnion` + `$sortArray` keep
    /// `steps_viewed` a deduplicated ascending set, and the `$add`
    /// accumulators keep the deductions monotonic, so two concurrent reveals
    /// for the same key cannot lose a step.
    pub async fn record_hint(
        &self,
        user_id: &str,
        req: &RecordHintRequest,
    ) -> Result<HintLedgerEntry, ApiError> {
        let store = QuestionStore::new(self.mongo.clone(), self.redis.clone());
        let question = store.fetch_question(&req.question_id).await?;

        let total_steps = question.total_steps();
        if let Some(step) = req.step_number {
            if step >= total_steps {
                return Err(ApiError::validation(format!(
                    "Hint step {} out of range: question {} has {} solution steps",
                    step, question.id, total_steps
                )));
            }
        }

        let attempt_number = self.resolve_attempt_number(user_id, req).await?;

        let session_bson = match &req.session_id {
            Some(sid) => Bson::String(sid.clone()),
            None => Bson::Null,
        };
        let filter = doc! {
            "user_id": user_id,
            "question_id": &req.question_id,
            "session_id": session_bson,
        };

        let new_steps: Vec<i64> = req.step_number.map(|s| vec![s as i64]).unwrap_or_default();
        let points_delta = req.points_deducted.unwrap_or(0);
        let time_delta = req.time_spent_on_hint.unwrap_or(0);
        let hint_type = req.hint_type.unwrap_or_default();

        let now_bson = to_bson(&Utc::now()).map_err(anyhow::Error::new)?;
        let context_doc = doc! {
            "attempt_number": attempt_number as i64,
            "difficulty": to_bson(&question.difficulty).map_err(anyhow::Error::new)?,
        };
        let device_bson = to_bson(&req.device_info).map_err(anyhow::Error::new)?;

        // $literal guards the snapshot documents against '$'-prefixed strings
        // in user-supplied fields being read as field paths.
        let pipeline = vec![doc! { "$set": {
            "steps_viewed": { "$sortArray": {
                "input": { "$setUnion": [ { "$ifNull": ["$steps_viewed", []] }, new_steps ] },
                "sortBy": 1,
            }},
            "total_steps_available": { "$ifNull": ["$total_steps_available", total_steps as i64] },
            "hint_type": { "$ifNull": ["$hint_type", hint_type.as_str()] },
            "points_deducted": { "$add": [ { "$ifNull": ["$points_deducted", 0_i64] }, points_delta ] },
            "time_spent_on_hint_seconds": { "$add": [ { "$ifNull": ["$time_spent_on_hint_seconds", 0_i64] }, time_delta ] },
            "context": { "$ifNull": ["$context", { "$literal": context_doc }] },
            "device": { "$ifNull": ["$device", { "$literal": device_bson }] },
            "created_at": { "$ifNull": ["$created_at", now_bson.clone()] },
            "updated_at": now_bson,
        }}];

        // Two concurrent first reveals both take the insert path; the unique
        // key index fails one, and a single retry lands it on the merge path.
        let mut attempts = 0;
        let entry = loop {
            attempts += 1;
            match self
                .ledger()
                .find_one_and_update(filter.clone(), pipeline.clone())
                .upsert(true)
                .return_document(ReturnDocument::After)
                .await
            {
                Ok(Some(entry)) => break entry,
                Ok(None) => {
                    return Err(ApiError::internal(
                        "Hint upsert returned no document".to_string(),
                    ));
                }
                Err(e) if is_duplicate_key(&e) && attempts < 2 => continue,
                Err(e) => return Err(e.into()),
            }
        };

        HINTS_RECORDED_TOTAL
            .with_label_values(&[hint_type.as_str()])
            .inc();

        tracing::info!(
            "Hint recorded: user={} question={} steps_viewed={}/{:?}",
            user_id,
            req.question_id,
            entry.steps_viewed.len(),
            entry.total_steps_available,
        );

        Ok(entry)
    }

    /// Attempt number snapshot for the entry's context: how many results the
    /// user already has for the session's quiz, plus one for the attempt in
    /// flight. Sessionless reveals default to the first attempt.
    async fn resolve_attempt_number(
        &self,
        user_id: &str,
        req: &RecordHintRequest,
    ) -> Result<u32, ApiError> {
        let Some(session_id) = &req.session_id else {
            return Ok(1);
        };

        let session = self
            .mongo
            .collection::<AttemptSession>("attempt_sessions")
            .find_one(doc! { "_id": session_id })
            .await?
            .ok_or_else(|| ApiError::not_found(format!("Session {} not found", session_id)))?;

        if session.user_id != user_id {
            return Err(ApiError::validation(format!(
                "Session {} does not belong to user {}",
                session_id, user_id
            )));
        }

        let prior = self
            .mongo
            .collection::<Document>("results")
            .count_documents(doc! { "user_id": user_id, "quiz_id": &session.quiz_id })
            .await?;

        Ok(prior as u32 + 1)
    }

    pub async fn get_entry(&self, id: &str) -> Result<HintLedgerEntry, ApiError> {
        let oid = parse_entry_id(id)?;
        self.ledger()
            .find_one(doc! { "_id": oid })
            .await?
            .ok_or_else(|| ApiError::not_found(format!("Hint entry {} not found", id)))
    }

    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<HintLedgerEntry>, ApiError> {
        let entries = self
            .ledger()
            .find(doc! { "user_id": user_id })
            .sort(doc! { "created_at": -1 })
            .await?
            .try_collect()
            .await?;
        Ok(entries)
    }

    /// Owner-or-admin correction of a ledger entry. `steps_viewed` input is
    /// deduplicated, sorted and validated against the stored step bound.
    pub async fn update_entry(
        &self,
        entry: &HintLedgerEntry,
        req: &UpdateHintRequest,
    ) -> Result<HintLedgerEntry, ApiError> {
        let mut set = Document::new();

        if let Some(hint_type) = req.hint_type {
            set.insert("hint_type", hint_type.as_str());
        }

        if let Some(steps) = &req.steps_viewed {
            let mut steps: Vec<i64> = steps.iter().map(|s| *s as i64).collect();
            steps.sort_unstable();
            steps.dedup();

            if let Some(total) = entry.total_steps_available {
                let out_of_range: Vec<String> = steps
                    .iter()
                    .filter(|s| **s >= total as i64)
                    .map(|s| s.to_string())
                    .collect();
                if !out_of_range.is_empty() {
                    return Err(ApiError::validation(format!(
                        "Hint steps out of range for {} available: {}",
                        total,
                        out_of_range.join(", ")
                    )));
                }
            }

            set.insert("steps_viewed", steps);
        }

        if let Some(points) = req.points_deducted {
            set.insert("points_deducted", points);
        }

        if let Some(time) = req.time_spent_on_hint_seconds {
            set.insert("time_spent_on_hint_seconds", time);
        }

        if set.is_empty() {
            return Err(ApiError::validation("No fields to update"));
        }

        set.insert(
            "updated_at",
            to_bson(&Utc::now()).map_err(anyhow::Error::new)?,
        );

        self.ledger()
            .find_one_and_update(doc! { "_id": entry.id }, doc! { "$set": set })
            .return_document(ReturnDocument::After)
            .await?
            .ok_or_else(|| {
                ApiError::not_found(format!("Hint entry {} not found", entry.id.to_hex()))
            })
    }

    pub async fn delete_entry(&self, entry: &HintLedgerEntry) -> Result<(), ApiError> {
        let deleted = self
            .ledger()
            .delete_one(doc! { "_id": entry.id })
            .await?;

        if deleted.deleted_count == 0 {
            return Err(ApiError::not_found(format!(
                "Hint entry {} not found",
                entry.id.to_hex()
            )));
        }

        tracing::info!(
            "Hint entry deleted: id={} user={}",
            entry.id.to_hex(),
            entry.user_id
        );

        Ok(())
    }
}

pub fn parse_entry_id(value: &str) -> Result<ObjectId, ApiError> {
    ObjectId::parse_str(value)
        .map_err(|_| ApiError::validation(format!("Invalid hint entry id: {}", value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_id_parsing() {
        assert!(parse_entry_id("65f2c0a4b7e3d2a1c0b9f8e7").is_ok());
        assert!(parse_entry_id("not-an-object-id").is_err());
    }
}
