use chrono::{DateTime, Utc};
use mongodb::bson::{doc, to_bson};
use mongodb::options::ReturnDocument;
use mongodb::{Collection, Database};
use redis::aio::ConnectionManager;
use uuid::Uuid;

use crate::error::{is_duplicate_key, ApiError};
use crate::metrics::{ANSWERS_SUBMITTED_TOTAL, ATTEMPT_SESSIONS_ACTIVE, ATTEMPT_SESSIONS_TOTAL};
use crate::models::{
    AnswerRecord, AttemptSession, CreateSessionRequest, SessionStatus, SubmitAnswerRequest,
};
use crate::services::question_store::QuestionStore;
use crate::services::retake_guard;

pub struct SessionService {
    mongo: Database,
    redis: ConnectionManager,
}

impl SessionService {
    pub fn new(mongo: Database, redis: ConnectionManager) -> Self {
        Self { mongo, redis }
    }

    fn sessions(&self) -> Collection<AttemptSession> {
        self.mongo.collection("attempt_sessions")
    }

    /// Starts a new attempt for (user, quiz), subject to the quiz's retake
    /// policy. The guard decision is advisory against races; the partial
    /// unique index on in-progress sessions is the hard invariant and
    /// surfaces as `Conflict` here.
    pub async fn create_session(
        &self,
        user_id: &str,
        req: &CreateSessionRequest,
    ) -> Result<AttemptSession, ApiError> {
        let store = QuestionStore::new(self.mongo.clone(), self.redis.clone());
        let quiz = store.fetch_quiz(&req.quiz_id).await?;

        let (prior, last_completed_at) =
            retake_guard::load_retake_inputs(&self.mongo, user_id, &quiz.id).await?;
        retake_guard::check_retake(&quiz.retake_policy, prior, last_completed_at, Utc::now())?;

        let now = Utc::now();
        let session = AttemptSession {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            quiz_id: quiz.id.clone(),
            started_at: now,
            last_active: now,
            status: SessionStatus::InProgress,
            answers: Vec::new(),
            device: req.device.clone(),
            result_id: None,
        };

        match self.sessions().insert_one(&session).await {
            Ok(_) => {}
            Err(e) if is_duplicate_key(&e) => {
                return Err(ApiError::conflict(
                    "An attempt for this quiz is already in progress",
                ));
            }
            Err(e) => return Err(e.into()),
        }

        ATTEMPT_SESSIONS_TOTAL.with_label_values(&["created"]).inc();
        ATTEMPT_SESSIONS_ACTIVE.inc();

        tracing::info!(
            "Attempt session created: {} for user {} on quiz {}",
            session.id,
            user_id,
            quiz.id
        );

        Ok(session)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<AttemptSession, ApiError> {
        self.sessions()
            .find_one(doc! { "_id": session_id })
            .await?
            .ok_or_else(|| ApiError::not_found(format!("Session {} not found", session_id)))
    }

    /// Appends an answer to an in-progress session. The status filter on the
    /// update makes the terminal-state check race-safe: a submission that
    /// loses against finalize or the abandon sweep fails with `InvalidState`.
    pub async fn submit_answer(
        &self,
        session: &AttemptSession,
        req: &SubmitAnswerRequest,
    ) -> Result<AttemptSession, ApiError> {
        if session.status.is_terminal() {
            return Err(ApiError::invalid_state(format!(
                "Session is {}; no further submissions accepted",
                session.status.as_str()
            )));
        }

        let store = QuestionStore::new(self.mongo.clone(), self.redis.clone());
        let quiz = store.fetch_quiz(&session.quiz_id).await?;
        if !quiz.question_ids.contains(&req.question_id) {
            return Err(ApiError::validation(format!(
                "Question {} is not part of quiz {}",
                req.question_id, quiz.id
            )));
        }

        let now = Utc::now();
        let answer = AnswerRecord {
            question_id: req.question_id.clone(),
            selected_answer: req.selected_answer.clone(),
            time_spent_seconds: req.time_spent_seconds,
            submitted_at: now,
        };

        let updated = self
            .sessions()
            .find_one_and_update(
                doc! { "_id": &session.id, "status": "in_progress" },
                doc! {
                    "$push": { "answers": to_bson(&answer).map_err(anyhow::Error::new)? },
                    "$set": { "last_active": to_bson(&now).map_err(anyhow::Error::new)? },
                },
            )
            .return_document(ReturnDocument::After)
            .await?;

        match updated {
            Some(session) => {
                ANSWERS_SUBMITTED_TOTAL
                    .with_label_values(&["recorded"])
                    .inc();
                Ok(session)
            }
            None => {
                ANSWERS_SUBMITTED_TOTAL
                    .with_label_values(&["rejected"])
                    .inc();
                Err(ApiError::invalid_state(
                    "Session reached a terminal state; no further submissions accepted",
                ))
            }
        }
    }

    /// Marks every in-progress session inactive since `cutoff` as abandoned.
    /// Run by the sweeper worker; abandoned is terminal, so swept sessions
    /// reject all later submissions and can never be finalized.
    pub async fn sweep_stale(&self, cutoff: DateTime<Utc>) -> Result<u64, ApiError> {
        let result = self
            .sessions()
            .update_many(
                doc! {
                    "status": "in_progress",
                    "last_active": { "$lt": to_bson(&cutoff).map_err(anyhow::Error::new)? },
                },
                doc! { "$set": { "status": "abandoned" } },
            )
            .await?;

        if result.modified_count > 0 {
            ATTEMPT_SESSIONS_TOTAL
                .with_label_values(&["abandoned"])
                .inc_by(result.modified_count);
            ATTEMPT_SESSIONS_ACTIVE.sub(result.modified_count as i64);
            tracing::info!(
                "Abandon sweep: {} stale sessions marked abandoned",
                result.modified_count
            );
        }

        Ok(result.modified_count)
    }
}
