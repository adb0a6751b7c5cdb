use std::collections::HashMap;

use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::{doc, to_bson};
use mongodb::options::ReturnDocument;
use mongodb::{Collection, Database};
use redis::aio::ConnectionManager;
use uuid::Uuid;

use crate::error::{is_duplicate_key, ApiError};
use crate::metrics::{ATTEMPT_SESSIONS_ACTIVE, ATTEMPT_SESSIONS_TOTAL, RESULTS_FINALIZED_TOTAL};
use crate::models::hint::HintLedgerEntry;
use crate::models::result::{
    feedback_for_score, AppendFeedbackRequest, QuestionFeedback, QuizResult,
};
use crate::models::{AnswerRecord, AttemptSession, Question, SessionStatus};
use crate::services::question_store::QuestionStore;
use crate::utils::retry::{retry_async_with_config, RetryConfig};

pub struct ScoringService {
    mongo: Database,
    redis: ConnectionManager,
}

/// Outcome of grading one attempt against its quiz's questions.
#[derive(Debug)]
pub struct GradedAttempt {
    pub correct_count: u32,
    pub gradable_count: u32,
    pub score: u32,
    pub time_taken_seconds: u64,
    pub question_feedback: Vec<QuestionFeedback>,
}

/// Grades the recorded answers. Submissions append, so the latest answer per
/// question wins; essays are never auto-scored and stay out of the gradable
/// denominator. Time taken sums every recorded submission since each one
/// represents distinct time spent.
pub fn grade_answers(questions: &[Question], answers: &[AnswerRecord]) -> GradedAttempt {
    let mut latest: HashMap<&str, &AnswerRecord> = HashMap::new();
    for answer in answers {
        latest.insert(answer.question_id.as_str(), answer);
    }

    let time_taken_seconds = answers.iter().map(|a| a.time_spent_seconds).sum();

    let mut correct_count = 0u32;
    let mut gradable_count = 0u32;
    let mut question_feedback = Vec::with_capacity(questions.len());

    for question in questions {
        if question.body.is_gradable() {
            gradable_count += 1;
        }

        match latest.get(question.id.as_str()) {
            Some(answer) => match question.body.grade(&answer.selected_answer) {
                Some(true) => {
                    correct_count += 1;
                    question_feedback.push(QuestionFeedback {
                        question_id: question.id.clone(),
                        correct: Some(true),
                        comment: "Correct.".to_string(),
                    });
                }
                Some(false) => {
                    question_feedback.push(QuestionFeedback {
                        question_id: question.id.clone(),
                        correct: Some(false),
                        comment: "Incorrect — review the solution steps for this question."
                            .to_string(),
                    });
                }
                None => {
                    question_feedback.push(QuestionFeedback {
                        question_id: question.id.clone(),
                        correct: None,
                        comment: "Essay answers are reviewed manually.".to_string(),
                    });
                }
            },
            None => {
                question_feedback.push(QuestionFeedback {
                    question_id: question.id.clone(),
                    correct: if question.body.is_gradable() {
                        Some(false)
                    } else {
                        None
                    },
                    comment: "Not answered.".to_string(),
                });
            }
        }
    }

    let score = if gradable_count == 0 {
        0
    } else {
        (100.0 * correct_count as f64 / gradable_count as f64).round() as u32
    };

    GradedAttempt {
        correct_count,
        gradable_count,
        score,
        time_taken_seconds,
        question_feedback,
    }
}

impl ScoringService {
    pub fn new(mongo: Database, redis: ConnectionManager) -> Self {
        Self { mongo, redis }
    }

    fn results(&self) -> Collection<QuizResult> {
        self.mongo.collection("results")
    }

    fn sessions(&self) -> Collection<AttemptSession> {
        self.mongo.collection("attempt_sessions")
    }

    /// Finalizes an attempt into its Result. Idempotent: an already-completed
    /// session returns its existing Result unchanged, and the unique index on
    /// `results.session_id` collapses concurrent finalizations to one winner.
    pub async fn finalize(&self, session: &AttemptSession) -> Result<QuizResult, ApiError> {
        match session.status {
            SessionStatus::Completed => return self.result_for_session(&session.id).await,
            SessionStatus::Abandoned => {
                return Err(ApiError::invalid_state(
                    "Session was abandoned and cannot be finalized",
                ));
            }
            SessionStatus::InProgress => {}
        }

        if session.answers.is_empty() {
            return Err(ApiError::invalid_state(
                "Finalize requires at least one recorded answer",
            ));
        }

        let store = QuestionStore::new(self.mongo.clone(), self.redis.clone());
        let quiz = store.fetch_quiz(&session.quiz_id).await?;
        let questions = store.fetch_questions(&quiz.question_ids).await?;

        let graded = grade_answers(&questions, &session.answers);

        let hint_entry_ids = self.hint_entry_ids_for(session).await?;

        let result = QuizResult {
            id: Uuid::new_v4().to_string(),
            user_id: session.user_id.clone(),
            quiz_id: quiz.id.clone(),
            session_id: session.id.clone(),
            question_ids: quiz.question_ids.clone(),
            correct_count: graded.correct_count,
            gradable_count: graded.gradable_count,
            score: graded.score,
            time_taken_seconds: graded.time_taken_seconds,
            completed_at: Utc::now(),
            hint_entry_ids,
            question_feedback: graded.question_feedback,
            feedback: feedback_for_score(graded.score),
        };

        match self.results().insert_one(&result).await {
            Ok(_) => {}
            Err(e) if is_duplicate_key(&e) => {
                // A concurrent finalize won the race; hand back its Result.
                tracing::warn!(
                    "Concurrent finalize detected for session {}, returning existing result",
                    session.id
                );
                return self.result_for_session(&session.id).await;
            }
            Err(e) => return Err(e.into()),
        }

        self.complete_session(&session.id, &result.id).await?;

        let band = result.feedback.title.to_lowercase().replace(' ', "_");
        RESULTS_FINALIZED_TOTAL.with_label_values(&[&band]).inc();

        tracing::info!(
            "Session {} finalized: score={} correct={}/{}",
            session.id,
            result.score,
            result.correct_count,
            result.gradable_count
        );

        Ok(result)
    }

    /// Conditional transition in_progress → completed. Idempotent and safe to
    /// retry on transient store failures.
    async fn complete_session(&self, session_id: &str, result_id: &str) -> Result<(), ApiError> {
        let now = to_bson(&Utc::now()).map_err(anyhow::Error::new)?;
        let update_result = retry_async_with_config(RetryConfig::aggressive(), || async {
            self.sessions()
                .update_one(
                    doc! { "_id": session_id, "status": "in_progress" },
                    doc! { "$set": {
                        "status": "completed",
                        "result_id": result_id,
                        "last_active": now.clone(),
                    }},
                )
                .await
        })
        .await?;

        if update_result.modified_count > 0 {
            ATTEMPT_SESSIONS_TOTAL
                .with_label_values(&["completed"])
                .inc();
            ATTEMPT_SESSIONS_ACTIVE.dec();
        }

        Ok(())
    }

    async fn hint_entry_ids_for(&self, session: &AttemptSession) -> Result<Vec<String>, ApiError> {
        let entries: Vec<HintLedgerEntry> = self
            .mongo
            .collection::<HintLedgerEntry>("hint_ledger")
            .find(doc! { "user_id": &session.user_id, "session_id": &session.id })
            .await?
            .try_collect()
            .await?;

        Ok(entries.iter().map(|e| e.id.to_hex()).collect())
    }

    pub async fn result_for_session(&self, session_id: &str) -> Result<QuizResult, ApiError> {
        self.results()
            .find_one(doc! { "session_id": session_id })
            .await?
            .ok_or_else(|| {
                ApiError::not_found(format!("No result found for session {}", session_id))
            })
    }

    pub async fn get_result(&self, result_id: &str) -> Result<QuizResult, ApiError> {
        self.results()
            .find_one(doc! { "_id": result_id })
            .await?
            .ok_or_else(|| ApiError::not_found(format!("Result {} not found", result_id)))
    }

    /// Results are immutable after creation except for this append.
    pub async fn append_feedback(
        &self,
        result: &QuizResult,
        req: &AppendFeedbackRequest,
    ) -> Result<QuizResult, ApiError> {
        if !result.question_ids.contains(&req.question_id) {
            return Err(ApiError::validation(format!(
                "Question {} is not part of this result",
                req.question_id
            )));
        }

        let feedback = QuestionFeedback {
            question_id: req.question_id.clone(),
            correct: None,
            comment: req.comment.clone(),
        };

        self.results()
            .find_one_and_update(
                doc! { "_id": &result.id },
                doc! { "$push": {
                    "question_feedback": to_bson(&feedback).map_err(anyhow::Error::new)?
                }},
            )
            .return_document(ReturnDocument::After)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("Result {} not found", result.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Difficulty, QuestionBody};

    fn question(id: &str, body: QuestionBody) -> Question {
        Question {
            id: id.to_string(),
            topic_id: None,
            subject_id: None,
            body,
            steps: vec![],
            difficulty: Difficulty::Medium,
            points: 10,
        }
    }

    fn short(id: &str, correct: &str) -> Question {
        question(
            id,
            QuestionBody::ShortAnswer {
                correct_answer: correct.to_string(),
            },
        )
    }

    fn essay(id: &str) -> Question {
        question(id, QuestionBody::Essay { guidelines: None })
    }

    fn answer(question_id: &str, selected: &str, seconds: u64) -> AnswerRecord {
        AnswerRecord {
            question_id: question_id.to_string(),
            selected_answer: selected.to_string(),
            time_spent_seconds: seconds,
            submitted_at: Utc::now(),
        }
    }

    #[test]
    fn three_of_five_gradable_scores_sixty() {
        let questions = vec![
            short("q1", "a"),
            short("q2", "b"),
            short("q3", "c"),
            short("q4", "d"),
            short("q5", "e"),
        ];
        let answers = vec![
            answer("q1", "a", 10),
            answer("q2", "b", 20),
            answer("q3", "c", 30),
            answer("q4", "x", 5),
            answer("q5", "y", 5),
        ];

        let graded = grade_answers(&questions, &answers);
        assert_eq!(graded.correct_count, 3);
        assert_eq!(graded.gradable_count, 5);
        assert_eq!(graded.score, 60);
        assert_eq!(graded.time_taken_seconds, 70);
    }

    #[test]
    fn essay_questions_are_excluded_from_the_denominator() {
        let questions = vec![short("q1", "a"), short("q2", "b"), essay("q3")];
        let answers = vec![
            answer("q1", "a", 10),
            answer("q2", "b", 10),
            answer("q3", "my long essay", 300),
        ];

        let graded = grade_answers(&questions, &answers);
        assert_eq!(graded.gradable_count, 2);
        assert_eq!(graded.correct_count, 2);
        assert_eq!(graded.score, 100);

        let essay_feedback = graded
            .question_feedback
            .iter()
            .find(|f| f.question_id == "q3")
            .unwrap();
        assert_eq!(essay_feedback.correct, None);
    }

    #[test]
    fn all_essay_quiz_grades_to_zero() {
        let questions = vec![essay("q1"), essay("q2")];
        let answers = vec![answer("q1", "text", 60)];

        let graded = grade_answers(&questions, &answers);
        assert_eq!(graded.gradable_count, 0);
        assert_eq!(graded.score, 0);
    }

    #[test]
    fn latest_answer_per_question_wins() {
        let questions = vec![short("q1", "right")];
        let answers = vec![
            answer("q1", "wrong", 10),
            answer("q1", "right", 15),
        ];

        let graded = grade_answers(&questions, &answers);
        assert_eq!(graded.correct_count, 1);
        assert_eq!(graded.score, 100);
        // both submissions count toward time spent
        assert_eq!(graded.time_taken_seconds, 25);
    }

    #[test]
    fn unanswered_gradable_questions_count_against_the_score() {
        let questions = vec![short("q1", "a"), short("q2", "b"), short("q3", "c")];
        let answers = vec![answer("q1", "a", 10)];

        let graded = grade_answers(&questions, &answers);
        assert_eq!(graded.gradable_count, 3);
        assert_eq!(graded.correct_count, 1);
        assert_eq!(graded.score, 33);
    }
}
