use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use crate::{
    error::ApiError,
    extractors::ValidatedJson,
    middlewares::auth::{ensure_self_or_admin, JwtClaims},
    models::{
        result::AppendFeedbackRequest, CreateSessionRequest, SubmitAnswerRequest,
    },
    services::{
        scoring_service::ScoringService, session_service::SessionService, AppState,
    },
};

pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    ValidatedJson(req): ValidatedJson<CreateSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!(
        "Creating attempt session for user={} quiz={}",
        claims.sub,
        req.quiz_id
    );

    let service = SessionService::new(state.mongo.clone(), state.redis.clone());
    let session = service.create_session(&claims.sub, &req).await?;

    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let service = SessionService::new(state.mongo.clone(), state.redis.clone());
    let session = service.get_session(&session_id).await?;
    ensure_self_or_admin(&claims, &session.user_id)?;

    Ok(Json(session))
}

pub async fn submit_answer(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
    ValidatedJson(req): ValidatedJson<SubmitAnswerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let service = SessionService::new(state.mongo.clone(), state.redis.clone());
    let session = service.get_session(&session_id).await?;
    ensure_self_or_admin(&claims, &session.user_id)?;

    let updated = service.submit_answer(&session, &req).await?;

    Ok(Json(updated))
}

/// Idempotent: finalizing an already-completed session returns its existing
/// Result unchanged.
pub async fn finalize_session(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let sessions = SessionService::new(state.mongo.clone(), state.redis.clone());
    let session = sessions.get_session(&session_id).await?;
    ensure_self_or_admin(&claims, &session.user_id)?;

    let scoring = ScoringService::new(state.mongo.clone(), state.redis.clone());
    let result = scoring.finalize(&session).await?;

    Ok(Json(result))
}

pub async fn get_session_result(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let sessions = SessionService::new(state.mongo.clone(), state.redis.clone());
    let session = sessions.get_session(&session_id).await?;
    ensure_self_or_admin(&claims, &session.user_id)?;

    let scoring = ScoringService::new(state.mongo.clone(), state.redis.clone());
    let result = scoring.result_for_session(&session_id).await?;

    Ok(Json(result))
}

pub async fn get_result(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(result_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let scoring = ScoringService::new(state.mongo.clone(), state.redis.clone());
    let result = scoring.get_result(&result_id).await?;
    ensure_self_or_admin(&claims, &result.user_id)?;

    Ok(Json(result))
}

pub async fn append_result_feedback(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(result_id): Path<String>,
    ValidatedJson(req): ValidatedJson<AppendFeedbackRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let scoring = ScoringService::new(state.mongo.clone(), state.redis.clone());
    let result = scoring.get_result(&result_id).await?;
    ensure_self_or_admin(&claims, &result.user_id)?;

    let updated = scoring.append_feedback(&result, &req).await?;

    Ok(Json(updated))
}
