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
    models::hint::{HintEntryResponse, RecordHintRequest, UpdateHintRequest},
    services::{
        analytics_service::AnalyticsService, hint_service::HintService, AppState,
    },
};

pub async fn record_hint(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    ValidatedJson(req): ValidatedJson<RecordHintRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // The entry is owned by the caller unless an admin records on behalf of
    // another user.
    let user_id = req.user_id.clone().unwrap_or_else(|| claims.sub.clone());
    ensure_self_or_admin(&claims, &user_id)?;

    let service = HintService::new(state.mongo.clone(), state.redis.clone());
    let entry = service.record_hint(&user_id, &req).await?;

    Ok((StatusCode::CREATED, Json(HintEntryResponse::from(entry))))
}

pub async fn get_hint(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(entry_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let service = HintService::new(state.mongo.clone(), state.redis.clone());
    let entry = service.get_entry(&entry_id).await?;
    ensure_self_or_admin(&claims, &entry.user_id)?;

    Ok(Json(HintEntryResponse::from(entry)))
}

pub async fn list_user_hints(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_self_or_admin(&claims, &user_id)?;

    let service = HintService::new(state.mongo.clone(), state.redis.clone());
    let entries = service.list_for_user(&user_id).await?;

    let entries: Vec<HintEntryResponse> =
        entries.into_iter().map(HintEntryResponse::from).collect();

    Ok(Json(entries))
}

pub async fn update_hint(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(entry_id): Path<String>,
    ValidatedJson(req): ValidatedJson<UpdateHintRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let service = HintService::new(state.mongo.clone(), state.redis.clone());
    let entry = service.get_entry(&entry_id).await?;
    ensure_self_or_admin(&claims, &entry.user_id)?;

    let updated = service.update_entry(&entry, &req).await?;

    Ok(Json(HintEntryResponse::from(updated)))
}

pub async fn delete_hint(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(entry_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let service = HintService::new(state.mongo.clone(), state.redis.clone());
    let entry = service.get_entry(&entry_id).await?;
    ensure_self_or_admin(&claims, &entry.user_id)?;

    service.delete_entry(&entry).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Cross-user aggregate, readable by any authenticated caller; no per-user
/// records are exposed.
pub async fn question_stats(
    State(state): State<Arc<AppState>>,
    Path(question_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let service = AnalyticsService::new(
        state.mongo.clone(),
        state.redis.clone(),
        state.config.analytics.trend_months,
    );
    let stats = service.question_stats(&question_id).await;

    Ok(Json(stats))
}

pub async fn user_analytics(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_self_or_admin(&claims, &user_id)?;

    let service = AnalyticsService::new(
        state.mongo.clone(),
        state.redis.clone(),
        state.config.analytics.trend_months,
    );
    let analytics = service.user_analytics(&user_id).await;

    Ok(Json(analytics))
}
