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
    models::adaptive::{CreateProfileRequest, UpdateProfileRequest},
    services::{adaptive_service::AdaptiveService, AppState},
};

fn service(state: &AppState) -> AdaptiveService {
    AdaptiveService::new(state.mongo.clone(), state.config.adaptive.metrics_window)
}

/// Privileged: only admins may provision profiles.
pub async fn create_profile(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    ValidatedJson(req): ValidatedJson<CreateProfileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !claims.is_admin() {
        return Err(ApiError::forbidden("Not permitted"));
    }

    let profile = service(&state).create_profile(&req).await?;

    Ok((StatusCode::CREATED, Json(profile)))
}

pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_self_or_admin(&claims, &user_id)?;

    let profile = service(&state).get_profile(&user_id).await?;

    Ok(Json(profile))
}

pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(user_id): Path<String>,
    ValidatedJson(req): ValidatedJson<UpdateProfileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_self_or_admin(&claims, &user_id)?;

    let profile = service(&state).update_profile(&user_id, &req).await?;

    Ok(Json(profile))
}

/// Runs the rule evaluator against the caller's recent metrics window and
/// persists the resulting profile.
pub async fn adjust_profile(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_self_or_admin(&claims, &user_id)?;

    let report = service(&state).evaluate(&user_id).await?;

    Ok(Json(report))
}
