use axum::{
    extract::{FromRequest, Request},
    Json,
};
use validator::Validate;

use crate::error::ApiError;

/// JSON extractor that rejects with the structured `{status, message, code}`
/// error body instead of axum's plain-text default.
pub struct AppJson<T>(pub T);

impl<T, S> FromRequest<S> for AppJson<T>
where
    T: serde::de::DeserializeOwned + 'static,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => {
                let message = format!("Failed to parse JSON request body: {}", rejection);
                tracing::warn!("{}", message);
                Err(ApiError::validation(message))
            }
        }
    }
}

/// `AppJson` plus `validator` field checks; collects every failing field
/// into one validation error.
pub struct ValidatedJson<T>(pub T);

impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: serde::de::DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let AppJson(value) = AppJson::<T>::from_request(req, state).await?;

        value.validate().map_err(|errors| {
            let mut fields: Vec<String> = errors
                .field_errors()
                .iter()
                .map(|(field, errs)| {
                    let detail = errs
                        .first()
                        .and_then(|e| e.message.as_ref())
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| "invalid value".to_string());
                    format!("{}: {}", field, detail)
                })
                .collect();
            fields.sort();
            ApiError::validation(format!("Invalid request: {}", fields.join("; ")))
        })?;

        Ok(ValidatedJson(value))
    }
}
