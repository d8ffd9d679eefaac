use axum::{
    extract::{FromRequest, FromRequestParts, Request},
    http::request::Parts,
    Json,
};
use mongodb::bson::oid::ObjectId;

use crate::errors::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Authenticated caller identity, injected by the upstream gateway as an
/// `x-user-id` header. Authentication itself happens outside this service.
pub struct UserId(pub ObjectId);

impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Validation("Missing x-user-id header".to_string()))?;

        let user_id = ObjectId::parse_str(value)
            .map_err(|_| ApiError::Validation("Invalid x-user-id header".to_string()))?;

        Ok(UserId(user_id))
    }
}

/// JSON extractor that reports malformed bodies through the shared error
/// envelope instead of axum's default rejection.
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
                Err(ApiError::Validation(message))
            }
        }
    }
}
