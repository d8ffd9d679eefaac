use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use mongodb::bson::oid::ObjectId;
use serde::Deserialize;
use std::sync::Arc;

use crate::{
    errors::ApiError,
    extractors::{AppJson, UserId},
    models::attempt::{AttemptStatus, AttemptView, SubmitRequest, UpdateProgressRequest},
    services::{attempt_service::AttemptService, AppState},
};

fn parse_object_id(value: &str, name: &str) -> Result<ObjectId, ApiError> {
    ObjectId::parse_str(value).map_err(|_| ApiError::Validation(format!("Invalid {}", name)))
}

pub async fn start_attempt(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    Path((series_id, paper_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let series_id = parse_object_id(&series_id, "test series id")?;
    let paper_id = parse_object_id(&paper_id, "question paper id")?;

    tracing::info!(
        "Starting test attempt for user={}, paper={}",
        user_id,
        paper_id
    );

    let service = AttemptService::new(state.mongo.clone());
    let (attempt, resumed) = service
        .start_or_resume(user_id, series_id, paper_id)
        .await?;

    let status = if resumed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(AttemptView::from_record(&attempt))))
}

#[derive(Debug, Deserialize)]
pub struct CurrentAttemptQuery {
    #[serde(default, rename = "includeAll")]
    pub include_all: bool,
}

pub async fn get_current_attempt(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    Path((series_id, paper_id)): Path<(String, String)>,
    Query(query): Query<CurrentAttemptQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let series_id = parse_object_id(&series_id, "test series id")?;
    let paper_id = parse_object_id(&paper_id, "question paper id")?;

    let service = AttemptService::new(state.mongo.clone());
    let attempt = service
        .get_current(user_id, series_id, paper_id, query.include_all)
        .await?;

    Ok(Json(attempt.as_ref().map(AttemptView::from_record)))
}

pub async fn update_progress(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    Path((series_id, paper_id, attempt_id)): Path<(String, String, String)>,
    AppJson(patch): AppJson<UpdateProgressRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let series_id = parse_object_id(&series_id, "test series id")?;
    let paper_id = parse_object_id(&paper_id, "question paper id")?;
    let attempt_id = parse_object_id(&attempt_id, "attempt id")?;

    let service = AttemptService::new(state.mongo.clone());
    let attempt = service
        .update_progress(attempt_id, user_id, series_id, paper_id, &patch)
        .await?;

    Ok(Json(AttemptView::from_record(&attempt)))
}

pub async fn submit_attempt(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    Path((series_id, paper_id, attempt_id)): Path<(String, String, String)>,
    AppJson(req): AppJson<SubmitRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let series_id = parse_object_id(&series_id, "test series id")?;
    let paper_id = parse_object_id(&paper_id, "question paper id")?;
    let attempt_id = parse_object_id(&attempt_id, "attempt id")?;

    tracing::info!("Submitting test attempt {} for user {}", attempt_id, user_id);

    let service = AttemptService::new(state.mongo.clone());
    let attempt = service
        .submit(attempt_id, user_id, series_id, paper_id, &req)
        .await?;

    Ok(Json(AttemptView::from_record(&attempt)))
}

pub async fn get_results(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    Path((series_id, paper_id, attempt_id)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let series_id = parse_object_id(&series_id, "test series id")?;
    let paper_id = parse_object_id(&paper_id, "question paper id")?;
    let attempt_id = parse_object_id(&attempt_id, "attempt id")?;

    let service = AttemptService::new(state.mongo.clone());
    let attempt = service
        .get_results(Some(attempt_id), user_id, series_id, paper_id)
        .await?;

    Ok(Json(AttemptView::from_record(&attempt)))
}

pub async fn get_latest_results(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    Path((series_id, paper_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let series_id = parse_object_id(&series_id, "test series id")?;
    let paper_id = parse_object_id(&paper_id, "question paper id")?;

    let service = AttemptService::new(state.mongo.clone());
    let attempt = service
        .get_results(None, user_id, series_id, paper_id)
        .await?;

    Ok(Json(AttemptView::from_record(&attempt)))
}

#[derive(Debug, Deserialize)]
pub struct ListAttemptsQuery {
    #[serde(default)]
    pub status: Option<String>,
}

pub async fn list_attempts(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    Path(series_id): Path<String>,
    Query(query): Query<ListAttemptsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let series_id = parse_object_id(&series_id, "test series id")?;
    let status = query
        .status
        .as_deref()
        .map(|value| {
            value
                .parse::<AttemptStatus>()
                .map_err(ApiError::Validation)
        })
        .transpose()?;

    let service = AttemptService::new(state.mongo.clone());
    let attempts = service.list_attempts(user_id, series_id, status).await?;

    let views: Vec<AttemptView> = attempts.iter().map(AttemptView::from_record).collect();
    Ok(Json(views))
}
