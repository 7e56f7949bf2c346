use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tracing::error;

use crate::api::models::{CommandResponse, CreateResponse, ErrorBody, ListQuery};
use crate::changefeed::alter::AlterChangefeed;
use crate::changefeed::view::IntrospectionRow;
use crate::errors::ChangefeedError;
use crate::jobs::model::JobId;
use crate::jobs::registry::{ChangefeedRegistry, CreateChangefeed};

pub mod models;

#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<ChangefeedRegistry>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/changefeeds", get(list_changefeeds).post(create_changefeed))
        .route("/changefeeds/:id", get(show_changefeed))
        .route("/changefeeds/:id/pause", post(pause_changefeed))
        .route("/changefeeds/:id/resume", post(resume_changefeed))
        .route("/changefeeds/:id/cancel", post(cancel_changefeed))
        .route("/changefeeds/:id/alter", post(alter_changefeed))
        .route("/health", get(health))
        .with_state(state)
}

pub type ApiError = (StatusCode, Json<ErrorBody>);

pub fn status_for(e: &ChangefeedError) -> StatusCode {
    match e {
        ChangefeedError::InvalidState { .. } => StatusCode::CONFLICT,
        ChangefeedError::EmptyTargetSet(_)
        | ChangefeedError::InvalidOption { .. }
        | ChangefeedError::InvalidSink(_) => StatusCode::BAD_REQUEST,
        ChangefeedError::NotFound(_) => StatusCode::NOT_FOUND,
        ChangefeedError::PauseTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        ChangefeedError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn api_err(e: ChangefeedError) -> ApiError {
    let status = status_for(&e);
    if status.is_server_error() {
        error!(error = %e, "admin request failed");
    }
    (
        status,
        Json(ErrorBody {
            code: e.code().to_string(),
            error: e.to_string(),
        }),
    )
}

pub async fn list_changefeeds(
    State(state): State<ApiState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<IntrospectionRow>>, ApiError> {
    let rows = state.registry.show_jobs(q.order()).await.map_err(api_err)?;
    Ok(Json(rows))
}

pub async fn create_changefeed(
    State(state): State<ApiState>,
    Json(body): Json<CreateChangefeed>,
) -> Result<(StatusCode, Json<CreateResponse>), ApiError> {
    let job_id = state.registry.create(body).await.map_err(api_err)?;
    Ok((StatusCode::CREATED, Json(CreateResponse { job_id })))
}

/// Zero or one rows; an unknown id is not an error.
pub async fn show_changefeed(
    Path(id): Path<i64>,
    State(state): State<ApiState>,
) -> Result<Json<Vec<IntrospectionRow>>, ApiError> {
    let rows = state.registry.show_job(JobId(id)).await.map_err(api_err)?;
    Ok(Json(rows))
}

fn command_response(state: &ApiState, id: JobId) -> Result<Json<CommandResponse>, ApiError> {
    let status = state.registry.status(id).map_err(api_err)?;
    Ok(Json(CommandResponse { job_id: id, status }))
}

pub async fn pause_changefeed(
    Path(id): Path<i64>,
    State(state): State<ApiState>,
) -> Result<Json<CommandResponse>, ApiError> {
    state.registry.pause(JobId(id)).await.map_err(api_err)?;
    command_response(&state, JobId(id))
}

pub async fn resume_changefeed(
    Path(id): Path<i64>,
    State(state): State<ApiState>,
) -> Result<Json<CommandResponse>, ApiError> {
    state.registry.resume(JobId(id)).await.map_err(api_err)?;
    command_response(&state, JobId(id))
}

pub async fn cancel_changefeed(
    Path(id): Path<i64>,
    State(state): State<ApiState>,
) -> Result<Json<CommandResponse>, ApiError> {
    state.registry.cancel(JobId(id)).await.map_err(api_err)?;
    command_response(&state, JobId(id))
}

pub async fn alter_changefeed(
    Path(id): Path<i64>,
    State(state): State<ApiState>,
    Json(body): Json<AlterChangefeed>,
) -> Result<Json<CommandResponse>, ApiError> {
    state
        .registry
        .alter(JobId(id), &body)
        .await
        .map_err(api_err)?;
    command_response(&state, JobId(id))
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
