//! JSON API over [`ResearchService`] plus server-sent progress streams.

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures::StreamExt;
use research_core::{CoreError, ErrorExt, HistoryEntry, ProgressEvent, SortOrder};
use research_pipeline::{
    AddThreadOutcome, ExpandStatus, OperationKind, ResearchDetail, ResearchService, StartResearch,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Clone)]
struct AppState {
    service: Arc<ResearchService>,
}

#[derive(Serialize)]
struct StartedResponse {
    research_id: String,
}

#[derive(Serialize)]
struct ExpandStartedResponse {
    sort: SortOrder,
}

#[derive(Serialize)]
struct SummaryResponse {
    summary: String,
}

#[derive(Serialize)]
struct ExportResponse {
    path: String,
}

#[derive(Serialize)]
struct SuccessResponse {
    success: bool,
}

impl SuccessResponse {
    fn ok() -> Json<Self> {
        Json(Self { success: true })
    }
}

#[derive(Deserialize)]
struct AddThreadRequest {
    #[serde(default)]
    url: String,
}

#[derive(Deserialize)]
struct OverrideRequest {
    score: Option<u8>,
}

#[derive(Deserialize)]
struct StarRequest {
    starred: bool,
}

#[derive(Deserialize)]
struct ArchiveRequest {
    archived: bool,
}

pub fn router(service: Arc<ResearchService>) -> Router {
    Router::new()
        .route("/api/research", post(start_research_handler))
        .route("/api/research/{id}", get(research_handler))
        .route("/api/research/{id}/stream", get(research_stream_handler))
        .route("/api/research/{id}/summarize", post(summarize_handler))
        .route("/api/research/{id}/export", post(export_handler))
        .route("/api/research/{id}/archive", post(archive_handler))
        .route(
            "/api/research/{id}/threads/{thread_id}",
            delete(delete_thread_handler),
        )
        .route("/api/research/{id}/expand", post(expand_handler))
        .route("/api/research/{id}/expand/status", get(expand_status_handler))
        .route("/api/research/{id}/expand/stream", get(expand_stream_handler))
        .route("/api/research/{id}/add-thread", post(add_thread_handler))
        .route(
            "/api/research/{id}/add-thread/stream",
            get(add_thread_stream_handler),
        )
        .route(
            "/api/research/{id}/comments/{comment_id}/override",
            post(override_handler),
        )
        .route(
            "/api/research/{id}/comments/{comment_id}/star",
            post(star_handler),
        )
        .route("/api/history", get(history_handler))
        .with_state(AppState { service })
}

pub async fn serve(service: Arc<ResearchService>, bind_addr: &str) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(service)).await?;
    Ok(())
}

async fn start_research_handler(
    State(state): State<AppState>,
    Json(request): Json<StartResearch>,
) -> Result<Json<StartedResponse>, AppError> {
    let research_id = state.service.start_research(request).await?;
    Ok(Json(StartedResponse { research_id }))
}

async fn research_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ResearchDetail>, AppError> {
    Ok(Json(state.service.get_research(&id).await?))
}

async fn summarize_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SummaryResponse>, AppError> {
    let summary = state.service.summarize(&id).await?;
    Ok(Json(SummaryResponse { summary }))
}

async fn export_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExportResponse>, AppError> {
    let path = state.service.export_csv(&id).await?;
    Ok(Json(ExportResponse {
        path: path.display().to_string(),
    }))
}

async fn archive_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ArchiveRequest>,
) -> Result<Json<SuccessResponse>, AppError> {
    state.service.set_archived(&id, request.archived).await?;
    Ok(SuccessResponse::ok())
}

async fn delete_thread_handler(
    State(state): State<AppState>,
    Path((id, thread_id)): Path<(String, String)>,
) -> Result<Json<SuccessResponse>, AppError> {
    state.service.delete_thread(&id, &thread_id).await?;
    Ok(SuccessResponse::ok())
}

async fn expand_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExpandStartedResponse>, AppError> {
    let sort = state.service.expand(&id).await?;
    Ok(Json(ExpandStartedResponse { sort }))
}

async fn expand_status_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExpandStatus>, AppError> {
    Ok(Json(state.service.expand_status(&id).await?))
}

async fn add_thread_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<AddThreadRequest>,
) -> Result<Json<AddThreadOutcome>, AppError> {
    Ok(Json(state.service.add_thread(&id, &request.url).await?))
}

async fn override_handler(
    State(state): State<AppState>,
    Path((id, comment_id)): Path<(String, String)>,
    Json(request): Json<OverrideRequest>,
) -> Result<Json<SuccessResponse>, AppError> {
    state
        .service
        .set_comment_override(&id, &comment_id, request.score)
        .await?;
    Ok(SuccessResponse::ok())
}

async fn star_handler(
    State(state): State<AppState>,
    Path((id, comment_id)): Path<(String, String)>,
    Json(request): Json<StarRequest>,
) -> Result<Json<SuccessResponse>, AppError> {
    state
        .service
        .set_comment_starred(&id, &comment_id, request.starred)
        .await?;
    Ok(SuccessResponse::ok())
}

async fn history_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<HistoryEntry>>, AppError> {
    Ok(Json(state.service.history().await?))
}

async fn research_stream_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    progress_stream(&state, &id, OperationKind::Research)
}

async fn expand_stream_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    progress_stream(&state, &id, OperationKind::Expand)
}

async fn add_thread_stream_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    progress_stream(&state, &id, OperationKind::AddThread)
}

fn sse_frame(event: &ProgressEvent) -> Bytes {
    let payload = serde_json::to_string(event).unwrap_or_else(|_| {
        r#"{"stage":"error","message":"Unserializable progress event","progress":0}"#.to_string()
    });
    Bytes::from(format!("data: {payload}\n\n"))
}

/// Streams one run's events as `data: <json>` frames. The response ends
/// when the run closes its stream.
fn progress_stream(state: &AppState, research_id: &str, kind: OperationKind) -> Result<Response, AppError> {
    let stream = state
        .service
        .subscribe(research_id, kind)
        .into_stream()
        .map(|event| Ok::<Bytes, Infallible>(sse_frame(&event)));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
        .map_err(AppError::internal)
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn internal(err: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: err.to_string(),
        }
    }
}

impl From<CoreError> for AppError {
    fn from(error: CoreError) -> Self {
        match error {
            CoreError::InvalidInput { message } => Self {
                status: StatusCode::BAD_REQUEST,
                message,
            },
            CoreError::NotFound { resource } => Self {
                status: StatusCode::NOT_FOUND,
                message: format!("Not found: {resource}"),
            },
            CoreError::Conflict { message } => Self {
                status: StatusCode::CONFLICT,
                message,
            },
            other => {
                other.log_error();
                Self::internal(other.user_friendly_message())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}
