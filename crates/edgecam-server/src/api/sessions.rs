use crate::error::{AppError, Result};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use edgecam_protocol::SessionsResponse;
use uuid::Uuid;

pub async fn list_sessions(State(state): State<AppState>) -> Json<SessionsResponse> {
    let sessions = state.sessions.list().await;
    Json(SessionsResponse {
        count: sessions.len(),
        sessions,
    })
}

pub async fn close_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    if state.sessions.close(id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("Session {} not found", id)))
    }
}
