use crate::error::Result;
use crate::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use edgecam_protocol::{AnswerResponse, OfferRequest};

/// `POST /offer`: negotiate a new viewer session
pub async fn offer(
    State(state): State<AppState>,
    payload: std::result::Result<Json<OfferRequest>, JsonRejection>,
) -> Result<Json<AnswerResponse>> {
    let Json(req) = payload?;
    let mode = req.filter.unwrap_or(state.config.filter);
    let answer = state.sessions.negotiate(req.description, mode).await?;
    Ok(Json(answer))
}
