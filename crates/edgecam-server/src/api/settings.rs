use crate::error::Result;
use crate::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use edgecam_protocol::FilterSettings;

pub async fn get_settings(State(state): State<AppState>) -> Json<FilterSettings> {
    Json(*state.settings.borrow())
}

/// Replace the thresholds; every open session picks them up on its next frame
pub async fn update_settings(
    State(state): State<AppState>,
    payload: std::result::Result<Json<FilterSettings>, JsonRejection>,
) -> Result<Json<FilterSettings>> {
    let Json(settings) = payload?;
    settings.validate()?;
    state.settings.send_replace(settings);
    tracing::info!(
        "Thresholds set to {} / {}",
        settings.threshold1,
        settings.threshold2
    );
    Ok(Json(settings))
}
