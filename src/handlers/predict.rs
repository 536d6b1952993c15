//! Prediction handler

use axum::{extract::{rejection::JsonRejection, State}, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AppResult, AppState};

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictResponse {
    pub predictions: Vec<f64>,
}

/// Predict one value per payload row
pub async fn predict(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> AppResult<Json<PredictResponse>> {
    let Json(payload) = payload?;

    let predictions = state.service.predict(&payload).await?;
    tracing::debug!("Returning {} predictions", predictions.len());

    Ok(Json(PredictResponse { predictions }))
}
