//! Telemetry batch ingest endpoint

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;

use crate::api::error::ApiError;
use crate::api::server::AppState;
use crate::ingest::{BatchResponse, TelemetryBatchRequest};

/// `POST /v1/telemetry/batch`
///
/// 202 Accepted means accepted for processing; storage writes happen
/// asynchronously. The response always carries the batch id and the list of
/// event ids that were refused as duplicates.
pub async fn ingest_batch(
    State(state): State<AppState>,
    Json(request): Json<TelemetryBatchRequest>,
) -> Result<(StatusCode, Json<BatchResponse>), ApiError> {
    let response = state.ingest.process_batch(request).await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}
