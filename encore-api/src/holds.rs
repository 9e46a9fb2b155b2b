use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use encore_core::{AcquireOutcome, HeldSeat, PriceSummary, RequesterId, SeatId};
use serde::Deserialize;
use tracing::info;
use crate::{error::AppError, state::AppState};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AcquireSeatsRequest {
    pub requester_id: String,
    pub seat_ids: Vec<i64>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/holds", post(acquire_seats))
        .route("/v1/holds/{requester_id}", get(list_holds))
        .route("/v1/holds/{requester_id}/summary", get(price_summary))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /v1/holds
/// Hold a batch of seats. Partial success is still 200; see `conflicted` and `unknown`.
pub async fn acquire_seats(
    State(state): State<AppState>,
    Json(req): Json<AcquireSeatsRequest>,
) -> Result<Json<AcquireOutcome>, AppError> {
    if req.seat_ids.is_empty() {
        return Err(AppError::ValidationError("seat_ids must not be empty".to_string()));
    }
    if req.requester_id.trim().is_empty() {
        return Err(AppError::ValidationError("requester_id must not be empty".to_string()));
    }

    let requester_id = RequesterId::new(req.requester_id);
    let seat_ids: Vec<SeatId> = req.seat_ids.into_iter().map(SeatId).collect();

    let outcome = state.engine.acquire_seats(&seat_ids, &requester_id).await?;
    info!(
        "Hold request from {}: {} granted, {} conflicted, {} unknown",
        requester_id,
        outcome.granted.len(),
        outcome.conflicted.len(),
        outcome.unknown.len()
    );

    Ok(Json(outcome))
}

/// GET /v1/holds/{requester_id}
pub async fn list_holds(
    State(state): State<AppState>,
    Path(requester_id): Path<String>,
) -> Result<Json<Vec<HeldSeat>>, AppError> {
    let held = state
        .engine
        .list_holds_for_requester(&RequesterId::new(requester_id))
        .await?;
    Ok(Json(held))
}

/// GET /v1/holds/{requester_id}/summary
/// Price of every seat currently held
pub async fn price_summary(
    State(state): State<AppState>,
    Path(requester_id): Path<String>,
) -> Result<Json<PriceSummary>, AppError> {
    let summary = state
        .engine
        .price_summary(&RequesterId::new(requester_id), state.catalog.as_ref())
        .await?;
    Ok(Json(summary))
}
