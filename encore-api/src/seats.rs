use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use encore_core::{OptionId, OptionListing, Seat, SeatFilter, SeatStatus};
use serde::Deserialize;
use crate::{error::AppError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct SeatQuery {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OptionQuery {
    pub reserve_at: Option<DateTime<Utc>>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/options", get(list_options))
        .route("/v1/options/{option_id}/seats", get(list_seats))
}

/// GET /v1/options?reserve_at=2026-10-19T18:00:00Z
/// Performances whose reservation window contains `reserve_at` (default: now)
pub async fn list_options(
    State(state): State<AppState>,
    Query(query): Query<OptionQuery>,
) -> Result<Json<Vec<OptionListing>>, AppError> {
    let at = query.reserve_at.unwrap_or_else(Utc::now);
    let options = state.catalog.list_open_options(at).await?;
    Ok(Json(options))
}

/// GET /v1/options/{option_id}/seats?status=available
/// Seat map of one performance
pub async fn list_seats(
    State(state): State<AppState>,
    Path(option_id): Path<i64>,
    Query(query): Query<SeatQuery>,
) -> Result<Json<Vec<Seat>>, AppError> {
    let filter = SeatFilter::for_option(OptionId(option_id));

    let seats = match query.status.as_deref() {
        None => state.inventory.list_seats(&filter).await?,
        Some(raw) => {
            let status = raw.parse::<SeatStatus>().map_err(AppError::ValidationError)?;
            if status == SeatStatus::Available {
                state.inventory.list_available(&filter).await?
            } else {
                state
                    .inventory
                    .list_seats(&filter)
                    .await?
                    .into_iter()
                    .filter(|s| s.status == status)
                    .collect()
            }
        }
    };

    if seats.is_empty() && query.status.is_none() {
        return Err(AppError::NotFoundError(format!("No seats for option {}", option_id)));
    }
    Ok(Json(seats))
}
