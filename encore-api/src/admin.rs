use std::convert::Infallible;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use encore_core::{HoldEvent, SweepReport};
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};
use tracing::info;
use crate::{error::AppError, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/admin/sweep", post(run_sweep))
        .route("/v1/events/stream", get(event_stream))
}

/// POST /v1/admin/sweep
/// Manual trigger for the expiry sweep
pub async fn run_sweep(State(state): State<AppState>) -> Result<Json<SweepReport>, AppError> {
    let report = state.sweeper.reclaim_expired(Utc::now()).await?;
    info!("Manual sweep: {:?}", report);
    Ok(Json(report))
}

/// GET /v1/events/stream
/// Server-sent hold/release events. Lagged receivers silently skip missed events.
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.events.subscribe())
        .filter_map(|result| result.ok())
        .filter_map(|event| {
            let kind = match &event {
                HoldEvent::SeatHeld { .. } => "seat_held",
                HoldEvent::SeatReleased { .. } => "seat_released",
            };
            Event::default().event(kind).json_data(&event).ok()
        })
        .map(Ok);

    Sse::new(stream).keep_alive(KeepAlive::default())
}
