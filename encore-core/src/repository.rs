use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crate::models::{Hold, HoldId, OptionId, OptionListing, RequesterId, Seat, SeatFilter, SeatId, SeatStatus, TransitionOutcome};
use crate::{HoldError, StoreResult};

/// Authoritative record of each seat and its status.
///
/// `transition_status` is the only write path and must be atomic per seat:
/// two callers can never both observe `expected` and both apply `new`.
#[async_trait]
pub trait SeatInventory: Send + Sync {
    /// All seats matching `filter`, in ascending id order.
    async fn list_seats(&self, filter: &SeatFilter) -> StoreResult<Vec<Seat>>;

    async fn list_available(&self, filter: &SeatFilter) -> StoreResult<Vec<Seat>> {
        let seats = self.list_seats(filter).await?;
        Ok(seats.into_iter().filter(|s| s.status == SeatStatus::Available).collect())
    }

    /// Missing ids are absent from the result.
    async fn fetch_by_ids(&self, ids: &[SeatId]) -> StoreResult<Vec<Seat>>;

    async fn fetch_by_status(&self, status: SeatStatus) -> StoreResult<Vec<Seat>>;

    async fn transition_status(
        &self,
        seat_id: SeatId,
        expected: SeatStatus,
        new: SeatStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<TransitionOutcome>;

    /// `Held -> Available`, applied only if the seat entered `Held` no later than
    /// `held_not_after`. A seat re-acquired after that instant reports `Conflict`.
    async fn release_stale(
        &self,
        seat_id: SeatId,
        held_not_after: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> StoreResult<TransitionOutcome>;
}

/// Active holds, at most one per seat.
#[async_trait]
pub trait HoldTracker: Send + Sync {
    async fn create(
        &self,
        seat_id: SeatId,
        requester_id: &RequesterId,
        at: DateTime<Utc>,
    ) -> Result<Hold, HoldError>;

    async fn find_by_seat_id(&self, seat_id: SeatId) -> StoreResult<Option<Hold>>;

    async fn find_by_requester(&self, requester_id: &RequesterId) -> StoreResult<Vec<Hold>>;

    /// Idempotent: deleting an unknown id is a no-op.
    async fn delete(&self, hold_id: HoldId) -> StoreResult<()>;
}

/// Read side of the catalog service: option prices and reservation windows
#[async_trait]
pub trait PriceCatalog: Send + Sync {
    async fn price_for(&self, option_id: OptionId) -> StoreResult<Option<i64>>;

    /// Options whose reservation window contains `at`, in ascending id order.
    async fn list_open_options(&self, at: DateTime<Utc>) -> StoreResult<Vec<OptionListing>>;
}
