pub mod models;
pub mod repository;
pub mod events;

pub use models::{
    AcquireOutcome, HeldSeat, Hold, HoldId, OptionId, OptionListing, PriceSummary, RequesterId, Seat, SeatFilter,
    SeatId, SeatPrice, SeatStatus, SweepReport, TransitionOutcome,
};
pub use repository::{HoldTracker, PriceCatalog, SeatInventory};
pub use events::HoldEvent;

/// Failure of the persistence provider itself. Conflicts are never reported through this type.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("Storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::Backend(Box::new(err))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HoldError {
    #[error("Seat {seat_id} already has an active hold")]
    DuplicateHold { seat_id: SeatId },
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type StoreResult<T> = Result<T, StoreError>;
