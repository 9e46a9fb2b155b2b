pub mod engine;
pub mod sweeper;

pub use engine::ReservationEngine;
pub use sweeper::ExpirySweeper;

use encore_core::{OptionId, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("No price for option {0}")]
    Pricing(OptionId),
}

pub type BookingResult<T> = Result<T, BookingError>;
