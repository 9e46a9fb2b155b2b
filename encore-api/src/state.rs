use std::sync::Arc;
use encore_booking::{ExpirySweeper, ReservationEngine};
use encore_core::{HoldEvent, HoldTracker, PriceCatalog, SeatInventory};
use tokio::sync::broadcast;

#[derive(Clone)]
pub struct AppState {
    pub inventory: Arc<dyn SeatInventory>,
    pub engine: Arc<ReservationEngine>,
    pub sweeper: Arc<ExpirySweeper>,
    pub catalog: Arc<dyn PriceCatalog>,
    pub events: broadcast::Sender<HoldEvent>,
}

impl AppState {
    pub fn new(
        inventory: Arc<dyn SeatInventory>,
        holds: Arc<dyn HoldTracker>,
        catalog: Arc<dyn PriceCatalog>,
        hold_lifetime: chrono::Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        let engine = ReservationEngine::new(inventory.clone(), holds.clone(), hold_lifetime)
            .with_events(events.clone());
        let sweeper = ExpirySweeper::new(inventory.clone(), holds, hold_lifetime)
            .with_events(events.clone());

        Self {
            inventory,
            engine: Arc::new(engine),
            sweeper: Arc::new(sweeper),
            catalog,
            events,
        }
    }
}
