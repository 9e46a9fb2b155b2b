use chrono::{DateTime, Duration, Utc};
use encore_core::{
    AcquireOutcome, HeldSeat, HoldError, HoldEvent, HoldTracker, PriceCatalog, PriceSummary,
    RequesterId, SeatId, SeatInventory, SeatPrice, SeatStatus, TransitionOutcome,
};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use crate::{BookingError, BookingResult};

/// Orchestrates batch seat acquisition.
///
/// The conditional `Available -> Held` transition is the only decision point;
/// the preliminary fetch only classifies unknown ids.
pub struct ReservationEngine {
    seats: Arc<dyn SeatInventory>,
    holds: Arc<dyn HoldTracker>,
    hold_lifetime: Duration,
    events: Option<broadcast::Sender<HoldEvent>>,
}

impl ReservationEngine {
    pub fn new(seats: Arc<dyn SeatInventory>, holds: Arc<dyn HoldTracker>, hold_lifetime: Duration) -> Self {
        Self {
            seats,
            holds,
            hold_lifetime,
            events: None,
        }
    }

    pub fn with_events(mut self, events: broadcast::Sender<HoldEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn hold_lifetime(&self) -> Duration {
        self.hold_lifetime
    }

    pub async fn acquire_seats(
        &self,
        seat_ids: &[SeatId],
        requester_id: &RequesterId,
    ) -> BookingResult<AcquireOutcome> {
        self.acquire_seats_at(seat_ids, requester_id, Utc::now()).await
    }

    /// Acquire every listed seat that is `Available` at the moment of its transition.
    ///
    /// Seats are processed once each, in ascending id order. Unavailable and unknown
    /// seats are reported in the outcome; only storage failures return `Err`.
    pub async fn acquire_seats_at(
        &self,
        seat_ids: &[SeatId],
        requester_id: &RequesterId,
        now: DateTime<Utc>,
    ) -> BookingResult<AcquireOutcome> {
        let ordered: Vec<SeatId> = seat_ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
        let known: HashSet<SeatId> = self
            .seats
            .fetch_by_ids(&ordered)
            .await?
            .into_iter()
            .map(|s| s.id)
            .collect();

        let mut outcome = AcquireOutcome::default();

        for seat_id in ordered {
            if !known.contains(&seat_id) {
                debug!("Seat {} not found for {}", seat_id, requester_id);
                outcome.unknown.push(seat_id);
                continue;
            }

            match self
                .seats
                .transition_status(seat_id, SeatStatus::Available, SeatStatus::Held, now)
                .await?
            {
                TransitionOutcome::Applied => {}
                TransitionOutcome::Conflict { actual } => {
                    debug!("Seat {} is {}, not available to {}", seat_id, actual, requester_id);
                    outcome.conflicted.push(seat_id);
                    continue;
                }
                TransitionOutcome::NotFound => {
                    outcome.unknown.push(seat_id);
                    continue;
                }
            }

            match self.holds.create(seat_id, requester_id, now).await {
                Ok(hold) => {
                    info!("Seat {} held by {} (hold {})", seat_id, requester_id, hold.id);
                    self.publish(HoldEvent::SeatHeld {
                        seat_id,
                        hold_id: hold.id,
                        requester_id: requester_id.clone(),
                        held_at: now,
                    });
                    outcome.granted.push(hold);
                }
                Err(HoldError::DuplicateHold { .. }) => {
                    // A hold record still exists, so the seat stays Held; once that record is
                    // swept, the seat is reverted as an orphan a lifetime after this transition
                    warn!("Seat {} already has a hold record; reporting conflict", seat_id);
                    outcome.conflicted.push(seat_id);
                }
                Err(HoldError::Store(e)) => {
                    error!("Hold creation for seat {} failed: {}", seat_id, e);
                    self.revert(seat_id, now).await;
                    return Err(e.into());
                }
            }
        }

        Ok(outcome)
    }

    async fn revert(&self, seat_id: SeatId, now: DateTime<Utc>) {
        match self
            .seats
            .transition_status(seat_id, SeatStatus::Held, SeatStatus::Available, now)
            .await
        {
            Ok(TransitionOutcome::Applied) => warn!("Seat {} reverted to AVAILABLE", seat_id),
            Ok(other) => warn!("Seat {} revert skipped: {:?}", seat_id, other),
            // Left as an orphan; the sweeper releases it once it is older than the hold lifetime
            Err(e) => error!("Seat {} revert failed: {}", seat_id, e),
        }
    }

    /// Active holds for a requester, with the option each seat belongs to.
    pub async fn list_holds_for_requester(&self, requester_id: &RequesterId) -> BookingResult<Vec<HeldSeat>> {
        let holds = self.holds.find_by_requester(requester_id).await?;
        if holds.is_empty() {
            return Ok(Vec::new());
        }

        let seat_ids: Vec<SeatId> = holds.iter().map(|h| h.seat_id).collect();
        let options: HashMap<SeatId, _> = self
            .seats
            .fetch_by_ids(&seat_ids)
            .await?
            .into_iter()
            .map(|s| (s.id, s.option_id))
            .collect();

        let mut held = Vec::with_capacity(holds.len());
        for hold in holds {
            let Some(option_id) = options.get(&hold.seat_id) else {
                warn!("Hold {} references missing seat {}", hold.id, hold.seat_id);
                continue;
            };
            held.push(HeldSeat {
                hold_id: hold.id,
                seat_id: hold.seat_id,
                option_id: *option_id,
                created_at: hold.created_at,
                expires_at: hold.expires_at(self.hold_lifetime),
            });
        }
        Ok(held)
    }

    /// Price of every seat the requester currently holds.
    pub async fn price_summary(
        &self,
        requester_id: &RequesterId,
        catalog: &dyn PriceCatalog,
    ) -> BookingResult<PriceSummary> {
        let held = self.list_holds_for_requester(requester_id).await?;

        let mut seats = Vec::with_capacity(held.len());
        for seat in held {
            let price = catalog
                .price_for(seat.option_id)
                .await?
                .ok_or(BookingError::Pricing(seat.option_id))?;
            seats.push(SeatPrice { seat_id: seat.seat_id, price });
        }
        Ok(PriceSummary::new(requester_id.clone(), seats))
    }

    fn publish(&self, event: HoldEvent) {
        if let Some(tx) = &self.events {
            // No subscribers is fine
            let _ = tx.send(event);
        }
    }
}
