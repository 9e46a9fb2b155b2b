use async_trait::async_trait;
use chrono::{DateTime, Utc};
use encore_core::{
    Hold, HoldError, HoldId, HoldTracker, RequesterId, Seat, SeatFilter, SeatId, SeatInventory,
    SeatStatus, StoreResult, TransitionOutcome,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// In-process seat inventory and hold tracker.
///
/// Every seat sits behind its own mutex, so conditional transitions on different
/// seats never contend. The outer map lock is only taken for writing when seats
/// are provisioned.
#[derive(Default)]
pub struct MemoryStore {
    seats: RwLock<BTreeMap<SeatId, Arc<Mutex<Seat>>>>,
    holds: Mutex<HoldTable>,
}

#[derive(Default)]
struct HoldTable {
    by_seat: HashMap<SeatId, Hold>,
    seat_of: HashMap<HoldId, SeatId>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog provisioning. Replaces any seat with the same id.
    pub async fn provision_seat(&self, seat: Seat) {
        self.seats.write().await.insert(seat.id, Arc::new(Mutex::new(seat)));
    }

    pub async fn provision_seats(&self, seats: impl IntoIterator<Item = Seat>) {
        let mut map = self.seats.write().await;
        for seat in seats {
            map.insert(seat.id, Arc::new(Mutex::new(seat)));
        }
    }

    pub async fn hold_count(&self) -> usize {
        self.holds.lock().await.by_seat.len()
    }

    async fn seat_cell(&self, seat_id: SeatId) -> Option<Arc<Mutex<Seat>>> {
        self.seats.read().await.get(&seat_id).cloned()
    }

    async fn snapshot(&self) -> Vec<Arc<Mutex<Seat>>> {
        self.seats.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl SeatInventory for MemoryStore {
    async fn list_seats(&self, filter: &SeatFilter) -> StoreResult<Vec<Seat>> {
        let mut seats = Vec::new();
        for cell in self.snapshot().await {
            let seat = cell.lock().await;
            if filter.matches(&seat) {
                seats.push(seat.clone());
            }
        }
        Ok(seats)
    }

    async fn fetch_by_ids(&self, ids: &[SeatId]) -> StoreResult<Vec<Seat>> {
        let mut seats = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(cell) = self.seat_cell(*id).await {
                seats.push(cell.lock().await.clone());
            }
        }
        Ok(seats)
    }

    async fn fetch_by_status(&self, status: SeatStatus) -> StoreResult<Vec<Seat>> {
        let mut seats = Vec::new();
        for cell in self.snapshot().await {
            let seat = cell.lock().await;
            if seat.status == status {
                seats.push(seat.clone());
            }
        }
        Ok(seats)
    }

    async fn transition_status(
        &self,
        seat_id: SeatId,
        expected: SeatStatus,
        new: SeatStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<TransitionOutcome> {
        let Some(cell) = self.seat_cell(seat_id).await else {
            return Ok(TransitionOutcome::NotFound);
        };
        let mut seat = cell.lock().await;
        if seat.status != expected {
            return Ok(TransitionOutcome::Conflict { actual: seat.status });
        }
        seat.status = new;
        seat.status_changed_at = at;
        Ok(TransitionOutcome::Applied)
    }

    async fn release_stale(
        &self,
        seat_id: SeatId,
        held_not_after: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> StoreResult<TransitionOutcome> {
        let Some(cell) = self.seat_cell(seat_id).await else {
            return Ok(TransitionOutcome::NotFound);
        };
        let mut seat = cell.lock().await;
        if seat.status != SeatStatus::Held || seat.status_changed_at > held_not_after {
            return Ok(TransitionOutcome::Conflict { actual: seat.status });
        }
        seat.status = SeatStatus::Available;
        seat.status_changed_at = at;
        Ok(TransitionOutcome::Applied)
    }
}

#[async_trait]
impl HoldTracker for MemoryStore {
    async fn create(
        &self,
        seat_id: SeatId,
        requester_id: &RequesterId,
        at: DateTime<Utc>,
    ) -> Result<Hold, HoldError> {
        let mut table = self.holds.lock().await;
        if table.by_seat.contains_key(&seat_id) {
            return Err(HoldError::DuplicateHold { seat_id });
        }
        let hold = Hold::new(seat_id, requester_id.clone(), at);
        table.seat_of.insert(hold.id, seat_id);
        table.by_seat.insert(seat_id, hold.clone());
        Ok(hold)
    }

    async fn find_by_seat_id(&self, seat_id: SeatId) -> StoreResult<Option<Hold>> {
        Ok(self.holds.lock().await.by_seat.get(&seat_id).cloned())
    }

    async fn find_by_requester(&self, requester_id: &RequesterId) -> StoreResult<Vec<Hold>> {
        let table = self.holds.lock().await;
        let mut holds: Vec<Hold> = table
            .by_seat
            .values()
            .filter(|h| &h.requester_id == requester_id)
            .cloned()
            .collect();
        holds.sort_by_key(|h| h.seat_id);
        Ok(holds)
    }

    async fn delete(&self, hold_id: HoldId) -> StoreResult<()> {
        let mut table = self.holds.lock().await;
        if let Some(seat_id) = table.seat_of.remove(&hold_id) {
            table.by_seat.remove(&seat_id);
        }
        Ok(())
    }
}
