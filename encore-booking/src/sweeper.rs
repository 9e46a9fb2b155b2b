use chrono::{DateTime, Duration, Utc};
use encore_core::{HoldEvent, HoldTracker, SeatInventory, SeatStatus, SweepReport, TransitionOutcome};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use crate::BookingResult;

/// Returns seats whose hold outlived the hold lifetime to the available pool.
///
/// A hold is deleted before its seat is released, so a seat can never be
/// `Available` while a hold record still points at it. Releases go through
/// `release_stale`, which refuses a seat that was re-acquired after the cutoff.
pub struct ExpirySweeper {
    seats: Arc<dyn SeatInventory>,
    holds: Arc<dyn HoldTracker>,
    hold_lifetime: Duration,
    events: Option<broadcast::Sender<HoldEvent>>,
}

impl ExpirySweeper {
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

    pub async fn reclaim_expired(&self, now: DateTime<Utc>) -> BookingResult<SweepReport> {
        let cutoff = now - self.hold_lifetime;
        let mut report = SweepReport::default();

        for seat in self.seats.fetch_by_status(SeatStatus::Held).await? {
            let hold = self.holds.find_by_seat_id(seat.id).await?;

            let Some(hold) = hold else {
                // Held without a hold record: an acquisition failed halfway, or is still in flight
                if seat.status_changed_at > cutoff {
                    warn!("Seat {} is HELD without a hold record; too recent to release", seat.id);
                    report.skipped += 1;
                    continue;
                }
                warn!("Seat {} is HELD without a hold record since {}; releasing", seat.id, seat.status_changed_at);
                match self.seats.release_stale(seat.id, cutoff, now).await? {
                    TransitionOutcome::Applied => {
                        report.orphans_reverted += 1;
                        self.publish(HoldEvent::SeatReleased { seat_id: seat.id, hold_id: None, released_at: now });
                    }
                    _ => report.skipped += 1,
                }
                continue;
            };

            if !hold.is_expired(now, self.hold_lifetime) {
                continue;
            }

            self.holds.delete(hold.id).await?;
            match self.seats.release_stale(seat.id, cutoff, now).await? {
                TransitionOutcome::Applied => {
                    info!("Reclaimed seat {} from {} (hold {})", seat.id, hold.requester_id, hold.id);
                    report.reclaimed += 1;
                    self.publish(HoldEvent::SeatReleased {
                        seat_id: seat.id,
                        hold_id: Some(hold.id),
                        released_at: now,
                    });
                }
                other => {
                    warn!("Seat {} changed during sweep: {:?}", seat.id, other);
                    report.skipped += 1;
                }
            }
        }

        if report.reclaimed > 0 || report.orphans_reverted > 0 {
            info!(
                "Sweep released {} expired holds and {} orphaned seats",
                report.reclaimed, report.orphans_reverted
            );
        }
        Ok(report)
    }

    fn publish(&self, event: HoldEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ReservationEngine;
    use encore_core::{OptionId, RequesterId, Seat, SeatId};
    use encore_store::MemoryStore;
    use proptest::prelude::*;
    use std::collections::HashSet;

    const LIFETIME_MINUTES: i64 = 5;

    async fn setup(n: i64) -> (Arc<MemoryStore>, ReservationEngine, ExpirySweeper) {
        let store = Arc::new(MemoryStore::new());
        store
            .provision_seats((1..=n).map(|i| Seat::new(SeatId(i), OptionId(1), format!("A{}", i))))
            .await;
        let lifetime = Duration::minutes(LIFETIME_MINUTES);
        let engine = ReservationEngine::new(store.clone(), store.clone(), lifetime);
        let sweeper = ExpirySweeper::new(store.clone(), store.clone(), lifetime);
        (store, engine, sweeper)
    }

    async fn status_of(store: &MemoryStore, id: i64) -> SeatStatus {
        store.fetch_by_ids(&[SeatId(id)]).await.unwrap()[0].status
    }

    #[tokio::test]
    async fn test_ttl_boundary() {
        let (store, engine, sweeper) = setup(1).await;
        let t0 = Utc::now();
        let lifetime = Duration::minutes(LIFETIME_MINUTES);
        engine.acquire_seats_at(&[SeatId(1)], &RequesterId::new("u1"), t0).await.unwrap();

        let early = sweeper.reclaim_expired(t0 + lifetime - Duration::seconds(1)).await.unwrap();
        assert_eq!(early.reclaimed, 0);
        assert_eq!(status_of(&store, 1).await, SeatStatus::Held);

        let late = sweeper.reclaim_expired(t0 + lifetime + Duration::seconds(1)).await.unwrap();
        assert_eq!(late.reclaimed, 1);
        assert_eq!(status_of(&store, 1).await, SeatStatus::Available);
        assert_eq!(store.hold_count().await, 0);
    }

    #[tokio::test]
    async fn test_reclaim_is_idempotent() {
        let (_store, engine, sweeper) = setup(3).await;
        let t0 = Utc::now();
        engine
            .acquire_seats_at(&[SeatId(1), SeatId(2)], &RequesterId::new("u1"), t0)
            .await
            .unwrap();

        let later = t0 + Duration::minutes(10);
        assert_eq!(sweeper.reclaim_expired(later).await.unwrap().reclaimed, 2);
        assert_eq!(sweeper.reclaim_expired(later).await.unwrap(), SweepReport::default());
    }

    #[tokio::test]
    async fn test_fresh_holds_untouched() {
        let (store, engine, sweeper) = setup(2).await;
        let t0 = Utc::now();
        engine.acquire_seats_at(&[SeatId(1)], &RequesterId::new("old"), t0).await.unwrap();
        engine
            .acquire_seats_at(&[SeatId(2)], &RequesterId::new("new"), t0 + Duration::minutes(4))
            .await
            .unwrap();

        let report = sweeper.reclaim_expired(t0 + Duration::minutes(6)).await.unwrap();
        assert_eq!(report.reclaimed, 1);
        assert_eq!(status_of(&store, 1).await, SeatStatus::Available);
        assert_eq!(status_of(&store, 2).await, SeatStatus::Held);
    }

    #[tokio::test]
    async fn test_reclaimed_seat_can_be_acquired_again() {
        let (_store, engine, sweeper) = setup(1).await;
        let t0 = Utc::now();
        engine.acquire_seats_at(&[SeatId(1)], &RequesterId::new("u1"), t0).await.unwrap();
        sweeper.reclaim_expired(t0 + Duration::minutes(6)).await.unwrap();

        let outcome = engine
            .acquire_seats_at(&[SeatId(1)], &RequesterId::new("u2"), t0 + Duration::minutes(6))
            .await
            .unwrap();
        assert_eq!(outcome.granted_seat_ids(), vec![SeatId(1)]);
    }

    #[tokio::test]
    async fn test_orphan_policy() {
        let (store, _engine, sweeper) = setup(2).await;
        let t0 = Utc::now();
        // Held with no hold record
        store
            .transition_status(SeatId(1), SeatStatus::Available, SeatStatus::Held, t0)
            .await
            .unwrap();
        store
            .transition_status(SeatId(2), SeatStatus::Available, SeatStatus::Held, t0 + Duration::minutes(3))
            .await
            .unwrap();

        let report = sweeper.reclaim_expired(t0 + Duration::minutes(6)).await.unwrap();
        assert_eq!(report.orphans_reverted, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(status_of(&store, 1).await, SeatStatus::Available);
        assert_eq!(status_of(&store, 2).await, SeatStatus::Held);
    }

    #[tokio::test]
    async fn test_stale_hold_record_leaves_orphan_until_lifetime() {
        let (store, engine, sweeper) = setup(1).await;
        let t0 = Utc::now();
        let t1 = t0 + Duration::minutes(2);

        // A hold record left behind on an available seat
        store.create(SeatId(1), &RequesterId::new("ghost"), t0).await.unwrap();
        let outcome = engine.acquire_seats_at(&[SeatId(1)], &RequesterId::new("u1"), t1).await.unwrap();
        assert_eq!(outcome.conflicted, vec![SeatId(1)]);
        assert_eq!(status_of(&store, 1).await, SeatStatus::Held);

        // The stale record expires, but the seat was re-marked at t1
        let report = sweeper.reclaim_expired(t0 + Duration::minutes(6)).await.unwrap();
        assert_eq!(report.reclaimed, 0);
        assert_eq!(report.skipped, 1);
        assert_eq!(store.hold_count().await, 0);
        assert_eq!(status_of(&store, 1).await, SeatStatus::Held);

        let report = sweeper.reclaim_expired(t1 + Duration::minutes(LIFETIME_MINUTES)).await.unwrap();
        assert_eq!(report.orphans_reverted, 1);
        assert_eq!(status_of(&store, 1).await, SeatStatus::Available);
    }

    #[tokio::test]
    async fn test_confirmed_seats_ignored() {
        let (store, _engine, sweeper) = setup(1).await;
        let t0 = Utc::now();
        store
            .transition_status(SeatId(1), SeatStatus::Available, SeatStatus::Confirmed, t0)
            .await
            .unwrap();

        let report = sweeper.reclaim_expired(t0 + Duration::hours(1)).await.unwrap();
        assert_eq!(report, SweepReport::default());
        assert_eq!(status_of(&store, 1).await, SeatStatus::Confirmed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_sweep_vs_acquire_race() {
        for _ in 0..50 {
            let (store, engine, sweeper) = setup(7).await;
            let engine = Arc::new(engine);
            let sweeper = Arc::new(sweeper);
            let t0 = Utc::now() - Duration::minutes(10);
            engine.acquire_seats_at(&[SeatId(7)], &RequesterId::new("old"), t0).await.unwrap();

            let sweep = {
                let sweeper = sweeper.clone();
                tokio::spawn(async move { sweeper.reclaim_expired(Utc::now()).await })
            };
            let acquire = {
                let engine = engine.clone();
                tokio::spawn(async move { engine.acquire_seats(&[SeatId(7)], &RequesterId::new("new")).await })
            };
            let second_sweep = {
                let sweeper = sweeper.clone();
                tokio::spawn(async move { sweeper.reclaim_expired(Utc::now()).await })
            };
            sweep.await.unwrap().unwrap();
            acquire.await.unwrap().unwrap();
            second_sweep.await.unwrap().unwrap();

            let hold = store.find_by_seat_id(SeatId(7)).await.unwrap();
            match status_of(&store, 7).await {
                SeatStatus::Available => assert!(hold.is_none()),
                SeatStatus::Held => {
                    let hold = hold.unwrap();
                    assert_eq!(hold.requester_id, RequesterId::new("new"));
                }
                SeatStatus::Confirmed => unreachable!(),
            }
            assert!(store.hold_count().await <= 1);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_no_seat_held_twice(
            batches in prop::collection::vec(prop::collection::vec(1i64..=12, 1..8), 2..6)
        ) {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(4)
                .enable_all()
                .build()
                .unwrap();

            runtime.block_on(async {
                let (store, engine, _sweeper) = setup(10).await;
                let engine = Arc::new(engine);

                let mut tasks = Vec::new();
                for (i, batch) in batches.into_iter().enumerate() {
                    let engine = engine.clone();
                    let seat_ids: Vec<SeatId> = batch.into_iter().map(SeatId).collect();
                    tasks.push(tokio::spawn(async move {
                        engine.acquire_seats(&seat_ids, &RequesterId::new(format!("r{}", i))).await
                    }));
                }

                let mut granted = HashSet::new();
                for task in tasks {
                    let outcome = task.await.unwrap().unwrap();
                    for id in &outcome.unknown {
                        assert!(id.0 > 10);
                    }
                    for hold in outcome.granted {
                        assert!(granted.insert(hold.seat_id));
                    }
                }

                let held: HashSet<SeatId> = store
                    .fetch_by_status(SeatStatus::Held)
                    .await
                    .unwrap()
                    .into_iter()
                    .map(|s| s.id)
                    .collect();
                assert_eq!(held, granted);
                assert_eq!(store.hold_count().await, granted.len());
            });
        }
    }
}
