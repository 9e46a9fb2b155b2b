use async_trait::async_trait;
use chrono::{DateTime, Utc};
use encore_core::{
    Hold, HoldError, HoldId, HoldTracker, OptionId, OptionListing, PriceCatalog, RequesterId, Seat, SeatFilter,
    SeatId, SeatInventory, SeatStatus, StoreError, StoreResult, TransitionOutcome,
};
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

/// Postgres-backed seat inventory and hold tracker.
///
/// Conditional transitions are single `UPDATE ... WHERE status = $expected`
/// statements, so Postgres row locking decides the winner.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// Internal structs for type-safe querying
#[derive(sqlx::FromRow)]
struct SeatRow {
    id: i64,
    option_id: i64,
    number: String,
    status: String,
    status_changed_at: DateTime<Utc>,
}

impl TryFrom<SeatRow> for Seat {
    type Error = StoreError;

    fn try_from(row: SeatRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<SeatStatus>()
            .map_err(|e| StoreError::Corrupt(format!("seat {}: {}", row.id, e)))?;
        Ok(Seat {
            id: SeatId(row.id),
            option_id: OptionId(row.option_id),
            number: row.number,
            status,
            status_changed_at: row.status_changed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct HoldRow {
    id: Uuid,
    seat_id: i64,
    requester_id: String,
    created_at: DateTime<Utc>,
}

impl From<HoldRow> for Hold {
    fn from(row: HoldRow) -> Self {
        Hold {
            id: HoldId(row.id),
            seat_id: SeatId(row.seat_id),
            requester_id: RequesterId(row.requester_id),
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct OptionRow {
    id: i64,
    title: String,
    price: i64,
    reserve_from: Option<DateTime<Utc>>,
    reserve_until: Option<DateTime<Utc>>,
}

impl From<OptionRow> for OptionListing {
    fn from(row: OptionRow) -> Self {
        OptionListing {
            id: OptionId(row.id),
            title: row.title,
            price: row.price,
            reserve_from: row.reserve_from,
            reserve_until: row.reserve_until,
        }
    }
}

fn db_error(err: sqlx::Error) -> StoreError {
    error!("Postgres query failed: {}", err);
    StoreError::backend(err)
}

fn into_seats(rows: Vec<SeatRow>) -> StoreResult<Vec<Seat>> {
    rows.into_iter().map(Seat::try_from).collect()
}

impl PgStore {
    async fn current_status(&self, seat_id: SeatId) -> StoreResult<TransitionOutcome> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM seats WHERE id = $1")
            .bind(seat_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        match status {
            None => Ok(TransitionOutcome::NotFound),
            Some(s) => {
                let actual = s
                    .parse::<SeatStatus>()
                    .map_err(|e| StoreError::Corrupt(format!("seat {}: {}", seat_id, e)))?;
                Ok(TransitionOutcome::Conflict { actual })
            }
        }
    }
}

#[async_trait]
impl SeatInventory for PgStore {
    async fn list_seats(&self, filter: &SeatFilter) -> StoreResult<Vec<Seat>> {
        let rows = sqlx::query_as::<_, SeatRow>(
            r#"
            SELECT id, option_id, number, status, status_changed_at
            FROM seats
            WHERE ($1::BIGINT IS NULL OR option_id = $1)
            ORDER BY id
            "#,
        )
        .bind(filter.option_id.map(|o| o.0))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        into_seats(rows)
    }

    async fn fetch_by_ids(&self, ids: &[SeatId]) -> StoreResult<Vec<Seat>> {
        let ids: Vec<i64> = ids.iter().map(|id| id.0).collect();
        let rows = sqlx::query_as::<_, SeatRow>(
            r#"
            SELECT id, option_id, number, status, status_changed_at
            FROM seats
            WHERE id = ANY($1)
            ORDER BY id
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        into_seats(rows)
    }

    async fn fetch_by_status(&self, status: SeatStatus) -> StoreResult<Vec<Seat>> {
        let rows = sqlx::query_as::<_, SeatRow>(
            r#"
            SELECT id, option_id, number, status, status_changed_at
            FROM seats
            WHERE status = $1
            ORDER BY id
            "#,
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        into_seats(rows)
    }

    async fn transition_status(
        &self,
        seat_id: SeatId,
        expected: SeatStatus,
        new: SeatStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<TransitionOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE seats
            SET status = $1, status_changed_at = $2
            WHERE id = $3 AND status = $4
            "#,
        )
        .bind(new.as_str())
        .bind(at)
        .bind(seat_id.0)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 1 {
            return Ok(TransitionOutcome::Applied);
        }
        self.current_status(seat_id).await
    }

    async fn release_stale(
        &self,
        seat_id: SeatId,
        held_not_after: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> StoreResult<TransitionOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE seats
            SET status = 'AVAILABLE', status_changed_at = $1
            WHERE id = $2 AND status = 'HELD' AND status_changed_at <= $3
            "#,
        )
        .bind(at)
        .bind(seat_id.0)
        .bind(held_not_after)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 1 {
            return Ok(TransitionOutcome::Applied);
        }
        self.current_status(seat_id).await
    }
}

#[async_trait]
impl HoldTracker for PgStore {
    async fn create(
        &self,
        seat_id: SeatId,
        requester_id: &RequesterId,
        at: DateTime<Utc>,
    ) -> Result<Hold, HoldError> {
        let hold = Hold::new(seat_id, requester_id.clone(), at);

        let inserted = sqlx::query(
            r#"
            INSERT INTO holds (id, seat_id, requester_id, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(hold.id.0)
        .bind(seat_id.0)
        .bind(requester_id.as_str())
        .bind(at)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(hold),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(HoldError::DuplicateHold { seat_id })
            }
            Err(e) => Err(db_error(e).into()),
        }
    }

    async fn find_by_seat_id(&self, seat_id: SeatId) -> StoreResult<Option<Hold>> {
        let row = sqlx::query_as::<_, HoldRow>(
            "SELECT id, seat_id, requester_id, created_at FROM holds WHERE seat_id = $1",
        )
        .bind(seat_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.map(Hold::from))
    }

    async fn find_by_requester(&self, requester_id: &RequesterId) -> StoreResult<Vec<Hold>> {
        let rows = sqlx::query_as::<_, HoldRow>(
            r#"
            SELECT id, seat_id, requester_id, created_at
            FROM holds
            WHERE requester_id = $1
            ORDER BY seat_id
            "#,
        )
        .bind(requester_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(rows.into_iter().map(Hold::from).collect())
    }

    async fn delete(&self, hold_id: HoldId) -> StoreResult<()> {
        sqlx::query("DELETE FROM holds WHERE id = $1")
            .bind(hold_id.0)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }
}

/// Reads option prices from the `options` table
pub struct PgPriceCatalog {
    pool: PgPool,
}

impl PgPriceCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PriceCatalog for PgPriceCatalog {
    async fn price_for(&self, option_id: OptionId) -> StoreResult<Option<i64>> {
        sqlx::query_scalar("SELECT price FROM options WHERE id = $1")
            .bind(option_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)
    }

    async fn list_open_options(&self, at: DateTime<Utc>) -> StoreResult<Vec<OptionListing>> {
        let rows = sqlx::query_as::<_, OptionRow>(
            r#"
            SELECT id, title, price, reserve_from, reserve_until
            FROM options
            WHERE (reserve_from IS NULL OR reserve_from <= $1)
              AND (reserve_until IS NULL OR reserve_until >= $1)
            ORDER BY id
            "#,
        )
        .bind(at)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(rows.into_iter().map(OptionListing::from).collect())
    }
}
