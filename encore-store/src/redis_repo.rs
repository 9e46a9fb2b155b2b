use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use encore_core::{
    Hold, HoldError, HoldId, HoldTracker, OptionId, RequesterId, Seat, SeatFilter, SeatId,
    SeatInventory, SeatStatus, StoreError, StoreResult, TransitionOutcome,
};
use redis::AsyncCommands;
use std::collections::HashMap;
use tracing::{error, info};
use uuid::Uuid;

// KEYS: seat hash, source status set, target status set
// ARGV: expected status, new status, changed-at millis, seat id, held-not-after millis ("" = unguarded)
const TRANSITION_SCRIPT: &str = r#"
    local status = redis.call("HGET", KEYS[1], "status")
    if not status then
        return "NOT_FOUND"
    end
    if status ~= ARGV[1] then
        return status
    end
    if ARGV[5] ~= "" then
        local changed = tonumber(redis.call("HGET", KEYS[1], "status_changed_at"))
        if changed > tonumber(ARGV[5]) then
            return status
        end
    end
    redis.call("HSET", KEYS[1], "status", ARGV[2], "status_changed_at", ARGV[3])
    redis.call("SREM", KEYS[2], ARGV[4])
    redis.call("SADD", KEYS[3], ARGV[4])
    return "OK"
"#;

// KEYS: hold-by-seat, hold record, requester index
// ARGV: hold json, hold id
const CREATE_HOLD_SCRIPT: &str = r#"
    if redis.call("EXISTS", KEYS[1]) == 1 then
        return 0
    end
    redis.call("SET", KEYS[1], ARGV[1])
    redis.call("SET", KEYS[2], ARGV[1])
    redis.call("SADD", KEYS[3], ARGV[2])
    return 1
"#;

// KEYS: hold record, hold-by-seat, requester index
// ARGV: hold id
// hold-by-seat is only cleared while it still names this hold.
const DELETE_HOLD_SCRIPT: &str = r#"
    local raw = redis.call("GET", KEYS[1])
    if not raw then
        return 0
    end
    if redis.call("GET", KEYS[2]) == raw then
        redis.call("DEL", KEYS[2])
    end
    redis.call("SREM", KEYS[3], ARGV[1])
    redis.call("DEL", KEYS[1])
    return 1
"#;

fn seat_key(seat_id: SeatId) -> String {
    format!("seat:{}", seat_id)
}

fn status_key(status: SeatStatus) -> String {
    format!("seats:status:{}", status)
}

fn option_key(option_id: OptionId) -> String {
    format!("option:{}:seats", option_id)
}

fn hold_by_seat_key(seat_id: SeatId) -> String {
    format!("hold:seat:{}", seat_id)
}

fn hold_key(hold_id: HoldId) -> String {
    format!("hold:{}", hold_id)
}

fn requester_key(requester_id: &RequesterId) -> String {
    format!("holds:requester:{}", requester_id)
}

const ALL_SEATS_KEY: &str = "seats:all";

fn redis_error(err: redis::RedisError) -> StoreError {
    error!("Redis command failed: {}", err);
    StoreError::backend(err)
}

fn required<'a>(fields: &'a HashMap<String, String>, seat_id: SeatId, name: &str) -> StoreResult<&'a String> {
    fields
        .get(name)
        .ok_or_else(|| StoreError::Corrupt(format!("seat {} missing {}", seat_id, name)))
}

fn decode_seat(seat_id: SeatId, fields: &HashMap<String, String>) -> StoreResult<Seat> {
    let field = |name: &str| required(fields, seat_id, name);
    let option_id = field("option_id")?
        .parse::<i64>()
        .map_err(|e| StoreError::Corrupt(format!("seat {} option_id: {}", seat_id, e)))?;
    let status = field("status")?
        .parse::<SeatStatus>()
        .map_err(|e| StoreError::Corrupt(format!("seat {}: {}", seat_id, e)))?;
    let changed_millis = field("status_changed_at")?
        .parse::<i64>()
        .map_err(|e| StoreError::Corrupt(format!("seat {} status_changed_at: {}", seat_id, e)))?;
    let status_changed_at = Utc
        .timestamp_millis_opt(changed_millis)
        .single()
        .ok_or_else(|| StoreError::Corrupt(format!("seat {} timestamp out of range", seat_id)))?;

    Ok(Seat {
        id: seat_id,
        option_id: OptionId(option_id),
        number: field("number")?.clone(),
        status,
        status_changed_at,
    })
}

fn decode_hold(raw: &str) -> StoreResult<Hold> {
    serde_json::from_str(raw).map_err(|e| StoreError::Corrupt(format!("hold record: {}", e)))
}

/// Redis-backed seat inventory and hold tracker.
///
/// Every mutation is a Lua script, so each compare-and-set runs atomically on the server.
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
}

impl RedisStore {
    /// Opens the client and checks the server answers before returning.
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!("Connected to Redis");
        Ok(Self { client })
    }

    async fn connection(&self) -> StoreResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    /// Catalog provisioning. Replaces any seat with the same id.
    pub async fn provision_seat(&self, seat: &Seat) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        let id = seat.id.0;

        let _: () = redis::pipe()
            .atomic()
            .hset_multiple(
                seat_key(seat.id),
                &[
                    ("option_id", seat.option_id.0.to_string()),
                    ("number", seat.number.clone()),
                    ("status", seat.status.to_string()),
                    ("status_changed_at", seat.status_changed_at.timestamp_millis().to_string()),
                ],
            )
            .srem(status_key(SeatStatus::Available), id)
            .srem(status_key(SeatStatus::Held), id)
            .srem(status_key(SeatStatus::Confirmed), id)
            .sadd(status_key(seat.status), id)
            .zadd(ALL_SEATS_KEY, id, id)
            .zadd(option_key(seat.option_id), id, id)
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;

        info!("Provisioned seat {} ({})", seat.id, seat.number);
        Ok(())
    }

    async fn load_seats(&self, ids: &[i64]) -> StoreResult<Vec<Seat>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connection().await?;

        let mut pipe = redis::pipe();
        for id in ids {
            pipe.hgetall(seat_key(SeatId(*id)));
        }
        let rows: Vec<HashMap<String, String>> = pipe.query_async(&mut conn).await.map_err(redis_error)?;

        let mut seats = Vec::with_capacity(rows.len());
        for (id, fields) in ids.iter().zip(rows.iter()) {
            // HGETALL on a missing key yields an empty map
            if fields.is_empty() {
                continue;
            }
            seats.push(decode_seat(SeatId(*id), fields)?);
        }
        seats.sort_by_key(|s| s.id);
        Ok(seats)
    }

    async fn run_transition(
        &self,
        seat_id: SeatId,
        expected: SeatStatus,
        new: SeatStatus,
        at: DateTime<Utc>,
        held_not_after: Option<DateTime<Utc>>,
    ) -> StoreResult<TransitionOutcome> {
        let mut conn = self.connection().await?;
        let guard = held_not_after
            .map(|t| t.timestamp_millis().to_string())
            .unwrap_or_default();

        let script = redis::Script::new(TRANSITION_SCRIPT);
        let reply: String = script
            .key(seat_key(seat_id))
            .key(status_key(expected))
            .key(status_key(new))
            .arg(expected.as_str())
            .arg(new.as_str())
            .arg(at.timestamp_millis())
            .arg(seat_id.0)
            .arg(guard)
            .invoke_async(&mut conn)
            .await
            .map_err(redis_error)?;

        match reply.as_str() {
            "OK" => Ok(TransitionOutcome::Applied),
            "NOT_FOUND" => Ok(TransitionOutcome::NotFound),
            other => {
                let actual = other
                    .parse::<SeatStatus>()
                    .map_err(|e| StoreError::Corrupt(format!("seat {}: {}", seat_id, e)))?;
                Ok(TransitionOutcome::Conflict { actual })
            }
        }
    }
}

#[async_trait]
impl SeatInventory for RedisStore {
    async fn list_seats(&self, filter: &SeatFilter) -> StoreResult<Vec<Seat>> {
        let mut conn = self.connection().await?;
        let key = match filter.option_id {
            Some(option_id) => option_key(option_id),
            None => ALL_SEATS_KEY.to_string(),
        };
        let ids: Vec<i64> = conn.zrange(key, 0, -1).await.map_err(redis_error)?;
        self.load_seats(&ids).await
    }

    async fn fetch_by_ids(&self, ids: &[SeatId]) -> StoreResult<Vec<Seat>> {
        let ids: Vec<i64> = ids.iter().map(|id| id.0).collect();
        self.load_seats(&ids).await
    }

    async fn fetch_by_status(&self, status: SeatStatus) -> StoreResult<Vec<Seat>> {
        let mut conn = self.connection().await?;
        let ids: Vec<i64> = conn.smembers(status_key(status)).await.map_err(redis_error)?;
        let seats = self.load_seats(&ids).await?;
        // Index and hash are updated together, but a read may interleave with a transition
        Ok(seats.into_iter().filter(|s| s.status == status).collect())
    }

    async fn transition_status(
        &self,
        seat_id: SeatId,
        expected: SeatStatus,
        new: SeatStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<TransitionOutcome> {
        self.run_transition(seat_id, expected, new, at, None).await
    }

    async fn release_stale(
        &self,
        seat_id: SeatId,
        held_not_after: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> StoreResult<TransitionOutcome> {
        self.run_transition(seat_id, SeatStatus::Held, SeatStatus::Available, at, Some(held_not_after))
            .await
    }
}

#[async_trait]
impl HoldTracker for RedisStore {
    async fn create(
        &self,
        seat_id: SeatId,
        requester_id: &RequesterId,
        at: DateTime<Utc>,
    ) -> Result<Hold, HoldError> {
        let hold = Hold::new(seat_id, requester_id.clone(), at);
        let payload = serde_json::to_string(&hold)
            .map_err(|e| StoreError::Corrupt(format!("hold record: {}", e)))?;
        let mut conn = self.connection().await?;

        let script = redis::Script::new(CREATE_HOLD_SCRIPT);
        let created: i64 = script
            .key(hold_by_seat_key(seat_id))
            .key(hold_key(hold.id))
            .key(requester_key(requester_id))
            .arg(payload)
            .arg(hold.id.to_string())
            .invoke_async(&mut conn)
            .await
            .map_err(redis_error)?;

        if created == 1 {
            Ok(hold)
        } else {
            Err(HoldError::DuplicateHold { seat_id })
        }
    }

    async fn find_by_seat_id(&self, seat_id: SeatId) -> StoreResult<Option<Hold>> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn.get(hold_by_seat_key(seat_id)).await.map_err(redis_error)?;
        raw.as_deref().map(decode_hold).transpose()
    }

    async fn find_by_requester(&self, requester_id: &RequesterId) -> StoreResult<Vec<Hold>> {
        let mut conn = self.connection().await?;
        let hold_ids: Vec<String> = conn.smembers(requester_key(requester_id)).await.map_err(redis_error)?;

        let mut holds = Vec::new();
        for raw_id in hold_ids {
            let hold_id = Uuid::parse_str(&raw_id)
                .map_err(|e| StoreError::Corrupt(format!("hold id {}: {}", raw_id, e)))?;
            let raw: Option<String> = conn.get(hold_key(HoldId(hold_id))).await.map_err(redis_error)?;
            if let Some(raw) = raw {
                let hold = decode_hold(&raw)?;
                if &hold.requester_id == requester_id {
                    holds.push(hold);
                }
            }
        }
        holds.sort_by_key(|h| h.seat_id);
        Ok(holds)
    }

    async fn delete(&self, hold_id: HoldId) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn.get(hold_key(hold_id)).await.map_err(redis_error)?;
        // Already gone
        let Some(raw) = raw else { return Ok(()) };
        let hold = decode_hold(&raw)?;

        let script = redis::Script::new(DELETE_HOLD_SCRIPT);
        let _: i64 = script
            .key(hold_key(hold_id))
            .key(hold_by_seat_key(hold.seat_id))
            .key(requester_key(&hold.requester_id))
            .arg(hold_id.to_string())
            .invoke_async(&mut conn)
            .await
            .map_err(redis_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(seat_key(SeatId(7)), "seat:7");
        assert_eq!(status_key(SeatStatus::Held), "seats:status:HELD");
        assert_eq!(option_key(OptionId(3)), "option:3:seats");
        assert_eq!(hold_by_seat_key(SeatId(7)), "hold:seat:7");
        let hold_id = HoldId(Uuid::nil());
        assert_eq!(hold_key(hold_id), "hold:00000000-0000-0000-0000-000000000000");
        assert_eq!(requester_key(&RequesterId::new("u1")), "holds:requester:u1");
    }

    #[test]
    fn test_decode_seat() {
        let mut fields = HashMap::new();
        fields.insert("option_id".to_string(), "2".to_string());
        fields.insert("number".to_string(), "A7".to_string());
        fields.insert("status".to_string(), "HELD".to_string());
        fields.insert("status_changed_at".to_string(), "1700000000000".to_string());

        let seat = decode_seat(SeatId(7), &fields).unwrap();
        assert_eq!(seat.option_id, OptionId(2));
        assert_eq!(seat.status, SeatStatus::Held);
        assert_eq!(seat.status_changed_at.timestamp_millis(), 1_700_000_000_000);

        fields.remove("status");
        assert!(matches!(decode_seat(SeatId(7), &fields), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_hold_record_round_trips() {
        // Both hold keys store this JSON; the delete script compares them byte for byte
        let hold = Hold::new(SeatId(1), RequesterId::new("u1"), Utc::now());
        let raw = serde_json::to_string(&hold).unwrap();
        assert_eq!(serde_json::to_string(&decode_hold(&raw).unwrap()).unwrap(), raw);
        assert!(matches!(decode_hold("{}"), Err(StoreError::Corrupt(_))));
    }

    // These need a scratch server:
    // REDIS_URL=redis://127.0.0.1/ cargo test -p encore-store -- --ignored
    async fn connect() -> Option<RedisStore> {
        let url = std::env::var("REDIS_URL").ok()?;
        Some(RedisStore::new(&url).await.unwrap())
    }

    /// Provisions `count` available seats under ids unique to this run.
    async fn provision(store: &RedisStore, count: i64) -> Vec<SeatId> {
        let base = (Uuid::new_v4().as_u128() % 1_000_000_000_000) as i64 * 100;
        let mut seats = Vec::new();
        for i in 1..=count {
            let seat = Seat::new(SeatId(base + i), OptionId(base), format!("A{}", i));
            store.provision_seat(&seat).await.unwrap();
            seats.push(seat.id);
        }
        seats
    }

    #[tokio::test]
    #[ignore]
    async fn test_conditional_transition() {
        let Some(store) = connect().await else { return };
        let seat = provision(&store, 1).await[0];
        let t0 = Utc::now();

        let applied = store.transition_status(seat, SeatStatus::Available, SeatStatus::Held, t0).await.unwrap();
        assert_eq!(applied, TransitionOutcome::Applied);

        let conflict = store.transition_status(seat, SeatStatus::Available, SeatStatus::Held, t0).await.unwrap();
        assert_eq!(conflict, TransitionOutcome::Conflict { actual: SeatStatus::Held });

        let missing = store
            .transition_status(SeatId(seat.0 + 99), SeatStatus::Available, SeatStatus::Held, t0)
            .await
            .unwrap();
        assert_eq!(missing, TransitionOutcome::NotFound);

        let held: Vec<SeatId> = store.fetch_by_status(SeatStatus::Held).await.unwrap().iter().map(|s| s.id).collect();
        assert!(held.contains(&seat));

        let early = store.release_stale(seat, t0 - chrono::Duration::seconds(1), t0).await.unwrap();
        assert_eq!(early, TransitionOutcome::Conflict { actual: SeatStatus::Held });

        let late = store.release_stale(seat, t0, t0).await.unwrap();
        assert_eq!(late, TransitionOutcome::Applied);

        let again = store.release_stale(seat, t0, t0).await.unwrap();
        assert_eq!(again, TransitionOutcome::Conflict { actual: SeatStatus::Available });
    }

    #[tokio::test]
    #[ignore]
    async fn test_hold_lifecycle() {
        let Some(store) = connect().await else { return };
        let seats = provision(&store, 2).await;
        let requester = RequesterId::new(format!("redis-{}", Uuid::new_v4()));
        let now = Utc::now();

        let hold = store.create(seats[0], &requester, now).await.unwrap();
        assert!(matches!(
            store.create(seats[0], &RequesterId::new("other"), now).await,
            Err(HoldError::DuplicateHold { seat_id }) if seat_id == seats[0]
        ));
        store.create(seats[1], &requester, now).await.unwrap();

        let found = store.find_by_seat_id(seats[0]).await.unwrap().unwrap();
        assert_eq!(found, hold);

        let mine: Vec<SeatId> = store.find_by_requester(&requester).await.unwrap().iter().map(|h| h.seat_id).collect();
        assert_eq!(mine, seats);

        store.delete(hold.id).await.unwrap();
        store.delete(hold.id).await.unwrap();
        assert!(store.find_by_seat_id(seats[0]).await.unwrap().is_none());
        assert_eq!(store.find_by_requester(&requester).await.unwrap().len(), 1);

        // The seat is free for a new hold once the old one is gone
        store.create(seats[0], &requester, now).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore]
    async fn test_transition_race_has_one_winner() {
        let Some(store) = connect().await else { return };
        let seat = provision(&store, 1).await[0];

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.transition_status(seat, SeatStatus::Available, SeatStatus::Held, Utc::now()).await
            }));
        }

        let mut applied = 0;
        for task in tasks {
            if task.await.unwrap().unwrap().is_applied() {
                applied += 1;
            }
        }
        assert_eq!(applied, 1);
    }
}
