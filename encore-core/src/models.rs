use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Seat identifier. Ordering defines the processing order of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeatId(pub i64);

/// Scheduled performance a seat belongs to; doubles as the price lookup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OptionId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HoldId(pub Uuid);

impl HoldId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for HoldId {
    fn default() -> Self {
        Self::new()
    }
}

/// Opaque identity of whoever is holding seats (user id, session id, ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequesterId(pub String);

impl RequesterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SeatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for OptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for HoldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RequesterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Seat status in the hold lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatStatus {
    Available,
    Held,
    /// Owned by the confirmation workflow. Never written here.
    Confirmed,
}

impl SeatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatStatus::Available => "AVAILABLE",
            SeatStatus::Held => "HELD",
            SeatStatus::Confirmed => "CONFIRMED",
        }
    }
}

impl fmt::Display for SeatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SeatStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "AVAILABLE" => Ok(SeatStatus::Available),
            "HELD" => Ok(SeatStatus::Held),
            "CONFIRMED" => Ok(SeatStatus::Confirmed),
            other => Err(format!("unknown seat status: {}", other)),
        }
    }
}

/// A uniquely identified seat of one performance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Seat {
    pub id: SeatId,
    pub option_id: OptionId,
    pub number: String,
    pub status: SeatStatus,
    pub status_changed_at: DateTime<Utc>,
}

impl Seat {
    pub fn new(id: SeatId, option_id: OptionId, number: impl Into<String>) -> Self {
        Self {
            id,
            option_id,
            number: number.into(),
            status: SeatStatus::Available,
            status_changed_at: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: SeatStatus, at: DateTime<Utc>) -> Self {
        self.status = status;
        self.status_changed_at = at;
        self
    }
}

/// Time-bounded exclusive claim on a seat, pending confirmation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Hold {
    pub id: HoldId,
    pub seat_id: SeatId,
    pub requester_id: RequesterId,
    pub created_at: DateTime<Utc>,
}

impl Hold {
    pub fn new(seat_id: SeatId, requester_id: RequesterId, created_at: DateTime<Utc>) -> Self {
        Self {
            id: HoldId::new(),
            seat_id,
            requester_id,
            created_at,
        }
    }

    pub fn expires_at(&self, lifetime: Duration) -> DateTime<Utc> {
        self.created_at + lifetime
    }

    /// Strictly older than `lifetime` at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>, lifetime: Duration) -> bool {
        now - self.created_at > lifetime
    }
}

/// A bookable performance as listed by the catalog.
///
/// A missing bound leaves that side of the reservation window open.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OptionListing {
    pub id: OptionId,
    pub title: String,
    pub price: i64,
    pub reserve_from: Option<DateTime<Utc>>,
    pub reserve_until: Option<DateTime<Utc>>,
}

impl OptionListing {
    /// Both bounds are inclusive.
    pub fn is_open_at(&self, at: DateTime<Utc>) -> bool {
        self.reserve_from.map_or(true, |from| from <= at)
            && self.reserve_until.map_or(true, |until| at <= until)
    }
}

/// Read filter for the seat map
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeatFilter {
    pub option_id: Option<OptionId>,
}

impl SeatFilter {
    pub fn for_option(option_id: OptionId) -> Self {
        Self { option_id: Some(option_id) }
    }

    pub fn matches(&self, seat: &Seat) -> bool {
        self.option_id.map_or(true, |id| seat.option_id == id)
    }
}

/// Result of a conditional status transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    Conflict { actual: SeatStatus },
    NotFound,
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied)
    }
}

/// Per-seat result of a batch acquisition
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AcquireOutcome {
    pub granted: Vec<Hold>,
    pub conflicted: Vec<SeatId>,
    pub unknown: Vec<SeatId>,
}

impl AcquireOutcome {
    pub fn granted_seat_ids(&self) -> Vec<SeatId> {
        self.granted.iter().map(|h| h.seat_id).collect()
    }

    /// Every requested seat that did not end up held by the caller.
    pub fn not_acquired(&self) -> Vec<SeatId> {
        let mut ids: Vec<SeatId> = self.conflicted.iter().chain(self.unknown.iter()).copied().collect();
        ids.sort();
        ids
    }
}

/// Hold projection for a requester, keyed for price lookup by `option_id`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeldSeat {
    pub hold_id: HoldId,
    pub seat_id: SeatId,
    pub option_id: OptionId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeatPrice {
    pub seat_id: SeatId,
    pub price: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriceSummary {
    pub requester_id: RequesterId,
    pub seats: Vec<SeatPrice>,
    pub total: i64,
}

impl PriceSummary {
    pub fn new(requester_id: RequesterId, seats: Vec<SeatPrice>) -> Self {
        let total = seats.iter().map(|s| s.price).sum();
        Self { requester_id, seats, total }
    }
}

/// Outcome of one expiry sweep
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired holds whose seat went back to `Available`.
    pub reclaimed: usize,
    /// Held seats without a hold record that were reverted.
    pub orphans_reverted: usize,
    /// Held seats left untouched because a transition lost a race or an orphan was too young.
    pub skipped: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hold_expiry_is_strict() {
        let t0 = Utc::now();
        let hold = Hold::new(SeatId(1), RequesterId::new("u1"), t0);
        let lifetime = Duration::minutes(5);

        assert!(!hold.is_expired(t0 + lifetime - Duration::seconds(1), lifetime));
        assert!(!hold.is_expired(t0 + lifetime, lifetime));
        assert!(hold.is_expired(t0 + lifetime + Duration::seconds(1), lifetime));
    }

    #[test]
    fn test_option_window_is_inclusive() {
        let from = Utc::now();
        let until = from + Duration::days(1);
        let listing = OptionListing {
            id: OptionId(1),
            title: "Opening night".to_string(),
            price: 50_000,
            reserve_from: Some(from),
            reserve_until: Some(until),
        };

        assert!(listing.is_open_at(from));
        assert!(listing.is_open_at(until));
        assert!(!listing.is_open_at(from - Duration::seconds(1)));
        assert!(!listing.is_open_at(until + Duration::seconds(1)));

        let unbounded = OptionListing { reserve_from: None, reserve_until: None, ..listing };
        assert!(unbounded.is_open_at(from - Duration::days(365)));
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("held".parse::<SeatStatus>().unwrap(), SeatStatus::Held);
        assert_eq!("AVAILABLE".parse::<SeatStatus>().unwrap(), SeatStatus::Available);
        assert!("sold".parse::<SeatStatus>().is_err());
    }

    #[test]
    fn test_status_serializes_screaming() {
        let json = serde_json::to_string(&SeatStatus::Available).unwrap();
        assert_eq!(json, "\"AVAILABLE\"");
    }

    #[test]
    fn test_not_acquired_merges_buckets() {
        let outcome = AcquireOutcome {
            granted: vec![],
            conflicted: vec![SeatId(7), SeatId(2)],
            unknown: vec![SeatId(5)],
        };
        assert_eq!(outcome.not_acquired(), vec![SeatId(2), SeatId(5), SeatId(7)]);
    }
}
