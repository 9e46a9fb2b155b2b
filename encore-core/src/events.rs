use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::models::{HoldId, RequesterId, SeatId};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HoldEvent {
    SeatHeld {
        seat_id: SeatId,
        hold_id: HoldId,
        requester_id: RequesterId,
        held_at: DateTime<Utc>,
    },
    SeatReleased {
        seat_id: SeatId,
        hold_id: Option<HoldId>,
        released_at: DateTime<Utc>,
    },
}

impl HoldEvent {
    pub fn seat_id(&self) -> SeatId {
        match self {
            HoldEvent::SeatHeld { seat_id, .. } | HoldEvent::SeatReleased { seat_id, .. } => *seat_id,
        }
    }
}
