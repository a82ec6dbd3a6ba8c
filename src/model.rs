use std::fmt;

use serde::{Deserialize, Serialize};

/// Row identity. Assigned by the store at seeding time, never reused within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub i64);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A participant competing for seats. Stateless between attempts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub String);

impl ActorId {
    /// The simulation's naming scheme: `Passenger-{n}`.
    pub fn passenger(n: usize) -> Self {
        Self(format!("Passenger-{n}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeatStatus {
    Available,
    Occupied,
}

impl SeatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatStatus::Available => "available",
            SeatStatus::Occupied => "occupied",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "available" => Some(SeatStatus::Available),
            "occupied" => Some(SeatStatus::Occupied),
            _ => None,
        }
    }
}

impl fmt::Display for SeatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reservable seat. `(flight_id, seat_number)` is unique across the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub flight_id: String,
    pub seat_number: String,
    pub status: SeatStatus,
    /// Set iff `status == Occupied`.
    pub owner: Option<ActorId>,
}

impl Resource {
    pub fn available(id: ResourceId, flight_id: impl Into<String>, seat_number: impl Into<String>) -> Self {
        Self {
            id,
            flight_id: flight_id.into(),
            seat_number: seat_number.into(),
            status: SeatStatus::Available,
            owner: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.status == SeatStatus::Available
    }

    /// Status and owner agree: owner is present iff the seat is occupied.
    pub fn is_consistent(&self) -> bool {
        status_owner_consistent(self.status, self.owner.as_ref())
    }
}

pub fn status_owner_consistent(status: SeatStatus, owner: Option<&ActorId>) -> bool {
    matches!(
        (status, owner),
        (SeatStatus::Available, None) | (SeatStatus::Occupied, Some(_))
    )
}

/// Seat label for the `index`-th seat of a flight: eight seats per row,
/// lettered A through H (`1A`..`1H`, `2A`, ...).
pub fn seat_label(index: usize) -> String {
    let row = index / 8 + 1;
    let letter = (b'A' + (index % 8) as u8) as char;
    format!("{row}{letter}")
}
