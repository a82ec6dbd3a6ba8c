//! Transactional seat storage.
//!
//! The booking engine only talks to [`ResourceStore`] and [`Transaction`];
//! backends translate their own lock-contention signalling into
//! [`LockRead::Contended`].

mod error;
pub mod memory;
pub mod postgres;

pub use error::StoreError;
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::*;

/// How a transaction acquires the row lock on a candidate seat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockStrategy {
    /// `FOR UPDATE`: wait until the holder commits or rolls back.
    Blocking,
    /// `FOR UPDATE NOWAIT`: report contention instead of waiting.
    NonBlocking,
    /// `FOR UPDATE SKIP LOCKED`: pass over rows locked by others.
    /// Only valid with [`Selector::FirstMatching`].
    SkipContended,
}

impl LockStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockStrategy::Blocking => "blocking",
            LockStrategy::NonBlocking => "non_blocking",
            LockStrategy::SkipContended => "skip_contended",
        }
    }
}

impl fmt::Display for LockStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Exact(ResourceId),
    /// First seat of `flight_id` in `status`, in store scan order (`LIMIT 1`).
    FirstMatching { flight_id: String, status: SeatStatus },
}

impl Selector {
    pub fn first_available(flight_id: impl Into<String>) -> Self {
        Selector::FirstMatching {
            flight_id: flight_id.into(),
            status: SeatStatus::Available,
        }
    }
}

/// Result of a locking read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockRead {
    /// Row lock is held by this transaction until commit/rollback.
    Locked(Resource),
    /// Target row is locked by another in-flight transaction (NonBlocking only).
    Contended,
    NotFound,
}

/// One unit of work. `commit` and `rollback` consume the handle, so each
/// transaction is closed exactly once; dropping an open handle discards its
/// writes and releases its locks.
#[async_trait]
pub trait Transaction: Send {
    fn id(&self) -> Ulid;

    /// Rows passed over by `SkipContended` scans so far. Backends that cannot
    /// observe skipping report zero.
    fn skipped(&self) -> u32 {
        0
    }

    async fn lock_and_read(
        &mut self,
        selector: &Selector,
        strategy: LockStrategy,
    ) -> Result<LockRead, StoreError>;

    /// Returns the number of rows written. Visible to others only after commit.
    async fn update(
        &mut self,
        id: ResourceId,
        status: SeatStatus,
        owner: Option<ActorId>,
    ) -> Result<u64, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError>;

    /// Creates `seats` available seats for a flight, labelled by [`seat_label`].
    async fn seed_flight(&self, flight_id: &str, seats: usize) -> Result<Vec<Resource>, StoreError>;

    async fn find_seat(&self, flight_id: &str, seat_number: &str) -> Result<Option<Resource>, StoreError>;

    /// Committed state, without taking row locks.
    async fn fetch(&self, id: ResourceId) -> Result<Option<Resource>, StoreError>;

    /// Committed state of every seat on a flight, in scan order.
    async fn list(&self, flight_id: &str) -> Result<Vec<Resource>, StoreError>;

    /// Puts a seat back to available with no owner.
    async fn reset(&self, id: ResourceId) -> Result<(), StoreError>;

    async fn reset_flight(&self, flight_id: &str) -> Result<u64, StoreError>;

    async fn teardown(&self) -> Result<(), StoreError>;
}
