//! The reserve-attempt protocol.
//!
//! Every attempt is one transaction: begin, lock and read, decide, write,
//! commit. All coordination between concurrent attempts happens through the
//! store's row locks; the engine itself keeps no shared mutable state.

mod error;
mod outcome;

pub use error::BookingError;
pub use outcome::{AttemptMode, AttemptState, Outcome, OutcomeRecord, Tally};

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::observability;
use crate::store::{LockRead, LockStrategy, ResourceStore, Selector, Transaction};

/// How the any-available path reports a skip-scan that found nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SkipExhaustion {
    /// Always `NotFound`.
    #[default]
    NotFound,
    /// `ContendedSkipped` when at least one locked seat was passed over.
    Contended,
}

#[derive(Clone)]
pub struct BookingEngine {
    store: Arc<dyn ResourceStore>,
    decision_latency: Duration,
    skip_exhaustion: SkipExhaustion,
}

impl BookingEngine {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self {
            store,
            decision_latency: Duration::ZERO,
            skip_exhaustion: SkipExhaustion::default(),
        }
    }

    /// Pause between observing a seat and acting on it. Widens the race
    /// window so lock discipline is visible under load.
    pub fn with_decision_latency(mut self, latency: Duration) -> Self {
        self.decision_latency = latency;
        self
    }

    pub fn with_skip_exhaustion(mut self, mode: SkipExhaustion) -> Self {
        self.skip_exhaustion = mode;
        self
    }

    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        &self.store
    }

    /// Try to book one specific seat.
    ///
    /// Returns `Err` only for a rejected strategy; every attempt that starts
    /// ends in exactly one [`OutcomeRecord`].
    pub async fn attempt_exact_booking(
        &self,
        actor: &ActorId,
        resource_id: ResourceId,
        strategy: LockStrategy,
    ) -> Result<OutcomeRecord, BookingError> {
        if strategy == LockStrategy::SkipContended {
            return Err(BookingError::SkipContendedOnExactTarget(resource_id));
        }
        let mut attempt = Attempt::new(actor, AttemptMode::Exact(strategy), Some(resource_id));

        let mut tx = match self.store.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                error!("[{actor}] failed to start transaction: {e}");
                return Ok(attempt.finish(AttemptState::Failed, Outcome::TransactionError(e.to_string())));
            }
        };
        attempt.tx_id = Some(tx.id());

        let seat = match tx.lock_and_read(&Selector::Exact(resource_id), strategy).await {
            Ok(LockRead::Locked(seat)) => seat,
            Ok(LockRead::Contended) => {
                info!("[{actor}] seat {resource_id} is locked by another user, not waiting");
                rollback(tx, actor).await;
                let msg = format!("seat {resource_id} is locked by another transaction");
                return Ok(attempt.finish(AttemptState::Contended, Outcome::ContendedFailed(msg)));
            }
            Ok(LockRead::NotFound) => {
                info!("[{actor}] seat {resource_id} does not exist");
                rollback(tx, actor).await;
                return Ok(attempt.finish(AttemptState::NotFound, Outcome::NotFound));
            }
            Err(e) => {
                error!("[{actor}] failed to query seat status: {e}");
                rollback(tx, actor).await;
                return Ok(attempt.finish(AttemptState::Failed, Outcome::TransactionError(e.to_string())));
            }
        };
        attempt.advance(AttemptState::Locked);
        info!("[{actor}] sees seat {resource_id} is '{}'", seat.status);

        if !self.decision_latency.is_zero() {
            tokio::time::sleep(self.decision_latency).await;
        }
        attempt.advance(AttemptState::Decided);

        let outcome = if seat.is_available() {
            info!("[{actor}] seat is available, attempting to book");
            if let Err(failure) = occupy(tx.as_mut(), &seat, actor).await {
                error!("[{actor}] failed to update seat: {failure}");
                rollback(tx, actor).await;
                return Ok(attempt.finish(AttemptState::Failed, Outcome::TransactionError(failure)));
            }
            Outcome::Booked(resource_id)
        } else {
            info!(
                "[{actor}] failed to book seat {resource_id}, it was already '{}'",
                seat.status
            );
            Outcome::AlreadyTaken
        };

        if let Err(e) = tx.commit().await {
            error!("[{actor}] failed to commit transaction: {e}");
            return Ok(attempt.finish(AttemptState::Failed, Outcome::TransactionError(e.to_string())));
        }

        let record = match &outcome {
            Outcome::Booked(_) => {
                info!("[{actor}] successfully booked seat {resource_id}");
                attempt
                    .finish(AttemptState::Committed, outcome)
                    .with_message(format!("seat {}", seat.seat_number))
            }
            _ => {
                let holder = seat.owner.as_ref().map_or("unknown", |o| o.as_str()).to_string();
                attempt
                    .finish(AttemptState::Committed, outcome)
                    .with_message(format!("held by {holder}"))
            }
        };
        Ok(record)
    }

    /// Book whichever available seat on the flight is not currently locked.
    ///
    /// The skip-locked scan returns a row that is already locked and matched
    /// the availability predicate, so there is no separate decide step.
    pub async fn attempt_any_booking(&self, actor: &ActorId, flight_id: &str) -> OutcomeRecord {
        let mut attempt = Attempt::new(actor, AttemptMode::AnyAvailable, None);

        let mut tx = match self.store.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                error!("[{actor}] failed to start transaction: {e}");
                return attempt.finish(AttemptState::Failed, Outcome::TransactionError(e.to_string()));
            }
        };
        attempt.tx_id = Some(tx.id());

        let selector = Selector::first_available(flight_id);
        let seat = match tx.lock_and_read(&selector, LockStrategy::SkipContended).await {
            Ok(LockRead::Locked(seat)) => seat,
            Ok(LockRead::NotFound | LockRead::Contended) => {
                let skipped = tx.skipped();
                rollback(tx, actor).await;
                info!("[{actor}] no available seats found");
                let record = match self.skip_exhaustion {
                    SkipExhaustion::Contended if skipped > 0 => attempt.finish(
                        AttemptState::Contended,
                        Outcome::ContendedSkipped { skipped },
                    ),
                    _ => attempt.finish(AttemptState::NotFound, Outcome::NotFound),
                };
                return record.with_message(format!("{skipped} locked seats skipped"));
            }
            Err(e) => {
                error!("[{actor}] error finding a seat: {e}");
                rollback(tx, actor).await;
                return attempt.finish(AttemptState::Failed, Outcome::TransactionError(e.to_string()));
            }
        };
        attempt.resource_id = Some(seat.id);
        attempt.advance(AttemptState::Locked);
        info!(
            "[{actor}] found and locked available seat {} (id {}), booking now",
            seat.seat_number, seat.id
        );

        if let Err(failure) = occupy(tx.as_mut(), &seat, actor).await {
            error!("[{actor}] failed to update seat: {failure}");
            rollback(tx, actor).await;
            return attempt.finish(AttemptState::Failed, Outcome::TransactionError(failure));
        }

        if let Err(e) = tx.commit().await {
            error!("[{actor}] failed to commit transaction: {e}");
            return attempt.finish(AttemptState::Failed, Outcome::TransactionError(e.to_string()));
        }
        info!("[{actor}] successfully booked seat {}", seat.seat_number);
        attempt
            .finish(AttemptState::Committed, Outcome::Booked(seat.id))
            .with_message(format!("seat {}", seat.seat_number))
    }
}

/// Mark a locked seat occupied by `actor`. Anything but exactly one row
/// written is a failure of the attempt.
async fn occupy(tx: &mut dyn Transaction, seat: &Resource, actor: &ActorId) -> Result<(), String> {
    match tx
        .update(seat.id, SeatStatus::Occupied, Some(actor.clone()))
        .await
    {
        Ok(1) => Ok(()),
        Ok(n) => Err(format!("update of seat {} touched {n} rows", seat.id)),
        Err(e) => Err(e.to_string()),
    }
}

async fn rollback(tx: Box<dyn Transaction>, actor: &ActorId) {
    let id = tx.id();
    if let Err(e) = tx.rollback().await {
        warn!("[{actor}] rollback of tx {id} failed: {e}");
    }
}

/// Bookkeeping for one attempt in flight.
struct Attempt<'a> {
    actor: &'a ActorId,
    mode: AttemptMode,
    state: AttemptState,
    resource_id: Option<ResourceId>,
    tx_id: Option<Ulid>,
    started: Instant,
}

impl<'a> Attempt<'a> {
    fn new(actor: &'a ActorId, mode: AttemptMode, resource_id: Option<ResourceId>) -> Self {
        Self {
            actor,
            mode,
            state: AttemptState::Started,
            resource_id,
            tx_id: None,
            started: Instant::now(),
        }
    }

    fn advance(&mut self, next: AttemptState) {
        debug!("[{}] {} -> {}", self.actor, self.state, next);
        self.state = next;
    }

    fn finish(mut self, terminal: AttemptState, outcome: Outcome) -> OutcomeRecord {
        debug_assert!(terminal.is_terminal(), "attempt finished in {terminal}");
        self.advance(terminal);
        let elapsed = self.started.elapsed();
        metrics::counter!(
            observability::ATTEMPTS_TOTAL,
            "outcome" => observability::outcome_label(&outcome),
            "mode" => self.mode.label()
        )
        .increment(1);
        metrics::histogram!(observability::ATTEMPT_DURATION_SECONDS, "mode" => self.mode.label())
            .record(elapsed.as_secs_f64());
        OutcomeRecord {
            actor: self.actor.clone(),
            mode: self.mode,
            resource_id: self.resource_id,
            outcome,
            state: self.state,
            message: None,
            tx_id: self.tx_id,
            elapsed_ms: elapsed.as_secs_f64() * 1000.0,
        }
    }
}
