use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::{ActorId, ResourceId};
use crate::store::LockStrategy;

/// Terminal classification of one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Outcome {
    Booked(ResourceId),
    /// Skip-scan found nothing lockable but passed over `skipped` locked seats.
    ContendedSkipped { skipped: u32 },
    /// Fail-fast lock acquisition hit a row held by another transaction.
    ContendedFailed(String),
    AlreadyTaken,
    NotFound,
    /// Infrastructure failure; nothing the attempt wrote survived.
    TransactionError(String),
}

impl Outcome {
    pub fn is_booked(&self) -> bool {
        matches!(self, Outcome::Booked(_))
    }

    pub fn booked_resource(&self) -> Option<ResourceId> {
        match self {
            Outcome::Booked(id) => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Booked(id) => write!(f, "booked seat {id}"),
            Outcome::ContendedSkipped { skipped } => {
                write!(f, "no free seat, skipped {skipped} locked")
            }
            Outcome::ContendedFailed(msg) => write!(f, "contended: {msg}"),
            Outcome::AlreadyTaken => f.write_str("already taken"),
            Outcome::NotFound => f.write_str("not found"),
            Outcome::TransactionError(msg) => write!(f, "transaction error: {msg}"),
        }
    }
}

/// Protocol position of an attempt. The last state reached is reported with
/// the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    Started,
    Locked,
    Decided,
    Committed,
    NotFound,
    Contended,
    Failed,
}

impl AttemptState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptState::Committed
                | AttemptState::NotFound
                | AttemptState::Contended
                | AttemptState::Failed
        )
    }
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AttemptState::Started => "started",
            AttemptState::Locked => "locked",
            AttemptState::Decided => "decided",
            AttemptState::Committed => "committed",
            AttemptState::NotFound => "not_found",
            AttemptState::Contended => "contended",
            AttemptState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptMode {
    Exact(LockStrategy),
    AnyAvailable,
}

impl AttemptMode {
    pub fn label(&self) -> &'static str {
        match self {
            AttemptMode::Exact(LockStrategy::Blocking) => "exact_blocking",
            AttemptMode::Exact(LockStrategy::NonBlocking) => "exact_non_blocking",
            AttemptMode::Exact(LockStrategy::SkipContended) => "exact_skip_contended",
            AttemptMode::AnyAvailable => "any_available",
        }
    }
}

/// One structured record per attempt, for the driver to aggregate or print.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub actor: ActorId,
    pub mode: AttemptMode,
    pub resource_id: Option<ResourceId>,
    pub outcome: Outcome,
    pub state: AttemptState,
    pub message: Option<String>,
    pub tx_id: Option<Ulid>,
    pub elapsed_ms: f64,
}

impl OutcomeRecord {
    /// Record for an attempt that never reported back (timed out or panicked).
    pub fn abandoned(
        actor: ActorId,
        mode: AttemptMode,
        resource_id: Option<ResourceId>,
        message: String,
        elapsed: Duration,
    ) -> Self {
        Self {
            actor,
            mode,
            resource_id,
            outcome: Outcome::TransactionError(message),
            state: AttemptState::Failed,
            message: None,
            tx_id: None,
            elapsed_ms: elapsed.as_secs_f64() * 1000.0,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Per-variant counts over a set of attempts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub booked: usize,
    pub contended_skipped: usize,
    pub contended_failed: usize,
    pub already_taken: usize,
    pub not_found: usize,
    pub transaction_error: usize,
}

impl Tally {
    pub fn add(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Booked(_) => self.booked += 1,
            Outcome::ContendedSkipped { .. } => self.contended_skipped += 1,
            Outcome::ContendedFailed(_) => self.contended_failed += 1,
            Outcome::AlreadyTaken => self.already_taken += 1,
            Outcome::NotFound => self.not_found += 1,
            Outcome::TransactionError(_) => self.transaction_error += 1,
        }
    }

    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a OutcomeRecord>) -> Self {
        let mut tally = Tally::default();
        for r in records {
            tally.add(&r.outcome);
        }
        tally
    }

    pub fn total(&self) -> usize {
        self.booked
            + self.contended_skipped
            + self.contended_failed
            + self.already_taken
            + self.not_found
            + self.transaction_error
    }

    /// Attempts that found no seat to take, whether none existed or all were busy.
    pub fn unavailable(&self) -> usize {
        self.not_found + self.contended_skipped
    }
}

impl fmt::Display for Tally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "booked={} already_taken={} contended_failed={} contended_skipped={} not_found={} transaction_error={}",
            self.booked,
            self.already_taken,
            self.contended_failed,
            self.contended_skipped,
            self.not_found,
            self.transaction_error
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tally_counts_each_variant() {
        let mut tally = Tally::default();
        tally.add(&Outcome::Booked(ResourceId(1)));
        tally.add(&Outcome::AlreadyTaken);
        tally.add(&Outcome::AlreadyTaken);
        tally.add(&Outcome::ContendedSkipped { skipped: 3 });
        tally.add(&Outcome::NotFound);

        assert_eq!(tally.booked, 1);
        assert_eq!(tally.already_taken, 2);
        assert_eq!(tally.unavailable(), 2);
        assert_eq!(tally.total(), 5);
    }

    #[test]
    fn outcome_serializes_with_kind_tag() {
        let json = serde_json::to_value(Outcome::Booked(ResourceId(7))).unwrap();
        assert_eq!(json["kind"], "booked");
        assert_eq!(json["detail"], 7);

        let json = serde_json::to_value(Outcome::AlreadyTaken).unwrap();
        assert_eq!(json["kind"], "already_taken");
    }

    #[test]
    fn terminal_states() {
        assert!(!AttemptState::Locked.is_terminal());
        assert!(!AttemptState::Decided.is_terminal());
        assert!(AttemptState::Committed.is_terminal());
        assert!(AttemptState::Contended.is_terminal());
    }
}
