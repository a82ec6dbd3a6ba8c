use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicUsize, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::model::*;
use crate::observability;

use super::{LockRead, LockStrategy, ResourceStore, Selector, StoreError, Transaction};

/// Exclusive row lock. Held by at most one transaction at a time.
pub type RowLock = Arc<Mutex<()>>;

#[derive(Default)]
struct Inner {
    /// Last committed version of every row. Readers never wait on row locks.
    committed: DashMap<ResourceId, Resource>,
    row_locks: DashMap<ResourceId, RowLock>,
    /// Flight → seat ids in scan order (seeding order).
    flights: DashMap<String, Vec<ResourceId>>,
    next_id: AtomicI64,
    begin_faults: AtomicU32,
    update_faults: AtomicU32,
    commit_faults: AtomicU32,
    open: AtomicUsize,
}

/// Transactional seat table held in process memory.
///
/// Row locks are real `tokio` mutexes, so blocking, fail-fast and skip
/// semantics behave as they would against a database: a blocked transaction
/// is parked until the holder commits, rolls back, or is dropped.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls to `begin` fail as if the backend were unreachable.
    pub fn fail_next_begins(&self, n: u32) {
        self.inner.begin_faults.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` calls to `update` fail as a backend error.
    pub fn fail_next_updates(&self, n: u32) {
        self.inner.update_faults.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` commits fail after their writes were issued.
    /// A failed commit discards the writes and releases the locks.
    pub fn fail_next_commits(&self, n: u32) {
        self.inner.commit_faults.store(n, Ordering::SeqCst);
    }

    /// Transactions begun and not yet committed, rolled back, or dropped.
    pub fn open_transactions(&self) -> usize {
        self.inner.open.load(Ordering::SeqCst)
    }

    fn row_lock(&self, id: &ResourceId) -> Option<RowLock> {
        self.inner.row_locks.get(id).map(|e| e.value().clone())
    }

    fn flight_ids(&self, flight_id: &str) -> Vec<ResourceId> {
        self.inner
            .flights
            .get(flight_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }
}

fn take_fault(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        if take_fault(&self.inner.begin_faults) {
            return Err(StoreError::Unavailable("injected begin failure".into()));
        }
        self.inner.open.fetch_add(1, Ordering::SeqCst);
        metrics::gauge!(observability::TRANSACTIONS_OPEN).increment(1.0);
        Ok(Box::new(MemoryTransaction {
            id: Ulid::new(),
            inner: self.inner.clone(),
            held: BTreeMap::new(),
            pending: BTreeMap::new(),
            skipped: 0,
            closed: false,
        }))
    }

    async fn seed_flight(&self, flight_id: &str, seats: usize) -> Result<Vec<Resource>, StoreError> {
        let mut order = self.inner.flights.entry(flight_id.to_string()).or_default();
        let existing: HashSet<String> = order
            .iter()
            .filter_map(|id| self.inner.committed.get(id).map(|r| r.seat_number.clone()))
            .collect();

        let labels: Vec<String> = (0..seats).map(seat_label).collect();
        if let Some(dup) = labels.iter().find(|l| existing.contains(*l)) {
            return Err(StoreError::Duplicate {
                flight_id: flight_id.to_string(),
                seat_number: dup.clone(),
            });
        }

        let mut created = Vec::with_capacity(seats);
        for label in labels {
            let id = ResourceId(self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1);
            let seat = Resource::available(id, flight_id, label);
            self.inner.row_locks.insert(id, Arc::new(Mutex::new(())));
            self.inner.committed.insert(id, seat.clone());
            order.push(id);
            created.push(seat);
        }
        debug!("seeded {seats} seats for flight {flight_id}");
        Ok(created)
    }

    async fn find_seat(&self, flight_id: &str, seat_number: &str) -> Result<Option<Resource>, StoreError> {
        Ok(self
            .flight_ids(flight_id)
            .iter()
            .filter_map(|id| self.inner.committed.get(id).map(|r| r.value().clone()))
            .find(|r| r.seat_number == seat_number))
    }

    async fn fetch(&self, id: ResourceId) -> Result<Option<Resource>, StoreError> {
        Ok(self.inner.committed.get(&id).map(|r| r.value().clone()))
    }

    async fn list(&self, flight_id: &str) -> Result<Vec<Resource>, StoreError> {
        Ok(self
            .flight_ids(flight_id)
            .iter()
            .filter_map(|id| self.inner.committed.get(id).map(|r| r.value().clone()))
            .collect())
    }

    async fn reset(&self, id: ResourceId) -> Result<(), StoreError> {
        let lock = self.row_lock(&id).ok_or(StoreError::NotFound(id))?;
        let _guard = lock.lock_owned().await;
        let mut row = self
            .inner
            .committed
            .get_mut(&id)
            .ok_or(StoreError::NotFound(id))?;
        row.status = SeatStatus::Available;
        row.owner = None;
        Ok(())
    }

    async fn reset_flight(&self, flight_id: &str) -> Result<u64, StoreError> {
        let mut touched = 0;
        for id in self.flight_ids(flight_id) {
            self.reset(id).await?;
            touched += 1;
        }
        Ok(touched)
    }

    async fn teardown(&self) -> Result<(), StoreError> {
        self.inner.flights.clear();
        self.inner.committed.clear();
        self.inner.row_locks.clear();
        Ok(())
    }
}

enum Acquired {
    Held,
    Contended,
    Missing,
}

pub struct MemoryTransaction {
    id: Ulid,
    inner: Arc<Inner>,
    held: BTreeMap<ResourceId, OwnedMutexGuard<()>>,
    pending: BTreeMap<ResourceId, (SeatStatus, Option<ActorId>)>,
    skipped: u32,
    closed: bool,
}

impl MemoryTransaction {
    /// Committed row with this transaction's own writes applied on top.
    fn view(&self, id: ResourceId) -> Option<Resource> {
        let mut row = self.inner.committed.get(&id).map(|r| r.value().clone())?;
        if let Some((status, owner)) = self.pending.get(&id) {
            row.status = *status;
            row.owner = owner.clone();
        }
        Some(row)
    }

    /// Only `Blocking` waits; the other strategies try once.
    async fn acquire(&mut self, id: ResourceId, strategy: LockStrategy) -> Acquired {
        if self.held.contains_key(&id) {
            return Acquired::Held;
        }
        let Some(lock) = self.inner.row_locks.get(&id).map(|e| e.value().clone()) else {
            return Acquired::Missing;
        };
        let guard = match strategy {
            LockStrategy::Blocking => {
                let start = Instant::now();
                let guard = lock.lock_owned().await;
                metrics::histogram!(observability::LOCK_WAIT_SECONDS, "strategy" => strategy.as_str())
                    .record(start.elapsed().as_secs_f64());
                guard
            }
            LockStrategy::NonBlocking | LockStrategy::SkipContended => match lock.try_lock_owned() {
                Ok(guard) => guard,
                Err(_) => return Acquired::Contended,
            },
        };
        self.held.insert(id, guard);
        Acquired::Held
    }

    fn release(&mut self, id: ResourceId) {
        if !self.pending.contains_key(&id) {
            self.held.remove(&id);
        }
    }

    async fn scan(
        &mut self,
        flight_id: &str,
        status: SeatStatus,
        strategy: LockStrategy,
    ) -> Result<LockRead, StoreError> {
        let candidates = self
            .inner
            .flights
            .get(flight_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();

        for id in candidates {
            // Filter on the visible version first, then lock and re-check.
            if !self.view(id).is_some_and(|r| r.status == status) {
                continue;
            }
            match self.acquire(id, strategy).await {
                Acquired::Missing => continue,
                Acquired::Contended if strategy == LockStrategy::SkipContended => {
                    self.skipped += 1;
                    metrics::counter!(observability::ROWS_SKIPPED_TOTAL).increment(1);
                    continue;
                }
                Acquired::Contended => return Ok(LockRead::Contended),
                Acquired::Held => match self.view(id) {
                    Some(row) if row.status == status => return Ok(LockRead::Locked(row)),
                    // Changed by the previous holder while we waited.
                    _ => self.release(id),
                },
            }
        }
        Ok(LockRead::NotFound)
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    fn id(&self) -> Ulid {
        self.id
    }

    fn skipped(&self) -> u32 {
        self.skipped
    }

    async fn lock_and_read(
        &mut self,
        selector: &Selector,
        strategy: LockStrategy,
    ) -> Result<LockRead, StoreError> {
        match selector {
            Selector::Exact(id) => {
                if strategy == LockStrategy::SkipContended {
                    return Err(StoreError::InvalidSelector(
                        "skip_contended requires a predicate selector",
                    ));
                }
                match self.acquire(*id, strategy).await {
                    Acquired::Missing => Ok(LockRead::NotFound),
                    Acquired::Contended => Ok(LockRead::Contended),
                    Acquired::Held => match self.view(*id) {
                        Some(row) => Ok(LockRead::Locked(row)),
                        None => {
                            self.release(*id);
                            Ok(LockRead::NotFound)
                        }
                    },
                }
            }
            Selector::FirstMatching { flight_id, status } => {
                self.scan(flight_id, *status, strategy).await
            }
        }
    }

    async fn update(
        &mut self,
        id: ResourceId,
        status: SeatStatus,
        owner: Option<ActorId>,
    ) -> Result<u64, StoreError> {
        if !status_owner_consistent(status, owner.as_ref()) {
            return Err(StoreError::InvalidUpdate(id));
        }
        if take_fault(&self.inner.update_faults) {
            return Err(StoreError::Backend("injected update failure".into()));
        }
        match self.acquire(id, LockStrategy::Blocking).await {
            Acquired::Held => {}
            Acquired::Contended | Acquired::Missing => return Ok(0),
        }
        if self.view(id).is_none() {
            self.release(id);
            return Ok(0);
        }
        self.pending.insert(id, (status, owner));
        Ok(1)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut tx = self;
        tx.closed = true;
        if take_fault(&tx.inner.commit_faults) {
            let discarded = tx.pending.len();
            tx.pending.clear();
            metrics::counter!(observability::COMMIT_FAILURES_TOTAL).increment(1);
            warn!("tx {}: injected commit failure, discarded {discarded} writes", tx.id);
            return Err(StoreError::CommitFailed("injected commit failure".into()));
        }
        // Row locks are still held here; they drop with `tx`.
        for (id, (status, owner)) in std::mem::take(&mut tx.pending) {
            if let Some(mut row) = tx.inner.committed.get_mut(&id) {
                row.status = status;
                row.owner = owner;
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let mut tx = self;
        tx.closed = true;
        tx.pending.clear();
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if !self.closed && !self.held.is_empty() {
            debug!(
                "tx {}: dropped while open, releasing {} row locks",
                self.id,
                self.held.len()
            );
        }
        self.inner.open.fetch_sub(1, Ordering::SeqCst);
        metrics::gauge!(observability::TRANSACTIONS_OPEN).decrement(1.0);
    }
}
