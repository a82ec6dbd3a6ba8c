use std::str::FromStr;

use async_trait::async_trait;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, Config, NoTls, Row};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::observability;

use super::{LockRead, LockStrategy, ResourceStore, Selector, StoreError, Transaction};

const COLUMNS: &str = "id, flight_id, seat_number, status, passenger_id";

const CREATE_TABLE: &str = r#"
CREATE TABLE seats (
    id BIGSERIAL PRIMARY KEY,
    flight_id TEXT NOT NULL,
    seat_number VARCHAR(10) NOT NULL,
    status TEXT NOT NULL DEFAULT 'available' CHECK (status IN ('available', 'occupied')),
    passenger_id TEXT,
    UNIQUE (flight_id, seat_number),
    CHECK ((status = 'occupied') = (passenger_id IS NOT NULL))
)"#;

/// Seat table in PostgreSQL. Every transaction runs on its own session, the
/// way independent clients would.
#[derive(Clone)]
pub struct PostgresStore {
    config: Config,
}

impl PostgresStore {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn from_url(url: &str) -> Result<Self, StoreError> {
        let config = Config::from_str(url).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self::new(config))
    }

    async fn connect(&self) -> Result<Client, StoreError> {
        let (client, conn) = self
            .config
            .connect(NoTls)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("postgres connection closed: {e}");
            }
        });
        Ok(client)
    }

    /// Drops and recreates the `seats` table.
    pub async fn provision(&self) -> Result<(), StoreError> {
        let client = self.connect().await?;
        client.batch_execute("DROP TABLE IF EXISTS seats").await?;
        client.batch_execute(CREATE_TABLE).await?;
        info!("created seats table");
        Ok(())
    }
}

fn row_to_resource(row: &Row) -> Result<Resource, StoreError> {
    let id: i64 = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let status = SeatStatus::parse(&status)
        .ok_or_else(|| StoreError::Backend(format!("unknown seat status '{status}'")))?;
    let owner: Option<String> = row.try_get("passenger_id")?;
    Ok(Resource {
        id: ResourceId(id),
        flight_id: row.try_get("flight_id")?,
        seat_number: row.try_get("seat_number")?,
        status,
        owner: owner.map(ActorId),
    })
}

fn lock_clause(strategy: LockStrategy) -> &'static str {
    match strategy {
        LockStrategy::Blocking => "FOR UPDATE",
        LockStrategy::NonBlocking => "FOR UPDATE NOWAIT",
        LockStrategy::SkipContended => "FOR UPDATE SKIP LOCKED",
    }
}

fn is_lock_not_available(e: &tokio_postgres::Error) -> bool {
    e.code() == Some(&SqlState::LOCK_NOT_AVAILABLE)
}

#[async_trait]
impl ResourceStore for PostgresStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        let client = self.connect().await?;
        client
            .batch_execute("BEGIN")
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Box::new(PgTransaction {
            id: Ulid::new(),
            client,
        }))
    }

    async fn seed_flight(&self, flight_id: &str, seats: usize) -> Result<Vec<Resource>, StoreError> {
        let mut client = self.connect().await?;
        let tx = client.transaction().await?;
        let stmt = tx
            .prepare(&format!(
                "INSERT INTO seats (flight_id, seat_number) VALUES ($1, $2) RETURNING {COLUMNS}"
            ))
            .await?;
        let mut created = Vec::with_capacity(seats);
        for i in 0..seats {
            let label = seat_label(i);
            let row = tx.query_one(&stmt, &[&flight_id, &label]).await.map_err(|e| {
                if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                    StoreError::Duplicate {
                        flight_id: flight_id.to_string(),
                        seat_number: label.clone(),
                    }
                } else {
                    StoreError::from(e)
                }
            })?;
            created.push(row_to_resource(&row)?);
        }
        tx.commit().await?;
        info!("inserted {seats} seats for flight {flight_id}");
        Ok(created)
    }

    async fn find_seat(&self, flight_id: &str, seat_number: &str) -> Result<Option<Resource>, StoreError> {
        let client = self.connect().await?;
        let row = client
            .query_opt(
                &format!("SELECT {COLUMNS} FROM seats WHERE flight_id = $1 AND seat_number = $2"),
                &[&flight_id, &seat_number],
            )
            .await?;
        row.as_ref().map(row_to_resource).transpose()
    }

    async fn fetch(&self, id: ResourceId) -> Result<Option<Resource>, StoreError> {
        let client = self.connect().await?;
        let row = client
            .query_opt(&format!("SELECT {COLUMNS} FROM seats WHERE id = $1"), &[&id.0])
            .await?;
        row.as_ref().map(row_to_resource).transpose()
    }

    async fn list(&self, flight_id: &str) -> Result<Vec<Resource>, StoreError> {
        let client = self.connect().await?;
        let rows = client
            .query(
                &format!("SELECT {COLUMNS} FROM seats WHERE flight_id = $1 ORDER BY id"),
                &[&flight_id],
            )
            .await?;
        rows.iter().map(row_to_resource).collect()
    }

    async fn reset(&self, id: ResourceId) -> Result<(), StoreError> {
        let client = self.connect().await?;
        let n = client
            .execute(
                "UPDATE seats SET status = 'available', passenger_id = NULL WHERE id = $1",
                &[&id.0],
            )
            .await?;
        if n == 0 {
            return Err(StoreError::NotFound(id));
        }
        info!("seat {id} reset to available");
        Ok(())
    }

    async fn reset_flight(&self, flight_id: &str) -> Result<u64, StoreError> {
        let client = self.connect().await?;
        let n = client
            .execute(
                "UPDATE seats SET status = 'available', passenger_id = NULL WHERE flight_id = $1",
                &[&flight_id],
            )
            .await?;
        Ok(n)
    }

    async fn teardown(&self) -> Result<(), StoreError> {
        let client = self.connect().await?;
        client.batch_execute("DROP TABLE IF EXISTS seats").await?;
        info!("dropped seats table");
        Ok(())
    }
}

/// Open `BEGIN` block on a dedicated session. If the handle is dropped the
/// session closes and the server rolls the transaction back.
pub struct PgTransaction {
    id: Ulid,
    client: Client,
}

#[async_trait]
impl Transaction for PgTransaction {
    fn id(&self) -> Ulid {
        self.id
    }

    async fn lock_and_read(
        &mut self,
        selector: &Selector,
        strategy: LockStrategy,
    ) -> Result<LockRead, StoreError> {
        let result = match selector {
            Selector::Exact(id) => {
                if strategy == LockStrategy::SkipContended {
                    return Err(StoreError::InvalidSelector(
                        "skip_contended requires a predicate selector",
                    ));
                }
                let sql = format!("SELECT {COLUMNS} FROM seats WHERE id = $1 {}", lock_clause(strategy));
                self.client.query_opt(&sql, &[&id.0]).await
            }
            Selector::FirstMatching { flight_id, status } => {
                let sql = format!(
                    "SELECT {COLUMNS} FROM seats WHERE flight_id = $1 AND status = $2 ORDER BY id LIMIT 1 {}",
                    lock_clause(strategy)
                );
                self.client.query_opt(&sql, &[flight_id, &status.as_str()]).await
            }
        };
        match result {
            Ok(Some(row)) => Ok(LockRead::Locked(row_to_resource(&row)?)),
            Ok(None) => Ok(LockRead::NotFound),
            Err(e) if is_lock_not_available(&e) => Ok(LockRead::Contended),
            Err(e) => Err(e.into()),
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
        let owner = owner.map(|o| o.0);
        let n = self
            .client
            .execute(
                "UPDATE seats SET status = $1, passenger_id = $2 WHERE id = $3",
                &[&status.as_str(), &owner, &id.0],
            )
            .await?;
        Ok(n)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        if let Err(e) = self.client.batch_execute("COMMIT").await {
            metrics::counter!(observability::COMMIT_FAILURES_TOTAL).increment(1);
            warn!("tx {}: commit failed: {e}", self.id);
            if let Err(e) = self.client.batch_execute("ROLLBACK").await {
                warn!("tx {}: rollback after failed commit also failed: {e}", self.id);
            }
            return Err(StoreError::CommitFailed(e.to_string()));
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.client.batch_execute("ROLLBACK").await?;
        Ok(())
    }
}
