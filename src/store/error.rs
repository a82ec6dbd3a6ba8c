use crate::model::ResourceId;

#[derive(Debug)]
pub enum StoreError {
    /// Backend could not be reached or a session could not be opened.
    Unavailable(String),
    /// Backend rejected a statement for a reason other than lock contention.
    Backend(String),
    CommitFailed(String),
    /// Selector/strategy pairing the store does not support.
    InvalidSelector(&'static str),
    /// Status/owner pair that would break the owner-iff-occupied rule.
    InvalidUpdate(ResourceId),
    NotFound(ResourceId),
    Duplicate { flight_id: String, seat_number: String },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Unavailable(e) => write!(f, "store unavailable: {e}"),
            StoreError::Backend(e) => write!(f, "backend error: {e}"),
            StoreError::CommitFailed(e) => write!(f, "commit failed: {e}"),
            StoreError::InvalidSelector(msg) => write!(f, "invalid selector: {msg}"),
            StoreError::InvalidUpdate(id) => {
                write!(f, "invalid update for seat {id}: owner must be set iff occupied")
            }
            StoreError::NotFound(id) => write!(f, "seat not found: {id}"),
            StoreError::Duplicate {
                flight_id,
                seat_number,
            } => write!(f, "seat {seat_number} already exists on flight {flight_id}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<tokio_postgres::Error> for StoreError {
    fn from(e: tokio_postgres::Error) -> Self {
        if e.is_closed() {
            StoreError::Unavailable(e.to_string())
        } else {
            StoreError::Backend(e.to_string())
        }
    }
}
