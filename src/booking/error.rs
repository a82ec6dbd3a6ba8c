use crate::model::ResourceId;
use crate::store::StoreError;

#[derive(Debug)]
pub enum BookingError {
    /// Skip-contended locking only makes sense when choosing among many seats.
    SkipContendedOnExactTarget(ResourceId),
    UnknownSeat { flight_id: String, seat_number: String },
    Store(StoreError),
}

impl std::fmt::Display for BookingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookingError::SkipContendedOnExactTarget(id) => write!(
                f,
                "skip_contended cannot be used to book a specific seat ({id})"
            ),
            BookingError::UnknownSeat {
                flight_id,
                seat_number,
            } => write!(f, "seat {seat_number} not found on flight {flight_id}"),
            BookingError::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for BookingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BookingError::Store(e) => Some(e),
            BookingError::SkipContendedOnExactTarget(_) | BookingError::UnknownSeat { .. } => None,
        }
    }
}

impl From<StoreError> for BookingError {
    fn from(e: StoreError) -> Self {
        BookingError::Store(e)
    }
}
