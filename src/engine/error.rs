use thiserror::Error;
use ulid::Ulid;

use crate::calendar::CalendarError;
use crate::store::StoreError;

/// Failures surfaced by the booking core.
///
/// Everything except `SourceUnavailable` and `Internal` is a user-correctable
/// condition that callers are expected to relay back to the requester.
#[derive(Debug, Error)]
pub enum BookingError {
    #[error("cannot book an appointment in the past")]
    PastDate,
    #[error("cannot book a same-day appointment; please choose the next day or later")]
    SameDay,
    #[error("the requested time overlaps an existing appointment")]
    Overlap,
    #[error("no matching appointment was found")]
    NotFound,
    #[error("booking {0} has been cancelled")]
    Cancelled(Ulid),
    #[error("monthly budget {budget:.0} is below the minimum of {minimum:.0}")]
    BelowMinimumBudget { budget: f64, minimum: f64 },
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl BookingError {
    /// True for errors the requester can fix by changing the request.
    pub fn is_user_error(&self) -> bool {
        !matches!(
            self,
            BookingError::SourceUnavailable(_) | BookingError::Internal(_)
        )
    }
}

impl From<StoreError> for BookingError {
    fn from(err: StoreError) -> Self {
        BookingError::Internal(err.to_string())
    }
}

impl From<CalendarError> for BookingError {
    fn from(err: CalendarError) -> Self {
        BookingError::SourceUnavailable(err.to_string())
    }
}
