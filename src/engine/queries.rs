use chrono::NaiveDate;
use serde::Serialize;
use ulid::Ulid;

use crate::model::*;

use super::{BookingError, BookingService};

/// A slot rendered for callers: RFC 3339 bounds plus a spoken-style label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotView {
    pub start: String,
    pub end: String,
    pub display: String,
}

impl BookingService {
    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, BookingError> {
        self.store.get(id).await?.ok_or(BookingError::NotFound)
    }

    /// Parse a query date, rejecting days before today in the business timezone.
    pub fn check_query_date(&self, date: &str) -> Result<NaiveDate, BookingError> {
        let zone = &self.settings.zone;
        let day = zone
            .parse_date(date)
            .ok_or_else(|| BookingError::Validation(format!("{date:?} is not a YYYY-MM-DD date")))?;
        let today = zone
            .local_date(self.clock.now_ms())
            .ok_or_else(|| BookingError::Internal("clock out of range".into()))?;
        if day < today {
            return Err(BookingError::PastDate);
        }
        Ok(day)
    }

    pub fn slot_views(&self, slots: &[Span]) -> Vec<SlotView> {
        let zone = &self.settings.zone;
        slots
            .iter()
            .map(|s| SlotView {
                start: zone.format_rfc3339(s.start),
                end: zone.format_rfc3339(s.end),
                display: zone.format_human(s.start),
            })
            .collect()
    }
}
