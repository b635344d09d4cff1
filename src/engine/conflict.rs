use crate::clock::Zone;
use crate::model::*;

use super::{BookingError, BookingService};

const MAX_FIELD_LEN: usize = 256;

pub(crate) fn parse_start(zone: &Zone, raw: &str) -> Result<Ms, BookingError> {
    zone.parse_instant(raw).ok_or_else(|| {
        BookingError::Validation(format!(
            "start time {raw:?} is not an ISO 8601 date-time (e.g. 2026-10-20T09:00)"
        ))
    })
}

/// Bookings start on a later local day than `now`.
pub(crate) fn validate_start(zone: &Zone, now: Ms, start: Ms) -> Result<(), BookingError> {
    if start < now {
        return Err(BookingError::PastDate);
    }
    if zone.same_day(start, now) {
        return Err(BookingError::SameDay);
    }
    Ok(())
}

pub(crate) fn validate_contact(contact: &Contact) -> Result<(), BookingError> {
    if contact.name.is_empty() {
        return Err(BookingError::Validation("name is required".into()));
    }
    if contact.name.len() > MAX_FIELD_LEN || contact.email.len() > MAX_FIELD_LEN {
        return Err(BookingError::Validation("contact field too long".into()));
    }
    if !is_plausible_email(&contact.email) {
        return Err(BookingError::Validation(format!(
            "{:?} is not a valid email address",
            contact.email
        )));
    }
    Ok(())
}

fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}

impl BookingService {
    /// Reject `span` if it overlaps calendar busy time or another active
    /// booking. `exclude` is the booking being moved, which may overlap itself.
    pub(super) async fn check_no_conflict(
        &self,
        span: &Span,
        exclude: Option<&Booking>,
    ) -> Result<(), BookingError> {
        let own_event = exclude.and_then(|b| b.external_event_ref.as_deref());
        let busy = self.calendar.list_busy(*span).await?;
        if busy
            .iter()
            .filter(|b| own_event.is_none() || b.event_ref.as_deref() != own_event)
            .any(|b| b.span.overlaps(span))
        {
            return Err(BookingError::Overlap);
        }

        let own_id = exclude.map(|b| b.id);
        let bookings = self.store.list_active_in(*span).await?;
        if bookings
            .iter()
            .filter(|b| Some(b.id) != own_id)
            .any(|b| b.span().overlaps(span))
        {
            return Err(BookingError::Overlap);
        }
        Ok(())
    }
}
