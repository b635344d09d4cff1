use tracing::{error, warn};

use crate::clock::Zone;
use crate::model::*;

use super::{BookingError, BookingService};

/// Candidate slots always advance by one hour, whatever the slot length.
pub const SLOT_STEP_MS: Ms = HOUR_MS;

// ── Availability Algorithm ────────────────────────────────────────

/// Free slots on an ISO calendar date (`YYYY-MM-DD`) in `zone`.
///
/// An unparsable date yields no slots rather than an error.
pub fn compute_available_slots(
    zone: &Zone,
    date: &str,
    hours: BusinessHours,
    slot_minutes: i64,
    busy: &[Span],
) -> Vec<Span> {
    let Some(date) = zone.parse_date(date) else {
        return Vec::new();
    };
    let (Some(open), Some(close)) = (
        zone.at_hour(date, hours.start_hour),
        zone.at_hour(date, hours.end_hour),
    ) else {
        return Vec::new();
    };
    match Span::try_new(open, close) {
        Some(window) => slots_in_window(&window, slot_minutes * MINUTE_MS, busy),
        None => Vec::new(),
    }
}

/// Walk `window` in `SLOT_STEP_MS` increments, keeping every `[t, t+duration)`
/// that ends inside the window and intersects no busy interval.
pub fn slots_in_window(window: &Span, duration: Ms, busy: &[Span]) -> Vec<Span> {
    if duration <= 0 {
        return Vec::new();
    }

    let mut blocked: Vec<Span> = busy.iter().copied().filter(|s| s.start < s.end).collect();
    blocked.sort_by_key(|s| s.start);
    let blocked = merge_overlapping(&blocked);

    let mut slots = Vec::new();
    let mut t = window.start;
    while t + duration <= window.end {
        let candidate = Span::new(t, t + duration);
        // Merged spans are disjoint, so ends ascend with starts.
        let first_ending_after = blocked.partition_point(|b| b.end <= candidate.start);
        let hit = blocked
            .get(first_ending_after)
            .is_some_and(|b| b.start < candidate.end);
        if !hit {
            slots.push(candidate);
        }
        t += SLOT_STEP_MS;
    }
    slots
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

impl BookingService {
    /// Slots for `date`, with calendar outages reported as `SourceUnavailable`.
    pub async fn try_available_slots(&self, date: &str) -> Result<Vec<Span>, BookingError> {
        let settings = &self.settings;
        let Some(day) = settings
            .zone
            .parse_date(date)
            .and_then(|d| settings.zone.day_span(d))
        else {
            warn!("invalid date for availability query: {date:?}");
            metrics::counter!(crate::observability::SLOT_QUERIES_TOTAL, "outcome" => "invalid_date")
                .increment(1);
            return Ok(Vec::new());
        };

        let mut busy: Vec<Span> = self
            .calendar
            .list_busy(day)
            .await?
            .into_iter()
            .map(|b| b.span)
            .collect();
        // Unconfirmed bookings hold their slot even though the calendar has no event yet.
        busy.extend(
            self.store
                .list_active_in(day)
                .await?
                .iter()
                .filter(|b| b.status == BookingStatus::PendingConfirmation)
                .map(Booking::span),
        );

        let slots = compute_available_slots(
            &settings.zone,
            date,
            settings.hours,
            settings.slot_minutes,
            &busy,
        );
        let outcome = if slots.is_empty() { "empty" } else { "slots" };
        metrics::counter!(crate::observability::SLOT_QUERIES_TOTAL, "outcome" => outcome).increment(1);
        Ok(slots)
    }

    /// Slots for `date`. A calendar or store outage reads as "no availability".
    pub async fn available_slots(&self, date: &str) -> Vec<Span> {
        match self.try_available_slots(date).await {
            Ok(slots) => slots,
            Err(e) => {
                error!("availability for {date} unavailable, reporting no slots: {e}");
                metrics::counter!(crate::observability::SLOT_QUERIES_TOTAL, "outcome" => "source_unavailable")
                    .increment(1);
                Vec::new()
            }
        }
    }
}
