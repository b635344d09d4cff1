mod availability;
mod conflict;
mod error;
mod locks;
mod mutations;
mod queries;
#[cfg(test)]
mod tests;

pub use availability::{compute_available_slots, merge_overlapping, slots_in_window, SLOT_STEP_MS};
pub use error::BookingError;
pub use locks::IdentityLocks;
pub use mutations::{BookingMode, BookingReceipt, ConfirmOutcome};
pub use queries::SlotView;

use std::sync::Arc;

use serde::Deserialize;

use crate::calendar::CalendarSource;
use crate::clock::{Clock, Zone};
use crate::model::*;
use crate::notify::Notifier;
use crate::store::BookingStore;

/// Everything the booking core needs to know about the business.
#[derive(Debug, Clone)]
pub struct BookingSettings {
    pub zone: Zone,
    pub hours: BusinessHours,
    pub slot_minutes: i64,
    /// Base for links in outbound email, without a trailing slash.
    pub public_url: String,
    pub min_monthly_budget: Option<f64>,
    pub default_country_code: String,
    pub max_identity_locks: usize,
}

impl BookingSettings {
    pub fn slot_ms(&self) -> Ms {
        self.slot_minutes * MINUTE_MS
    }

    pub fn confirm_url(&self, id: ulid::Ulid) -> String {
        format!("{}/bookings/{id}/confirm", self.public_url.trim_end_matches('/'))
    }
}

// ── Requests ─────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct BookingRequest {
    pub contact: Contact,
    /// RFC 3339, or naive local time in the business timezone.
    pub start_time: String,
    #[serde(default)]
    pub details: BookingDetails,
    /// Preferred lock identity when the caller has one.
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Length of the call that produced an immediate booking, for its call log.
    #[serde(default)]
    pub call_duration_secs: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelRequest {
    pub email: String,
    pub original_start_time: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RescheduleRequest {
    pub email: String,
    pub original_start_time: String,
    pub new_start_time: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallLogRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub details: BookingDetails,
    #[serde(default)]
    pub resulted_in_meeting: bool,
    pub disqualification_reason: Option<String>,
    pub call_duration_secs: Option<u32>,
}

/// The booking state machine plus availability, over injected collaborators.
pub struct BookingService {
    calendar: Arc<dyn CalendarSource>,
    store: Arc<dyn BookingStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    settings: BookingSettings,
    locks: IdentityLocks,
}

impl BookingService {
    pub fn new(
        calendar: Arc<dyn CalendarSource>,
        store: Arc<dyn BookingStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        settings: BookingSettings,
    ) -> Self {
        let locks = IdentityLocks::new(settings.max_identity_locks);
        Self {
            calendar,
            store,
            notifier,
            clock,
            settings,
            locks,
        }
    }

    pub fn settings(&self) -> &BookingSettings {
        &self.settings
    }

    pub fn zone(&self) -> &Zone {
        &self.settings.zone
    }
}
