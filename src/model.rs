use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. Every instant in the crate is one of these.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Checked constructor for spans built from untrusted input.
    pub fn try_new(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Daily bookable window, in whole local hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessHours {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl BusinessHours {
    pub fn new(start_hour: u32, end_hour: u32) -> Option<Self> {
        (start_hour < end_hour && end_hour <= 23).then_some(Self { start_hour, end_hour })
    }

    pub fn window_minutes(&self) -> i64 {
        i64::from(self.end_hour - self.start_hour) * 60
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

impl Contact {
    /// Trimmed copy with the email lowercased and a blank phone dropped.
    pub fn normalized(&self) -> Self {
        Self {
            name: self.name.trim().to_string(),
            email: normalize_email(&self.email),
            phone: self
                .phone
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string),
        }
    }

    pub fn first_name(&self) -> &str {
        self.name.split_whitespace().next().unwrap_or(&self.name)
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Free-form lead details captured alongside a booking.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookingDetails {
    pub company_name: Option<String>,
    pub goal: Option<String>,
    pub monthly_budget: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    PendingConfirmation,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::PendingConfirmation => "pending_confirmation",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

/// Reminder thresholds, each gating exactly one SMS per booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderKind {
    DayBefore,
    MorningOf,
    HourBefore,
}

impl ReminderKind {
    pub const ALL: [ReminderKind; 3] = [
        ReminderKind::DayBefore,
        ReminderKind::MorningOf,
        ReminderKind::HourBefore,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ReminderKind::DayBefore => "24h",
            ReminderKind::MorningOf => "morning",
            ReminderKind::HourBefore => "1h",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderFlags {
    pub day_before: bool,
    pub morning_of: bool,
    pub hour_before: bool,
}

impl ReminderFlags {
    pub fn is_sent(&self, kind: ReminderKind) -> bool {
        match kind {
            ReminderKind::DayBefore => self.day_before,
            ReminderKind::MorningOf => self.morning_of,
            ReminderKind::HourBefore => self.hour_before,
        }
    }

    pub fn mark(&mut self, kind: ReminderKind) {
        match kind {
            ReminderKind::DayBefore => self.day_before = true,
            ReminderKind::MorningOf => self.morning_of = true,
            ReminderKind::HourBefore => self.hour_before = true,
        }
    }

    /// Flags only ever go false → true.
    pub fn merged(self, other: ReminderFlags) -> ReminderFlags {
        ReminderFlags {
            day_before: self.day_before || other.day_before,
            morning_of: self.morning_of || other.morning_of,
            hour_before: self.hour_before || other.hour_before,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub contact: Contact,
    pub details: BookingDetails,
    pub start_time: Ms,
    pub end_time: Ms,
    pub status: BookingStatus,
    /// Set once, when the calendar event is created.
    pub external_event_ref: Option<String>,
    pub reminders: ReminderFlags,
    pub created_at: Ms,
}

impl Booking {
    pub fn span(&self) -> Span {
        Span::new(self.start_time, self.end_time)
    }

    pub fn is_active(&self) -> bool {
        self.status != BookingStatus::Cancelled
    }
}

/// A call that was logged by the voice front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallLog {
    pub id: Ulid,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub details: BookingDetails,
    pub resulted_in_meeting: bool,
    pub disqualification_reason: Option<String>,
    pub call_duration_secs: Option<u32>,
    pub logged_at: Ms,
}

/// Booking log records, flat with no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    BookingCreated(Booking),
    BookingUpdated(Booking),
    ReminderSent { id: Ulid, kind: ReminderKind },
    CallLogged(CallLog),
}
