use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike};
use chrono_tz::Tz;

use crate::model::{Ms, Span};

/// Source of "now" for validation and the reminder sweep.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> Ms;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Ms {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: Ms) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: Ms) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Ms) {
        self.now.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Ms {
        self.now.load(Ordering::SeqCst)
    }
}

/// The fixed IANA timezone all calendar-day arithmetic happens in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Zone(Tz);

impl Zone {
    pub fn new(tz: Tz) -> Self {
        Self(tz)
    }

    pub fn parse(name: &str) -> Result<Self, String> {
        name.parse::<Tz>()
            .map(Self)
            .map_err(|e| format!("unknown timezone {name:?}: {e}"))
    }

    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    fn local(&self, t: Ms) -> Option<DateTime<Tz>> {
        DateTime::from_timestamp_millis(t).map(|utc| utc.with_timezone(&self.0))
    }

    /// Resolve a local wall-clock time. Ambiguous times take the earlier
    /// instant; times inside a DST gap move forward by an hour.
    fn resolve(&self, naive: NaiveDateTime) -> Option<Ms> {
        self.0
            .from_local_datetime(&naive)
            .earliest()
            .or_else(|| {
                self.0
                    .from_local_datetime(&(naive + Duration::hours(1)))
                    .earliest()
            })
            .map(|dt| dt.timestamp_millis())
    }

    pub fn local_date(&self, t: Ms) -> Option<NaiveDate> {
        self.local(t).map(|dt| dt.date_naive())
    }

    pub fn local_hour(&self, t: Ms) -> Option<u32> {
        self.local(t).map(|dt| dt.hour())
    }

    pub fn same_day(&self, a: Ms, b: Ms) -> bool {
        match (self.local_date(a), self.local_date(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }

    /// `hour:00` local time on `date`.
    pub fn at_hour(&self, date: NaiveDate, hour: u32) -> Option<Ms> {
        let time = NaiveTime::from_hms_opt(hour, 0, 0)?;
        self.resolve(date.and_time(time))
    }

    /// `[local midnight, next local midnight)` for `date`.
    pub fn day_span(&self, date: NaiveDate) -> Option<Span> {
        let start = self.resolve(date.and_time(NaiveTime::MIN))?;
        let end = self.resolve(date.succ_opt()?.and_time(NaiveTime::MIN))?;
        Span::try_new(start, end)
    }

    /// Strict ISO calendar date, `YYYY-MM-DD`.
    pub fn parse_date(&self, s: &str) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
    }

    /// RFC 3339 with an offset, or a naive local `YYYY-MM-DDTHH:MM[:SS]`
    /// (a space separator is accepted too) interpreted in this zone.
    pub fn parse_instant(&self, s: &str) -> Option<Ms> {
        let s = s.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.timestamp_millis());
        }
        const NAIVE_FORMATS: [&str; 4] = [
            "%Y-%m-%dT%H:%M:%S",
            "%Y-%m-%dT%H:%M",
            "%Y-%m-%d %H:%M:%S",
            "%Y-%m-%d %H:%M",
        ];
        NAIVE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
            .and_then(|naive| self.resolve(naive))
    }

    /// RFC 3339 in this zone, e.g. `2026-10-20T09:00:00+02:00`.
    pub fn format_rfc3339(&self, t: Ms) -> String {
        self.local(t)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| t.to_string())
    }

    /// e.g. `Tuesday, October 20 at 9:00 AM SAST`.
    pub fn format_human(&self, t: Ms) -> String {
        self.local(t)
            .map(|dt| dt.format("%A, %B %-d at %-I:%M %p %Z").to_string())
            .unwrap_or_else(|| "the scheduled time".to_string())
    }

    /// e.g. `9:00 AM`.
    pub fn format_time(&self, t: Ms) -> String {
        self.local(t)
            .map(|dt| dt.format("%-I:%M %p").to_string())
            .unwrap_or_else(|| "the scheduled time".to_string())
    }
}
