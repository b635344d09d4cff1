use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, Zone};
use crate::model::*;
use crate::notify::{self, Notifier};
use crate::store::BookingStore;

/// Local hour during which morning-of reminders go out.
pub const MORNING_HOUR: u32 = 8;

/// Narrowest reminder window; the sweep must run at least this often.
pub const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sent: usize,
    pub skipped_no_phone: usize,
    pub failed: usize,
}

/// Finds confirmed bookings crossing a reminder threshold and texts them once.
pub struct ReminderScheduler {
    store: Arc<dyn BookingStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    zone: Zone,
    country_code: String,
}

impl ReminderScheduler {
    pub fn new(
        store: Arc<dyn BookingStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        zone: Zone,
        country_code: String,
    ) -> Self {
        Self {
            store,
            notifier,
            clock,
            zone,
            country_code,
        }
    }

    /// Start-time window for `kind` at `now`. The morning window only
    /// exists during `MORNING_HOUR`.
    pub fn window(&self, kind: ReminderKind, now: Ms) -> Option<Span> {
        match kind {
            ReminderKind::DayBefore => Some(Span::new(now + 24 * HOUR_MS, now + 25 * HOUR_MS)),
            ReminderKind::HourBefore => Some(Span::new(now + HOUR_MS, now + 90 * MINUTE_MS)),
            ReminderKind::MorningOf => {
                if self.zone.local_hour(now)? != MORNING_HOUR {
                    return None;
                }
                self.zone.day_span(self.zone.local_date(now)?)
            }
        }
    }

    pub async fn sweep(&self) -> SweepReport {
        let started = Instant::now();
        let now = self.clock.now_ms();
        let mut report = SweepReport::default();
        for kind in ReminderKind::ALL {
            let Some(window) = self.window(kind, now) else {
                debug!("{} reminders: outside window", kind.label());
                continue;
            };
            let due = match self
                .store
                .query_by_status_and_window(BookingStatus::Confirmed, kind, window)
                .await
            {
                Ok(due) => due,
                Err(e) => {
                    error!("{} reminders: query failed: {e}", kind.label());
                    continue;
                }
            };
            for booking in &due {
                self.remind(booking, kind, &mut report).await;
            }
        }
        metrics::histogram!(crate::observability::REMINDER_SWEEP_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        report
    }

    async fn remind(&self, booking: &Booking, kind: ReminderKind, report: &mut SweepReport) {
        let outcome = match notify::reminder_sms(booking, kind, &self.zone, &self.country_code) {
            None => {
                debug!("booking {} has no phone; marking {} reminder done", booking.id, kind.label());
                report.skipped_no_phone += 1;
                "no_phone"
            }
            Some(sms) => {
                if self.notifier.send_sms(&sms).await {
                    info!("sent {} reminder for booking {}", kind.label(), booking.id);
                    report.sent += 1;
                    "sent"
                } else {
                    warn!("{} reminder for booking {} failed; will retry", kind.label(), booking.id);
                    report.failed += 1;
                    metrics::counter!(crate::observability::REMINDERS_TOTAL, "threshold" => kind.label(), "outcome" => "failed")
                        .increment(1);
                    return;
                }
            }
        };
        metrics::counter!(crate::observability::REMINDERS_TOTAL, "threshold" => kind.label(), "outcome" => outcome)
            .increment(1);
        if let Err(e) = self.store.mark_reminder_sent(booking.id, kind).await {
            // Flag stays clear, so the next sweep may text this booking again.
            error!("could not record {} reminder for booking {}: {e}", kind.label(), booking.id);
        }
    }
}

/// Background task that sweeps reminders every `every` until `shutdown` fires.
pub async fn run_reminders(scheduler: Arc<ReminderScheduler>, every: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.cancelled() => {
                debug!("reminder sweep stopped");
                return;
            }
        }
        let report = scheduler.sweep().await;
        if report != SweepReport::default() {
            info!(
                "reminder sweep: {} sent, {} without phone, {} failed",
                report.sent, report.skipped_no_phone, report.failed
            );
        }
    }
}
