use std::future::Future;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{error, info, warn};
use ulid::Ulid;

use crate::calendar::{CalendarError, EventMetadata};
use crate::model::*;
use crate::notify;

use super::conflict::{parse_start, validate_contact, validate_start};
use super::{
    BookingError, BookingRequest, BookingService, CallLogRequest, CancelRequest, RescheduleRequest,
};

/// Result of following a confirmation link.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmOutcome {
    Confirmed(Booking),
    /// The link was already used; nothing changed.
    AlreadyConfirmed(Booking),
}

impl ConfirmOutcome {
    pub fn booking(&self) -> &Booking {
        match self {
            ConfirmOutcome::Confirmed(b) | ConfirmOutcome::AlreadyConfirmed(b) => b,
        }
    }
}

/// How a new booking becomes confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingMode {
    /// Held as pending until the contact follows the emailed link.
    #[default]
    Deferred,
    /// Confirmed and mirrored to the calendar on the spot.
    Immediate,
}

/// A committed booking and what happened to its notifications.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingReceipt {
    pub booking: Booking,
    pub email_sent: bool,
    /// `None` when the contact has no phone number.
    pub sms_sent: Option<bool>,
}

fn record_outcome<T>(operation: &'static str, result: &Result<T, BookingError>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(e) => {
            if e.is_user_error() {
                warn!("{operation} rejected: {e}");
            } else {
                error!("{operation} failed: {e}");
            }
            crate::observability::error_label(e)
        }
    };
    metrics::counter!(
        crate::observability::BOOKING_OPERATIONS_TOTAL,
        "operation" => operation,
        "outcome" => outcome
    )
    .increment(1);
}

/// Run one mutation as its own task so it commits even if the caller is
/// dropped mid-way (a request timeout, a closed connection). The outcome is
/// recorded inside the task.
async fn run_to_completion<T, F>(operation: &'static str, work: F) -> Result<T, BookingError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, BookingError>> + Send + 'static,
{
    let task = tokio::spawn(async move {
        let result = work.await;
        record_outcome(operation, &result);
        result
    });
    match task.await {
        Ok(result) => result,
        Err(e) => {
            error!("{operation} task did not finish: {e}");
            Err(BookingError::Internal(format!("{operation} aborted")))
        }
    }
}

fn event_metadata(booking: &Booking) -> EventMetadata {
    let details = &booking.details;
    let mut description = format!("Booking {}\nContact: {}", booking.id, booking.contact.email);
    if let Some(phone) = &booking.contact.phone {
        description.push_str(&format!("\nPhone: {phone}"));
    }
    if let Some(company) = &details.company_name {
        description.push_str(&format!("\nCompany: {company}"));
    }
    if let Some(goal) = &details.goal {
        description.push_str(&format!("\nGoal: {goal}"));
    }
    if let Some(budget) = details.monthly_budget {
        description.push_str(&format!("\nMonthly budget: {budget:.0}"));
    }
    EventMetadata {
        summary: format!("Call with {}", booking.contact.name),
        description,
        contact_email: booking.contact.email.clone(),
    }
}

impl BookingService {
    /// Checks shared by both creation modes, in order: start time parses,
    /// is not in the past, is not today; contact is valid.
    fn validate_request(&self, req: &BookingRequest, contact: &Contact) -> Result<Span, BookingError> {
        let zone = &self.settings.zone;
        let start = parse_start(zone, &req.start_time)?;
        validate_start(zone, self.clock.now_ms(), start)?;
        let span = Span::try_new(start, start + self.settings.slot_ms())
            .ok_or_else(|| BookingError::Validation("appointment length must be positive".into()))?;
        validate_contact(contact)?;
        Ok(span)
    }

    fn new_booking(
        &self,
        contact: Contact,
        details: BookingDetails,
        span: Span,
        status: BookingStatus,
        external_event_ref: Option<String>,
    ) -> Booking {
        Booking {
            id: Ulid::new(),
            contact,
            details,
            start_time: span.start,
            end_time: span.end,
            status,
            external_event_ref,
            reminders: ReminderFlags::default(),
            created_at: self.clock.now_ms(),
        }
    }

    async fn send_email(&self, built: Result<notify::EmailMessage, tera::Error>) -> bool {
        let msg = match built {
            Ok(msg) => msg,
            Err(e) => {
                error!("cannot render email: {e}");
                metrics::counter!(
                    crate::observability::NOTIFICATIONS_TOTAL,
                    "channel" => "email",
                    "outcome" => "render_failed"
                )
                .increment(1);
                return false;
            }
        };
        let ok = self.notifier.send_email(&msg).await;
        let outcome = if ok { "sent" } else { "failed" };
        metrics::counter!(crate::observability::NOTIFICATIONS_TOTAL, "channel" => "email", "outcome" => outcome)
            .increment(1);
        if !ok {
            warn!("email to {} failed: {}", msg.to, msg.subject);
        }
        ok
    }

    async fn send_sms(&self, msg: &notify::SmsMessage) -> bool {
        let ok = self.notifier.send_sms(msg).await;
        let outcome = if ok { "sent" } else { "failed" };
        metrics::counter!(crate::observability::NOTIFICATIONS_TOTAL, "channel" => "sms", "outcome" => outcome)
            .increment(1);
        if !ok {
            warn!("sms to {} failed", msg.to);
        }
        ok
    }

    async fn notify_confirmed(&self, booking: &Booking) -> (bool, Option<bool>) {
        let zone = &self.settings.zone;
        let email_sent = self
            .send_email(notify::booking_confirmed_email(booking, zone))
            .await;
        let sms_sent = match notify::booking_confirmed_sms(booking, zone, &self.settings.default_country_code) {
            Some(sms) => Some(self.send_sms(&sms).await),
            None => None,
        };
        (email_sent, sms_sent)
    }

    // ── Deferred mode ────────────────────────────────────

    /// Reserve a slot pending email confirmation.
    pub async fn create_pending(self: &Arc<Self>, req: BookingRequest) -> Result<Booking, BookingError> {
        self.create_pending_receipt(req).await.map(|r| r.booking)
    }

    async fn create_pending_receipt(self: &Arc<Self>, req: BookingRequest) -> Result<BookingReceipt, BookingError> {
        let svc = Arc::clone(self);
        run_to_completion("create_pending", async move { svc.create_pending_inner(req).await }).await
    }

    async fn create_pending_inner(&self, req: BookingRequest) -> Result<BookingReceipt, BookingError> {
        let contact = req.contact.normalized();
        let identity = req.conversation_id.clone().unwrap_or_else(|| contact.email.clone());
        let _guard = self.locks.acquire(&identity).await;

        let span = self.validate_request(&req, &contact)?;
        if let (Some(minimum), Some(budget)) =
            (self.settings.min_monthly_budget, req.details.monthly_budget)
            && budget < minimum
        {
            return Err(BookingError::BelowMinimumBudget { budget, minimum });
        }
        self.check_no_conflict(&span, None).await?;

        let booking = self.new_booking(
            contact,
            req.details,
            span,
            BookingStatus::PendingConfirmation,
            None,
        );
        self.store.insert(booking.clone()).await?;
        info!(
            "booking {} pending confirmation for {} at {}",
            booking.id,
            booking.contact.email,
            self.settings.zone.format_rfc3339(booking.start_time)
        );

        let email = notify::confirmation_request_email(
            &booking,
            &self.settings.zone,
            &self.settings.confirm_url(booking.id),
        );
        let email_sent = self.send_email(email).await;
        Ok(BookingReceipt {
            booking,
            email_sent,
            sms_sent: None,
        })
    }

    /// Confirm a pending booking. Following the same link twice is harmless.
    pub async fn confirm_booking(self: &Arc<Self>, id: Ulid) -> Result<ConfirmOutcome, BookingError> {
        let svc = Arc::clone(self);
        run_to_completion("confirm", async move { svc.confirm_booking_inner(id).await }).await
    }

    async fn confirm_booking_inner(&self, id: Ulid) -> Result<ConfirmOutcome, BookingError> {
        let _by_id = self.locks.acquire(&id.to_string()).await;
        let email = match self.store.get(id).await? {
            Some(b) => b.contact.email,
            None => return Err(BookingError::NotFound),
        };
        // Cancel and reschedule lock by email; re-read under that lock too.
        let _by_contact = self.locks.acquire(&email).await;
        let mut booking = self.store.get(id).await?.ok_or(BookingError::NotFound)?;

        match booking.status {
            BookingStatus::Confirmed => return Ok(ConfirmOutcome::AlreadyConfirmed(booking)),
            BookingStatus::Cancelled => return Err(BookingError::Cancelled(id)),
            BookingStatus::PendingConfirmation => {}
        }
        if booking.start_time < self.clock.now_ms() {
            return Err(BookingError::PastDate);
        }

        let event_ref = self
            .calendar
            .create_event(booking.span(), &event_metadata(&booking))
            .await?;
        booking.external_event_ref = Some(event_ref.clone());
        booking.status = BookingStatus::Confirmed;
        let booking = match self.store.update(booking).await {
            Ok(b) => b,
            Err(e) => {
                self.compensate_event(&event_ref).await;
                return Err(e.into());
            }
        };
        info!("booking {id} confirmed, calendar event {event_ref}");

        self.notify_confirmed(&booking).await;
        Ok(ConfirmOutcome::Confirmed(booking))
    }

    async fn compensate_event(&self, event_ref: &str) {
        if let Err(e) = self.calendar.delete_event(event_ref).await {
            error!("could not remove orphaned calendar event {event_ref}: {e}");
        }
    }

    // ── Immediate mode ───────────────────────────────────

    /// Create a booking in either mode. For deferred bookings `email_sent`
    /// reports the confirmation request.
    pub async fn create_booking(
        self: &Arc<Self>,
        req: BookingRequest,
        mode: BookingMode,
    ) -> Result<BookingReceipt, BookingError> {
        match mode {
            BookingMode::Immediate => self.book_immediately(req).await,
            BookingMode::Deferred => self.create_pending_receipt(req).await,
        }
    }

    /// Book and confirm in one step, mirroring the event to the calendar first.
    pub async fn book_immediately(self: &Arc<Self>, req: BookingRequest) -> Result<BookingReceipt, BookingError> {
        let svc = Arc::clone(self);
        run_to_completion("book_immediately", async move { svc.book_immediately_inner(req).await }).await
    }

    async fn book_immediately_inner(&self, req: BookingRequest) -> Result<BookingReceipt, BookingError> {
        let contact = req.contact.normalized();
        let identity = req.conversation_id.clone().unwrap_or_else(|| contact.email.clone());
        let _guard = self.locks.acquire(&identity).await;

        let span = self.validate_request(&req, &contact)?;
        self.check_no_conflict(&span, None).await?;

        let mut booking = self.new_booking(contact, req.details, span, BookingStatus::Confirmed, None);
        let event_ref = self
            .calendar
            .create_event(span, &event_metadata(&booking))
            .await?;
        booking.external_event_ref = Some(event_ref.clone());
        if let Err(e) = self.store.insert(booking.clone()).await {
            self.compensate_event(&event_ref).await;
            return Err(e.into());
        }
        info!(
            "booking {} confirmed immediately for {} at {}",
            booking.id,
            booking.contact.email,
            self.settings.zone.format_rfc3339(booking.start_time)
        );

        let call = CallLog {
            id: Ulid::new(),
            name: Some(booking.contact.name.clone()),
            email: Some(booking.contact.email.clone()),
            phone: booking.contact.phone.clone(),
            details: booking.details.clone(),
            resulted_in_meeting: true,
            disqualification_reason: None,
            call_duration_secs: req.call_duration_secs,
            logged_at: self.clock.now_ms(),
        };
        if let Err(e) = self.store.log_call(call).await {
            warn!("booking {} committed but call log failed: {e}", booking.id);
        }

        let (email_sent, sms_sent) = self.notify_confirmed(&booking).await;
        Ok(BookingReceipt {
            booking,
            email_sent,
            sms_sent,
        })
    }

    // ── Changes to an existing booking ───────────────────

    /// Cancel a booking. The record is written first; removing the calendar
    /// event afterwards is best-effort.
    pub async fn cancel_booking(self: &Arc<Self>, req: CancelRequest) -> Result<Booking, BookingError> {
        let svc = Arc::clone(self);
        run_to_completion("cancel", async move { svc.cancel_booking_inner(req).await }).await
    }

    async fn cancel_booking_inner(&self, req: CancelRequest) -> Result<Booking, BookingError> {
        let email = normalize_email(&req.email);
        let _guard = self.locks.acquire(&email).await;

        let original = parse_start(&self.settings.zone, &req.original_start_time)?;
        let mut booking = self
            .store
            .find_by_contact_and_time(&email, original)
            .await?
            .ok_or(BookingError::NotFound)?;

        booking.status = BookingStatus::Cancelled;
        let booking = self.store.update(booking).await?;
        info!("booking {} cancelled", booking.id);

        if let Some(event_ref) = &booking.external_event_ref {
            match self.calendar.delete_event(event_ref).await {
                Ok(()) => {}
                Err(CalendarError::NotFound(_)) => {
                    warn!("calendar event {event_ref} for booking {} was already gone", booking.id);
                }
                Err(e) => {
                    error!(
                        "booking {} cancelled but calendar event {event_ref} could not be removed: {e}",
                        booking.id
                    );
                }
            }
        }
        Ok(booking)
    }

    /// Move a booking, re-checking the new time exactly like a new booking.
    pub async fn reschedule_booking(self: &Arc<Self>, req: RescheduleRequest) -> Result<Booking, BookingError> {
        let svc = Arc::clone(self);
        run_to_completion("reschedule", async move { svc.reschedule_booking_inner(req).await }).await
    }

    async fn reschedule_booking_inner(&self, req: RescheduleRequest) -> Result<Booking, BookingError> {
        let email = normalize_email(&req.email);
        let _guard = self.locks.acquire(&email).await;

        let zone = &self.settings.zone;
        let original = parse_start(zone, &req.original_start_time)?;
        let new_start = parse_start(zone, &req.new_start_time)?;
        let mut booking = self
            .store
            .find_by_contact_and_time(&email, original)
            .await?
            .ok_or(BookingError::NotFound)?;

        validate_start(zone, self.clock.now_ms(), new_start)?;
        let span = Span::try_new(new_start, new_start + self.settings.slot_ms())
            .ok_or_else(|| BookingError::Validation("appointment length must be positive".into()))?;
        self.check_no_conflict(&span, Some(&booking)).await?;

        let original_span = booking.span();
        let mut moved_event = None;
        if let Some(event_ref) = &booking.external_event_ref {
            match self.calendar.update_event(event_ref, span).await {
                Ok(()) => moved_event = Some(event_ref.clone()),
                Err(CalendarError::NotFound(_)) => {
                    warn!("calendar event {event_ref} for booking {} is missing; moving booking only", booking.id);
                }
                Err(e) => return Err(e.into()),
            }
        }
        booking.start_time = span.start;
        booking.end_time = span.end;
        let booking = match self.store.update(booking).await {
            Ok(b) => b,
            Err(e) => {
                if let Some(event_ref) = moved_event
                    && let Err(undo) = self.calendar.update_event(&event_ref, original_span).await
                {
                    error!("could not move calendar event {event_ref} back after failed reschedule: {undo}");
                }
                return Err(e.into());
            }
        };
        info!(
            "booking {} moved to {}",
            booking.id,
            zone.format_rfc3339(booking.start_time)
        );
        Ok(booking)
    }

    // ── Call log ─────────────────────────────────────────

    pub async fn log_call(self: &Arc<Self>, req: CallLogRequest) -> Result<CallLog, BookingError> {
        let svc = Arc::clone(self);
        run_to_completion("log_call", async move { svc.log_call_inner(req).await }).await
    }

    async fn log_call_inner(&self, req: CallLogRequest) -> Result<CallLog, BookingError> {
        let blank_to_none = |s: Option<String>| s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let call = CallLog {
            id: Ulid::new(),
            name: blank_to_none(req.name),
            email: blank_to_none(req.email).map(|e| normalize_email(&e)),
            phone: blank_to_none(req.phone)
                .map(|p| notify::normalize_phone(&p, &self.settings.default_country_code)),
            details: req.details,
            resulted_in_meeting: req.resulted_in_meeting,
            disqualification_reason: blank_to_none(req.disqualification_reason),
            call_duration_secs: req.call_duration_secs,
            logged_at: self.clock.now_ms(),
        };
        self.store.log_call(call.clone()).await?;
        info!(
            "call {} logged (meeting: {}, reason: {})",
            call.id,
            call.resulted_in_meeting,
            call.disqualification_reason.as_deref().unwrap_or("-")
        );
        Ok(call)
    }
}
