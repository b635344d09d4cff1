use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ulid::Ulid;

use super::*;
use crate::calendar::{BusyInterval, CalendarError, EventMetadata, LocalCalendar};
use crate::clock::ManualClock;
use crate::notify::{EmailMessage, SmsMessage};
use crate::store::{StoreError, WalStore};

const H: Ms = HOUR_MS;
const M: Ms = MINUTE_MS;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("appointd_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn sast() -> Zone {
    Zone::parse("Africa/Johannesburg").unwrap()
}

fn at(local: &str) -> Ms {
    sast().parse_instant(local).unwrap()
}

// ── Fakes ────────────────────────────────────────────────

#[derive(Default)]
struct RecordingNotifier {
    emails: Mutex<Vec<EmailMessage>>,
    sms: Mutex<Vec<SmsMessage>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    fn emails(&self) -> Vec<EmailMessage> {
        self.emails.lock().unwrap().clone()
    }

    fn sms(&self) -> Vec<SmsMessage> {
        self.sms.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_email(&self, msg: &EmailMessage) -> bool {
        if self.fail.load(Ordering::SeqCst) {
            return false;
        }
        self.emails.lock().unwrap().push(msg.clone());
        true
    }

    async fn send_sms(&self, msg: &SmsMessage) -> bool {
        if self.fail.load(Ordering::SeqCst) {
            return false;
        }
        self.sms.lock().unwrap().push(msg.clone());
        true
    }
}

struct DownCalendar;

#[async_trait]
impl CalendarSource for DownCalendar {
    async fn list_busy(&self, _window: Span) -> Result<Vec<BusyInterval>, CalendarError> {
        Err(CalendarError::Unavailable("connection refused".into()))
    }

    async fn create_event(&self, _span: Span, _m: &EventMetadata) -> Result<String, CalendarError> {
        Err(CalendarError::Unavailable("connection refused".into()))
    }

    async fn update_event(&self, _r: &str, _span: Span) -> Result<(), CalendarError> {
        Err(CalendarError::Unavailable("connection refused".into()))
    }

    async fn delete_event(&self, _r: &str) -> Result<(), CalendarError> {
        Err(CalendarError::Unavailable("connection refused".into()))
    }
}

/// Reads succeed and find nothing; every write fails.
struct ReadOnlyStore;

fn disk_full() -> StoreError {
    StoreError::Io(std::io::Error::other("disk full"))
}

#[async_trait]
impl BookingStore for ReadOnlyStore {
    async fn insert(&self, _b: Booking) -> Result<(), StoreError> {
        Err(disk_full())
    }
    async fn get(&self, _id: Ulid) -> Result<Option<Booking>, StoreError> {
        Ok(None)
    }
    async fn find_by_contact_and_time(&self, _e: &str, _s: Ms) -> Result<Option<Booking>, StoreError> {
        Ok(None)
    }
    async fn update(&self, _b: Booking) -> Result<Booking, StoreError> {
        Err(disk_full())
    }
    async fn query_by_status_and_window(
        &self,
        _s: BookingStatus,
        _k: ReminderKind,
        _w: Span,
    ) -> Result<Vec<Booking>, StoreError> {
        Ok(Vec::new())
    }
    async fn list_active_in(&self, _w: Span) -> Result<Vec<Booking>, StoreError> {
        Ok(Vec::new())
    }
    async fn mark_reminder_sent(&self, _id: Ulid, _k: ReminderKind) -> Result<(), StoreError> {
        Err(disk_full())
    }
    async fn log_call(&self, _c: CallLog) -> Result<(), StoreError> {
        Err(disk_full())
    }
}

/// A real store whose updates can be slowed down or switched off.
struct FlakyStore {
    inner: Arc<WalStore>,
    update_delay: Duration,
    fail_updates: AtomicBool,
}

#[async_trait]
impl BookingStore for FlakyStore {
    async fn insert(&self, b: Booking) -> Result<(), StoreError> {
        self.inner.insert(b).await
    }
    async fn get(&self, id: Ulid) -> Result<Option<Booking>, StoreError> {
        self.inner.get(id).await
    }
    async fn find_by_contact_and_time(&self, e: &str, s: Ms) -> Result<Option<Booking>, StoreError> {
        self.inner.find_by_contact_and_time(e, s).await
    }
    async fn update(&self, b: Booking) -> Result<Booking, StoreError> {
        tokio::time::sleep(self.update_delay).await;
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(disk_full());
        }
        self.inner.update(b).await
    }
    async fn query_by_status_and_window(
        &self,
        s: BookingStatus,
        k: ReminderKind,
        w: Span,
    ) -> Result<Vec<Booking>, StoreError> {
        self.inner.query_by_status_and_window(s, k, w).await
    }
    async fn list_active_in(&self, w: Span) -> Result<Vec<Booking>, StoreError> {
        self.inner.list_active_in(w).await
    }
    async fn mark_reminder_sent(&self, id: Ulid, k: ReminderKind) -> Result<(), StoreError> {
        self.inner.mark_reminder_sent(id, k).await
    }
    async fn log_call(&self, c: CallLog) -> Result<(), StoreError> {
        self.inner.log_call(c).await
    }
}

// ── Harness ──────────────────────────────────────────────

fn settings() -> BookingSettings {
    BookingSettings {
        zone: sast(),
        hours: BusinessHours::new(9, 17).unwrap(),
        slot_minutes: 60,
        public_url: "https://book.example.com".into(),
        min_monthly_budget: Some(5000.0),
        default_country_code: "27".into(),
        max_identity_locks: 64,
    }
}

struct Harness {
    svc: Arc<BookingService>,
    store: Arc<WalStore>,
    calendar: Arc<LocalCalendar>,
    notifier: Arc<RecordingNotifier>,
    clock: Arc<ManualClock>,
}

/// Service at Monday 2026-10-19 10:00 SAST.
fn harness(name: &str) -> Harness {
    build_harness(name, |store| store as Arc<dyn BookingStore>)
}

/// Same as `harness`, but the service writes through a `FlakyStore`.
fn flaky_harness(name: &str, update_delay: Duration) -> (Harness, Arc<FlakyStore>) {
    let mut flaky = None;
    let h = build_harness(name, |store| {
        let wrapped = Arc::new(FlakyStore {
            inner: store,
            update_delay,
            fail_updates: AtomicBool::new(false),
        });
        flaky = Some(wrapped.clone());
        wrapped as Arc<dyn BookingStore>
    });
    (h, flaky.unwrap())
}

fn build_harness(
    name: &str,
    service_store: impl FnOnce(Arc<WalStore>) -> Arc<dyn BookingStore>,
) -> Harness {
    let store = Arc::new(WalStore::open(&test_wal_path(&format!("{name}.bookings.wal"))).unwrap());
    let calendar =
        Arc::new(LocalCalendar::open(&test_wal_path(&format!("{name}.calendar.wal"))).unwrap());
    let notifier = Arc::new(RecordingNotifier::default());
    let clock = Arc::new(ManualClock::new(at("2026-10-19T10:00")));
    let svc = Arc::new(BookingService::new(
        calendar.clone(),
        service_store(store.clone()),
        notifier.clone(),
        clock.clone(),
        settings(),
    ));
    Harness {
        svc,
        store,
        calendar,
        notifier,
        clock,
    }
}

fn request(email: &str, start: &str) -> BookingRequest {
    BookingRequest {
        contact: Contact {
            name: "Zanele Ndlovu".into(),
            email: email.into(),
            phone: Some("082 555 0101".into()),
        },
        start_time: start.into(),
        details: BookingDetails {
            company_name: Some("Ndlovu Plumbing".into()),
            goal: Some("More leads".into()),
            monthly_budget: Some(8000.0),
        },
        conversation_id: None,
        call_duration_secs: None,
    }
}

async fn calendar_events(h: &Harness) -> usize {
    h.calendar.event_count().await
}

// ── Creation: time validation ────────────────────────────

#[tokio::test]
async fn create_one_minute_ago_is_past_date() {
    let h = harness("past");
    let start = sast().format_rfc3339(h.clock.now_ms() - M);
    let err = h.svc.create_pending(request("z@example.com", &start)).await.unwrap_err();
    assert!(matches!(err, BookingError::PastDate), "{err:?}");
}

#[tokio::test]
async fn create_later_today_is_same_day() {
    let h = harness("same_day");
    let err = h
        .svc
        .create_pending(request("z@example.com", "2026-10-19T15:00"))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::SameDay));
    let err = h
        .svc
        .book_immediately(request("z@example.com", "2026-10-19T15:00"))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::SameDay));
}

#[tokio::test]
async fn time_checks_run_before_contact_checks() {
    let h = harness("order");
    let mut req = request("not-an-email", "2026-10-19T09:00");
    let err = h.svc.create_pending(req.clone()).await.unwrap_err();
    assert!(matches!(err, BookingError::PastDate));

    req.start_time = "2026-10-20T09:00".into();
    let err = h.svc.create_pending(req.clone()).await.unwrap_err();
    assert!(matches!(err, BookingError::Validation(_)));

    req.start_time = "tomorrow at nine".into();
    let err = h.svc.create_pending(req).await.unwrap_err();
    assert!(matches!(err, BookingError::Validation(_)));
}

// ── Deferred mode ────────────────────────────────────────

#[tokio::test]
async fn create_tomorrow_is_pending_without_event() {
    let h = harness("pending");
    let booking = h
        .svc
        .create_pending(request(" Zanele@Example.com ", "2026-10-20T10:00"))
        .await
        .unwrap();

    assert_eq!(booking.status, BookingStatus::PendingConfirmation);
    assert_eq!(booking.contact.email, "zanele@example.com");
    assert_eq!(booking.start_time, at("2026-10-20T10:00"));
    assert_eq!(booking.end_time - booking.start_time, H);
    assert!(booking.external_event_ref.is_none());
    assert_eq!(calendar_events(&h).await, 0);

    let emails = h.notifier.emails();
    assert_eq!(emails.len(), 1);
    // tera escapes the slashes inside the href
    let link = format!("book.example.com&#x2F;bookings&#x2F;{}&#x2F;confirm", booking.id);
    assert!(emails[0].html_body.contains(&link), "{}", emails[0].html_body);
    assert!(h.notifier.sms().is_empty());
}

#[tokio::test]
async fn create_booking_dispatches_on_mode() {
    let h = harness("modes");
    let deferred = h
        .svc
        .create_booking(request("a@example.com", "2026-10-20T10:00"), BookingMode::Deferred)
        .await
        .unwrap();
    assert_eq!(deferred.booking.status, BookingStatus::PendingConfirmation);
    assert!(deferred.email_sent);
    assert_eq!(deferred.sms_sent, None);
    assert_eq!(calendar_events(&h).await, 0);

    let immediate = h
        .svc
        .create_booking(request("b@example.com", "2026-10-20T11:00"), BookingMode::Immediate)
        .await
        .unwrap();
    assert_eq!(immediate.booking.status, BookingStatus::Confirmed);
    assert_eq!(immediate.sms_sent, Some(true));
    assert_eq!(calendar_events(&h).await, 1);
}

#[tokio::test]
async fn pending_booking_holds_its_slot() {
    let h = harness("pending_busy");
    h.svc
        .create_pending(request("a@example.com", "2026-10-20T10:00"))
        .await
        .unwrap();

    let slots = h.svc.available_slots("2026-10-20").await;
    assert_eq!(slots.len(), 7);
    assert!(slots.iter().all(|s| s.start != at("2026-10-20T10:00")));

    let err = h
        .svc
        .create_pending(request("b@example.com", "2026-10-20T10:00"))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::Overlap));
}

#[tokio::test]
async fn confirm_twice_creates_one_event() {
    let h = harness("confirm_twice");
    let booking = h
        .svc
        .create_pending(request("a@example.com", "2026-10-20T10:00"))
        .await
        .unwrap();

    let first = h.svc.confirm_booking(booking.id).await.unwrap();
    let ConfirmOutcome::Confirmed(confirmed) = &first else {
        panic!("expected Confirmed, got {first:?}");
    };
    assert_eq!(confirmed.status, BookingStatus::Confirmed);
    let event_ref = confirmed.external_event_ref.clone().unwrap();

    let second = h.svc.confirm_booking(booking.id).await.unwrap();
    assert!(matches!(second, ConfirmOutcome::AlreadyConfirmed(_)));
    assert_eq!(second.booking().external_event_ref.as_deref(), Some(event_ref.as_str()));

    assert_eq!(calendar_events(&h).await, 1);
    let event = h.calendar.event(&event_ref).await.unwrap();
    assert_eq!(event.metadata.contact_email, "a@example.com");
    assert!(event.metadata.description.contains("Ndlovu Plumbing"));
    // request email + confirmation email; one sms
    assert_eq!(h.notifier.emails().len(), 2);
    assert_eq!(h.notifier.sms().len(), 1);
    assert_eq!(h.notifier.sms()[0].to, "+27825550101");
}

#[tokio::test]
async fn confirm_unknown_or_cancelled() {
    let h = harness("confirm_errors");
    assert!(matches!(
        h.svc.confirm_booking(Ulid::new()).await,
        Err(BookingError::NotFound)
    ));

    let booking = h
        .svc
        .create_pending(request("a@example.com", "2026-10-20T10:00"))
        .await
        .unwrap();
    h.svc
        .cancel_booking(CancelRequest {
            email: "a@example.com".into(),
            original_start_time: "2026-10-20T10:00".into(),
        })
        .await
        .unwrap();
    assert!(matches!(
        h.svc.confirm_booking(booking.id).await,
        Err(BookingError::Cancelled(id)) if id == booking.id
    ));
    assert_eq!(calendar_events(&h).await, 0);
}

#[tokio::test]
async fn confirm_after_start_is_past_date() {
    let h = harness("confirm_late");
    let booking = h
        .svc
        .create_pending(request("a@example.com", "2026-10-20T10:00"))
        .await
        .unwrap();
    h.clock.set(at("2026-10-20T10:30"));
    assert!(matches!(
        h.svc.confirm_booking(booking.id).await,
        Err(BookingError::PastDate)
    ));
    assert_eq!(calendar_events(&h).await, 0);
}

#[tokio::test]
async fn confirm_commits_even_when_caller_gives_up() {
    let (h, _flaky) = flaky_harness("confirm_detached", Duration::from_millis(200));
    let booking = h
        .svc
        .create_pending(request("a@example.com", "2026-10-20T10:00"))
        .await
        .unwrap();

    let first = tokio::time::timeout(Duration::from_millis(50), h.svc.confirm_booking(booking.id)).await;
    assert!(first.is_err(), "update should still be sleeping");

    let second = h.svc.confirm_booking(booking.id).await.unwrap();
    assert!(matches!(second, ConfirmOutcome::AlreadyConfirmed(_)), "{second:?}");
    assert_eq!(calendar_events(&h).await, 1);
    let stored = h.store.get(booking.id).await.unwrap().unwrap();
    assert_eq!(stored.status, BookingStatus::Confirmed);
}

#[tokio::test]
async fn budget_minimum_applies_to_deferred_only() {
    let h = harness("budget");
    let mut req = request("a@example.com", "2026-10-20T10:00");
    req.details.monthly_budget = Some(1200.0);
    let err = h.svc.create_pending(req.clone()).await.unwrap_err();
    assert!(matches!(err, BookingError::BelowMinimumBudget { minimum, .. } if minimum == 5000.0));

    let receipt = h.svc.book_immediately(req).await.unwrap();
    assert_eq!(receipt.booking.status, BookingStatus::Confirmed);

    let mut unknown = request("b@example.com", "2026-10-20T12:00");
    unknown.details.monthly_budget = None;
    assert!(h.svc.create_pending(unknown).await.is_ok());
}

// ── Immediate mode ───────────────────────────────────────

#[tokio::test]
async fn immediate_booking_confirms_and_logs_call() {
    let h = harness("immediate");
    let mut req = request("a@example.com", "2026-10-20T14:00");
    req.call_duration_secs = Some(312);
    let receipt = h.svc.book_immediately(req).await.unwrap();

    assert_eq!(receipt.booking.status, BookingStatus::Confirmed);
    assert!(receipt.email_sent);
    assert_eq!(receipt.sms_sent, Some(true));
    let event_ref = receipt.booking.external_event_ref.clone().unwrap();
    assert_eq!(
        h.calendar.event(&event_ref).await.unwrap().span,
        Span::new(at("2026-10-20T14:00"), at("2026-10-20T15:00"))
    );

    let calls = h.store.call_logs();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].resulted_in_meeting);
    assert_eq!(calls[0].email.as_deref(), Some("a@example.com"));
    assert_eq!(calls[0].call_duration_secs, Some(312));
}

#[tokio::test]
async fn notification_failure_does_not_undo_booking() {
    let h = harness("notify_fail");
    h.notifier.fail.store(true, Ordering::SeqCst);
    let receipt = h
        .svc
        .book_immediately(request("a@example.com", "2026-10-20T14:00"))
        .await
        .unwrap();
    assert!(!receipt.email_sent);
    assert_eq!(receipt.sms_sent, Some(false));
    let stored = h.store.get(receipt.booking.id).await.unwrap().unwrap();
    assert_eq!(stored.status, BookingStatus::Confirmed);
}

#[tokio::test]
async fn no_phone_means_no_sms_attempt() {
    let h = harness("no_phone");
    let mut req = request("a@example.com", "2026-10-20T14:00");
    req.contact.phone = Some("  ".into());
    let receipt = h.svc.book_immediately(req).await.unwrap();
    assert_eq!(receipt.sms_sent, None);
    assert!(receipt.booking.contact.phone.is_none());
}

#[tokio::test]
async fn failed_store_write_removes_calendar_event() {
    let calendar = Arc::new(LocalCalendar::open(&test_wal_path("compensate.calendar.wal")).unwrap());
    let svc = Arc::new(BookingService::new(
        calendar.clone(),
        Arc::new(ReadOnlyStore),
        Arc::new(RecordingNotifier::default()),
        Arc::new(ManualClock::new(at("2026-10-19T10:00"))),
        settings(),
    ));
    let err = svc
        .book_immediately(request("a@example.com", "2026-10-20T14:00"))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::Internal(_)), "{err:?}");
    assert_eq!(calendar.event_count().await, 0);
}

#[tokio::test]
async fn calendar_busy_time_is_an_overlap() {
    let h = harness("calendar_busy");
    h.calendar
        .create_event(
            Span::new(at("2026-10-20T13:30"), at("2026-10-20T14:30")),
            &EventMetadata {
                summary: "Dentist".into(),
                description: String::new(),
                contact_email: String::new(),
            },
        )
        .await
        .unwrap();

    let err = h
        .svc
        .book_immediately(request("a@example.com", "2026-10-20T14:00"))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::Overlap));
    // touching the end of the busy block is fine
    assert!(h
        .svc
        .book_immediately(request("a@example.com", "2026-10-20T14:30"))
        .await
        .is_ok());
}

#[tokio::test]
async fn concurrent_requests_for_one_contact_book_once() {
    let h = harness("concurrent");
    let a = h.svc.clone();
    let b = h.svc.clone();
    let (r1, r2) = tokio::join!(
        a.book_immediately(request("a@example.com", "2026-10-20T11:00")),
        b.book_immediately(request("a@example.com", "2026-10-20T11:00")),
    );
    let ok = [r1.is_ok(), r2.is_ok()].iter().filter(|x| **x).count();
    assert_eq!(ok, 1);
    assert_eq!(calendar_events(&h).await, 1);
}

// ── Availability ─────────────────────────────────────────

#[tokio::test]
async fn availability_reflects_calendar_and_bookings() {
    let h = harness("availability");
    assert_eq!(h.svc.available_slots("2026-10-20").await.len(), 8);

    h.svc
        .book_immediately(request("a@example.com", "2026-10-20T13:00"))
        .await
        .unwrap();
    let slots = h.svc.available_slots("2026-10-20").await;
    let starts: Vec<Ms> = slots.iter().map(|s| s.start).collect();
    let expected: Vec<Ms> = [9, 10, 11, 12, 14, 15, 16]
        .iter()
        .map(|hour| at("2026-10-20T00:00") + hour * H)
        .collect();
    assert_eq!(starts, expected);

    assert!(h.svc.available_slots("20-10-2026").await.is_empty());
}

#[tokio::test]
async fn calendar_outage_degrades_to_no_slots() {
    let store = Arc::new(WalStore::open(&test_wal_path("outage.bookings.wal")).unwrap());
    let svc = Arc::new(BookingService::new(
        Arc::new(DownCalendar),
        store,
        Arc::new(RecordingNotifier::default()),
        Arc::new(ManualClock::new(at("2026-10-19T10:00"))),
        settings(),
    ));
    assert!(svc.available_slots("2026-10-20").await.is_empty());
    assert!(matches!(
        svc.try_available_slots("2026-10-20").await,
        Err(BookingError::SourceUnavailable(_))
    ));
    assert!(matches!(
        svc.book_immediately(request("a@example.com", "2026-10-20T10:00")).await,
        Err(BookingError::SourceUnavailable(_))
    ));
}

#[tokio::test]
async fn query_date_rejects_past_days() {
    let h = harness("query_date");
    assert!(matches!(h.svc.check_query_date("2026-10-18"), Err(BookingError::PastDate)));
    assert!(h.svc.check_query_date("2026-10-19").is_ok());
    assert!(matches!(h.svc.check_query_date("Monday"), Err(BookingError::Validation(_))));
}

// ── Cancel / reschedule ──────────────────────────────────

#[tokio::test]
async fn cancel_without_match_is_not_found() {
    let h = harness("cancel_missing");
    let err = h
        .svc
        .cancel_booking(CancelRequest {
            email: "nobody@example.com".into(),
            original_start_time: "2026-10-20T10:00".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::NotFound));
}

#[tokio::test]
async fn cancel_removes_event_and_frees_slot() {
    let h = harness("cancel");
    h.svc
        .book_immediately(request("a@example.com", "2026-10-20T10:00"))
        .await
        .unwrap();
    assert_eq!(h.svc.available_slots("2026-10-20").await.len(), 7);

    let cancelled = h
        .svc
        .cancel_booking(CancelRequest {
            email: "A@EXAMPLE.COM".into(),
            original_start_time: "2026-10-20T08:00:00Z".into(),
        })
        .await
        .unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert_eq!(calendar_events(&h).await, 0);
    assert_eq!(h.svc.available_slots("2026-10-20").await.len(), 8);

    // a second cancel no longer finds an active booking
    let again = h
        .svc
        .cancel_booking(CancelRequest {
            email: "a@example.com".into(),
            original_start_time: "2026-10-20T10:00".into(),
        })
        .await;
    assert!(matches!(again, Err(BookingError::NotFound)));
}

#[tokio::test]
async fn cancel_tolerates_missing_calendar_event() {
    let h = harness("cancel_gone");
    let receipt = h
        .svc
        .book_immediately(request("a@example.com", "2026-10-20T10:00"))
        .await
        .unwrap();
    let event_ref = receipt.booking.external_event_ref.unwrap();
    h.calendar.delete_event(&event_ref).await.unwrap();

    let cancelled = h
        .svc
        .cancel_booking(CancelRequest {
            email: "a@example.com".into(),
            original_start_time: "2026-10-20T10:00".into(),
        })
        .await
        .unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
}

#[tokio::test]
async fn failed_cancel_write_leaves_booking_and_event() {
    let (h, flaky) = flaky_harness("cancel_write_fails", Duration::ZERO);
    let receipt = h
        .svc
        .book_immediately(request("a@example.com", "2026-10-20T10:00"))
        .await
        .unwrap();
    flaky.fail_updates.store(true, Ordering::SeqCst);

    let err = h
        .svc
        .cancel_booking(CancelRequest {
            email: "a@example.com".into(),
            original_start_time: "2026-10-20T10:00".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::Internal(_)), "{err:?}");
    assert_eq!(calendar_events(&h).await, 1);
    let stored = h.store.get(receipt.booking.id).await.unwrap().unwrap();
    assert_eq!(stored.status, BookingStatus::Confirmed);
}

#[tokio::test]
async fn failed_reschedule_write_moves_event_back() {
    let (h, flaky) = flaky_harness("reschedule_write_fails", Duration::ZERO);
    let receipt = h
        .svc
        .book_immediately(request("a@example.com", "2026-10-20T10:00"))
        .await
        .unwrap();
    flaky.fail_updates.store(true, Ordering::SeqCst);

    let err = h
        .svc
        .reschedule_booking(RescheduleRequest {
            email: "a@example.com".into(),
            original_start_time: "2026-10-20T10:00".into(),
            new_start_time: "2026-10-21T10:00".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::Internal(_)), "{err:?}");
    let event_ref = receipt.booking.external_event_ref.as_deref().unwrap();
    assert_eq!(h.calendar.event(event_ref).await.unwrap().span, receipt.booking.span());
    let stored = h.store.get(receipt.booking.id).await.unwrap().unwrap();
    assert_eq!(stored.start_time, at("2026-10-20T10:00"));
}

#[tokio::test]
async fn reschedule_moves_booking_and_event() {
    let h = harness("reschedule");
    let receipt = h
        .svc
        .book_immediately(request("a@example.com", "2026-10-20T10:00"))
        .await
        .unwrap();

    // half an hour later overlaps only the booking being moved
    let moved = h
        .svc
        .reschedule_booking(RescheduleRequest {
            email: "a@example.com".into(),
            original_start_time: "2026-10-20T10:00".into(),
            new_start_time: "2026-10-20T10:30".into(),
        })
        .await
        .unwrap();
    assert_eq!(moved.id, receipt.booking.id);
    assert_eq!(moved.start_time, at("2026-10-20T10:30"));
    assert_eq!(moved.end_time, at("2026-10-20T11:30"));
    let event = h
        .calendar
        .event(moved.external_event_ref.as_deref().unwrap())
        .await
        .unwrap();
    assert_eq!(event.span, moved.span());
    assert_eq!(calendar_events(&h).await, 1);

    assert!(h
        .store
        .find_by_contact_and_time("a@example.com", at("2026-10-20T10:00"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn reschedule_revalidates_new_time() {
    let h = harness("reschedule_checks");
    h.svc
        .book_immediately(request("a@example.com", "2026-10-20T10:00"))
        .await
        .unwrap();
    h.svc
        .book_immediately(request("b@example.com", "2026-10-20T12:00"))
        .await
        .unwrap();

    let move_a = |to: &str| RescheduleRequest {
        email: "a@example.com".into(),
        original_start_time: "2026-10-20T10:00".into(),
        new_start_time: to.into(),
    };
    assert!(matches!(
        h.svc.reschedule_booking(move_a("2026-10-19T16:00")).await,
        Err(BookingError::SameDay)
    ));
    assert!(matches!(
        h.svc.reschedule_booking(move_a("2026-10-18T16:00")).await,
        Err(BookingError::PastDate)
    ));
    assert!(matches!(
        h.svc.reschedule_booking(move_a("2026-10-20T11:30")).await,
        Err(BookingError::Overlap)
    ));
    assert!(matches!(
        h.svc
            .reschedule_booking(RescheduleRequest {
                email: "c@example.com".into(),
                ..move_a("2026-10-21T10:00")
            })
            .await,
        Err(BookingError::NotFound)
    ));
    assert!(h.svc.reschedule_booking(move_a("2026-10-21T10:00")).await.is_ok());
}

#[tokio::test]
async fn reschedule_keeps_sent_reminder_flags() {
    let h = harness("reschedule_flags");
    let receipt = h
        .svc
        .book_immediately(request("a@example.com", "2026-10-20T10:00"))
        .await
        .unwrap();
    h.store
        .mark_reminder_sent(receipt.booking.id, ReminderKind::DayBefore)
        .await
        .unwrap();

    let moved = h
        .svc
        .reschedule_booking(RescheduleRequest {
            email: "a@example.com".into(),
            original_start_time: "2026-10-20T10:00".into(),
            new_start_time: "2026-10-22T10:00".into(),
        })
        .await
        .unwrap();
    assert!(moved.reminders.is_sent(ReminderKind::DayBefore));
}

// ── Call log ─────────────────────────────────────────────

#[tokio::test]
async fn log_call_normalizes_fields() {
    let h = harness("call_log");
    let call = h
        .svc
        .log_call(CallLogRequest {
            name: Some(" Thabo ".into()),
            email: Some("Thabo@Example.com".into()),
            phone: Some("0831234567".into()),
            disqualification_reason: Some("   ".into()),
            call_duration_secs: Some(240),
            ..CallLogRequest::default()
        })
        .await
        .unwrap();
    assert_eq!(call.name.as_deref(), Some("Thabo"));
    assert_eq!(call.email.as_deref(), Some("thabo@example.com"));
    assert_eq!(call.phone.as_deref(), Some("+27831234567"));
    assert!(call.disqualification_reason.is_none());
    assert!(!call.resulted_in_meeting);
    assert_eq!(h.store.call_logs(), vec![call]);
}
