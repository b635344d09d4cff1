use std::io;
use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;
use ulid::Ulid;

use crate::model::*;
use crate::wal::{Wal, WalWriter};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("booking not found: {0}")]
    NotFound(Ulid),
    #[error("booking already exists: {0}")]
    AlreadyExists(Ulid),
}

/// Persistence for bookings and call logs.
///
/// `update` never clears a reminder flag: whatever the caller passes is
/// OR-merged with the stored flags.
#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn insert(&self, booking: Booking) -> Result<(), StoreError>;

    async fn get(&self, id: Ulid) -> Result<Option<Booking>, StoreError>;

    /// The active booking for `email` starting exactly at `start`.
    async fn find_by_contact_and_time(
        &self,
        email: &str,
        start: Ms,
    ) -> Result<Option<Booking>, StoreError>;

    /// Replace a booking, returning the stored result.
    async fn update(&self, booking: Booking) -> Result<Booking, StoreError>;

    /// Bookings with `status` whose `unsent` flag is clear and whose start
    /// lies in `window`, ordered by start.
    async fn query_by_status_and_window(
        &self,
        status: BookingStatus,
        unsent: ReminderKind,
        window: Span,
    ) -> Result<Vec<Booking>, StoreError>;

    /// Non-cancelled bookings overlapping `window`, ordered by start.
    async fn list_active_in(&self, window: Span) -> Result<Vec<Booking>, StoreError>;

    async fn mark_reminder_sent(&self, id: Ulid, kind: ReminderKind) -> Result<(), StoreError>;

    async fn log_call(&self, call: CallLog) -> Result<(), StoreError>;
}

/// DashMap-backed store made durable by a group-committed WAL.
pub struct WalStore {
    bookings: DashMap<Ulid, Booking>,
    /// (normalized email, start) → id, active bookings only.
    by_contact: DashMap<(String, Ms), Ulid>,
    calls: DashMap<Ulid, CallLog>,
    wal: WalWriter<Event>,
    /// Mutations hold it shared; compaction holds it exclusively so no
    /// append can land between the snapshot and the file swap.
    compaction: RwLock<()>,
}

impl WalStore {
    /// Replay `path` and start the writer task. Must be called inside a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let events = Wal::<Event>::replay(path)?;
        let store = Self {
            bookings: DashMap::new(),
            by_contact: DashMap::new(),
            calls: DashMap::new(),
            wal: WalWriter::spawn(Wal::open(path)?),
            compaction: RwLock::new(()),
        };
        for event in &events {
            store.apply(event);
        }
        info!(
            "booking store replayed {} records ({} bookings, {} calls)",
            events.len(),
            store.bookings.len(),
            store.calls.len()
        );
        Ok(store)
    }

    async fn persist_and_apply(&self, event: Event) -> Result<(), StoreError> {
        let _shared = self.compaction.read().await;
        self.wal.append(event.clone()).await?;
        self.apply(&event);
        Ok(())
    }

    fn apply(&self, event: &Event) {
        match event {
            Event::BookingCreated(booking) => {
                if booking.is_active() {
                    self.by_contact.insert(contact_key(booking), booking.id);
                }
                self.bookings.insert(booking.id, booking.clone());
            }
            Event::BookingUpdated(booking) => {
                // Merge under the entry lock so a concurrent ReminderSent
                // cannot land between reading the old flags and the write.
                let (old_key, new_key) = match self.bookings.entry(booking.id) {
                    Entry::Occupied(mut slot) => {
                        let old_key = contact_key(slot.get());
                        let mut next = booking.clone();
                        next.reminders = slot.get().reminders.merged(booking.reminders);
                        let new_key = next.is_active().then(|| contact_key(&next));
                        slot.insert(next);
                        (Some(old_key), new_key)
                    }
                    Entry::Vacant(slot) => {
                        let new_key = booking.is_active().then(|| contact_key(booking));
                        slot.insert(booking.clone());
                        (None, new_key)
                    }
                };
                if let Some(old_key) = old_key {
                    self.by_contact.remove_if(&old_key, |_, id| *id == booking.id);
                }
                if let Some(new_key) = new_key {
                    self.by_contact.insert(new_key, booking.id);
                }
            }
            Event::ReminderSent { id, kind } => {
                if let Some(mut booking) = self.bookings.get_mut(id) {
                    booking.reminders.mark(*kind);
                }
            }
            Event::CallLogged(call) => {
                self.calls.insert(call.id, call.clone());
            }
        }
    }

    /// Rewrite the log as one record per live entity.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let _exclusive = self.compaction.write().await;
        let mut events: Vec<Event> = self
            .bookings
            .iter()
            .map(|e| Event::BookingCreated(e.value().clone()))
            .collect();
        events.extend(self.calls.iter().map(|e| Event::CallLogged(e.value().clone())));
        let count = events.len();
        self.wal.compact(events).await?;
        info!("booking log compacted to {count} records");
        Ok(())
    }

    pub async fn appends_since_compact(&self) -> u64 {
        self.wal.appends_since_compact().await
    }

    pub fn call_logs(&self) -> Vec<CallLog> {
        let mut calls: Vec<CallLog> = self.calls.iter().map(|e| e.value().clone()).collect();
        calls.sort_by_key(|c| c.logged_at);
        calls
    }

    pub fn booking_count(&self) -> usize {
        self.bookings.len()
    }
}

fn contact_key(booking: &Booking) -> (String, Ms) {
    (normalize_email(&booking.contact.email), booking.start_time)
}

#[async_trait]
impl BookingStore for WalStore {
    async fn insert(&self, booking: Booking) -> Result<(), StoreError> {
        if self.bookings.contains_key(&booking.id) {
            return Err(StoreError::AlreadyExists(booking.id));
        }
        self.persist_and_apply(Event::BookingCreated(booking)).await
    }

    async fn get(&self, id: Ulid) -> Result<Option<Booking>, StoreError> {
        Ok(self.bookings.get(&id).map(|b| b.value().clone()))
    }

    async fn find_by_contact_and_time(
        &self,
        email: &str,
        start: Ms,
    ) -> Result<Option<Booking>, StoreError> {
        let key = (normalize_email(email), start);
        let Some(id) = self.by_contact.get(&key).map(|e| *e.value()) else {
            return Ok(None);
        };
        Ok(self
            .bookings
            .get(&id)
            .filter(|b| b.is_active())
            .map(|b| b.value().clone()))
    }

    async fn update(&self, booking: Booking) -> Result<Booking, StoreError> {
        let id = booking.id;
        if !self.bookings.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }
        self.persist_and_apply(Event::BookingUpdated(booking)).await?;
        self.bookings
            .get(&id)
            .map(|b| b.value().clone())
            .ok_or(StoreError::NotFound(id))
    }

    async fn query_by_status_and_window(
        &self,
        status: BookingStatus,
        unsent: ReminderKind,
        window: Span,
    ) -> Result<Vec<Booking>, StoreError> {
        let mut hits: Vec<Booking> = self
            .bookings
            .iter()
            .filter(|b| {
                b.status == status
                    && !b.reminders.is_sent(unsent)
                    && window.contains_instant(b.start_time)
            })
            .map(|b| b.value().clone())
            .collect();
        hits.sort_by_key(|b| b.start_time);
        Ok(hits)
    }

    async fn list_active_in(&self, window: Span) -> Result<Vec<Booking>, StoreError> {
        let mut hits: Vec<Booking> = self
            .bookings
            .iter()
            .filter(|b| b.is_active() && b.span().overlaps(&window))
            .map(|b| b.value().clone())
            .collect();
        hits.sort_by_key(|b| b.start_time);
        Ok(hits)
    }

    async fn mark_reminder_sent(&self, id: Ulid, kind: ReminderKind) -> Result<(), StoreError> {
        if !self.bookings.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }
        self.persist_and_apply(Event::ReminderSent { id, kind }).await
    }

    async fn log_call(&self, call: CallLog) -> Result<(), StoreError> {
        self.persist_and_apply(Event::CallLogged(call)).await
    }
}
