use std::io;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};
use ulid::Ulid;

use crate::model::*;
use crate::wal::{Wal, WalWriter};

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("calendar unavailable: {0}")]
    Unavailable(String),
    #[error("calendar event not found: {0}")]
    NotFound(String),
}

impl From<io::Error> for CalendarError {
    fn from(err: io::Error) -> Self {
        CalendarError::Unavailable(err.to_string())
    }
}

/// Occupied time on the calendar. `event_ref` is set when the calendar owns the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusyInterval {
    pub span: Span,
    pub event_ref: Option<String>,
}

/// Private properties attached to an event created for a booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    pub summary: String,
    pub description: String,
    pub contact_email: String,
}

#[async_trait]
pub trait CalendarSource: Send + Sync {
    async fn list_busy(&self, window: Span) -> Result<Vec<BusyInterval>, CalendarError>;

    /// Returns the new event's reference.
    async fn create_event(&self, span: Span, metadata: &EventMetadata)
    -> Result<String, CalendarError>;

    async fn update_event(&self, event_ref: &str, span: Span) -> Result<(), CalendarError>;

    /// Deleting an event that does not exist succeeds.
    async fn delete_event(&self, event_ref: &str) -> Result<(), CalendarError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEntry {
    pub event_ref: String,
    pub span: Span,
    pub metadata: EventMetadata,
}

/// WAL record format of the local calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalendarRecord {
    Created(CalendarEntry),
    Moved { event_ref: String, span: Span },
    Deleted { event_ref: String },
}

/// Single-owner calendar kept on local disk.
pub struct LocalCalendar {
    /// Sorted by span start.
    entries: RwLock<Vec<CalendarEntry>>,
    wal: WalWriter<CalendarRecord>,
}

impl LocalCalendar {
    /// Replay `path` and start the writer task. Must be called inside a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let records = Wal::<CalendarRecord>::replay(path)?;
        let mut entries = Vec::new();
        for record in &records {
            apply(&mut entries, record);
        }
        info!(
            "local calendar replayed {} records ({} events)",
            records.len(),
            entries.len()
        );
        Ok(Self {
            entries: RwLock::new(entries),
            wal: WalWriter::spawn(Wal::open(path)?),
        })
    }

    async fn persist_and_apply(&self, record: CalendarRecord) -> Result<(), CalendarError> {
        let mut entries = self.entries.write().await;
        self.wal.append(record.clone()).await?;
        apply(&mut entries, &record);
        Ok(())
    }

    pub async fn event(&self, event_ref: &str) -> Option<CalendarEntry> {
        self.entries
            .read()
            .await
            .iter()
            .find(|e| e.event_ref == event_ref)
            .cloned()
    }

    pub async fn event_count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Rewrite the log as one `Created` record per live event.
    pub async fn compact(&self) -> Result<(), CalendarError> {
        let entries = self.entries.write().await;
        let records: Vec<CalendarRecord> =
            entries.iter().cloned().map(CalendarRecord::Created).collect();
        let count = records.len();
        self.wal.compact(records).await?;
        info!("calendar log compacted to {count} records");
        Ok(())
    }

    pub async fn appends_since_compact(&self) -> u64 {
        self.wal.appends_since_compact().await
    }
}

fn apply(entries: &mut Vec<CalendarEntry>, record: &CalendarRecord) {
    match record {
        CalendarRecord::Created(entry) => insert_sorted(entries, entry.clone()),
        CalendarRecord::Moved { event_ref, span } => {
            if let Some(mut entry) = remove(entries, event_ref) {
                entry.span = *span;
                insert_sorted(entries, entry);
            }
        }
        CalendarRecord::Deleted { event_ref } => {
            remove(entries, event_ref);
        }
    }
}

fn insert_sorted(entries: &mut Vec<CalendarEntry>, entry: CalendarEntry) {
    let pos = entries
        .binary_search_by_key(&entry.span.start, |e| e.span.start)
        .unwrap_or_else(|e| e);
    entries.insert(pos, entry);
}

fn remove(entries: &mut Vec<CalendarEntry>, event_ref: &str) -> Option<CalendarEntry> {
    let pos = entries.iter().position(|e| e.event_ref == event_ref)?;
    Some(entries.remove(pos))
}

/// Entries whose span overlaps `query`. Everything past the partition point
/// starts at or after `query.end` and cannot overlap.
fn overlapping<'a>(
    entries: &'a [CalendarEntry],
    query: &'a Span,
) -> impl Iterator<Item = &'a CalendarEntry> {
    let right_bound = entries.partition_point(|e| e.span.start < query.end);
    entries[..right_bound]
        .iter()
        .filter(move |e| e.span.end > query.start)
}

#[async_trait]
impl CalendarSource for LocalCalendar {
    async fn list_busy(&self, window: Span) -> Result<Vec<BusyInterval>, CalendarError> {
        let entries = self.entries.read().await;
        Ok(overlapping(&entries, &window)
            .map(|e| BusyInterval {
                span: e.span,
                event_ref: Some(e.event_ref.clone()),
            })
            .collect())
    }

    async fn create_event(
        &self,
        span: Span,
        metadata: &EventMetadata,
    ) -> Result<String, CalendarError> {
        let event_ref = Ulid::new().to_string();
        self.persist_and_apply(CalendarRecord::Created(CalendarEntry {
            event_ref: event_ref.clone(),
            span,
            metadata: metadata.clone(),
        }))
        .await?;
        debug!("calendar event {event_ref} created for {}", metadata.contact_email);
        Ok(event_ref)
    }

    async fn update_event(&self, event_ref: &str, span: Span) -> Result<(), CalendarError> {
        if self.event(event_ref).await.is_none() {
            return Err(CalendarError::NotFound(event_ref.to_string()));
        }
        self.persist_and_apply(CalendarRecord::Moved {
            event_ref: event_ref.to_string(),
            span,
        })
        .await
    }

    async fn delete_event(&self, event_ref: &str) -> Result<(), CalendarError> {
        if self.event(event_ref).await.is_none() {
            debug!("calendar event {event_ref} already gone");
            return Ok(());
        }
        self.persist_and_apply(CalendarRecord::Deleted {
            event_ref: event_ref.to_string(),
        })
        .await
    }
}
