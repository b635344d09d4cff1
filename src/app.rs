use std::io;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::auth::ApiKey;
use crate::calendar::LocalCalendar;
use crate::clock::Clock;
use crate::compactor::{self, Compact};
use crate::config::Config;
use crate::engine::BookingService;
use crate::http;
use crate::notify::Notifier;
use crate::reminder::{self, ReminderScheduler};
use crate::store::WalStore;

const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Everything one process runs, wired from a `Config`.
pub struct App {
    pub service: Arc<BookingService>,
    pub scheduler: Arc<ReminderScheduler>,
    pub store: Arc<WalStore>,
    pub calendar: Arc<LocalCalendar>,
}

impl App {
    /// Open (or create) the logs under `config.data_dir`. Must be called inside a tokio runtime.
    pub fn open(config: &Config, notifier: Arc<dyn Notifier>, clock: Arc<dyn Clock>) -> io::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let store = Arc::new(WalStore::open(&config.data_dir.join("bookings.wal"))?);
        let calendar = Arc::new(LocalCalendar::open(&config.data_dir.join("calendar.wal"))?);

        let service = Arc::new(BookingService::new(
            calendar.clone(),
            store.clone(),
            notifier.clone(),
            clock.clone(),
            config.booking_settings(),
        ));
        let scheduler = Arc::new(ReminderScheduler::new(
            store.clone(),
            notifier,
            clock,
            config.zone,
            config.default_country_code.clone(),
        ));
        Ok(Self {
            service,
            scheduler,
            store,
            calendar,
        })
    }

    pub fn router(&self, config: &Config) -> Router {
        http::router(
            self.service.clone(),
            ApiKey::new(config.api_key.clone()),
            config.request_timeout,
        )
    }

    /// Spawn the reminder sweep and the log compactor; both stop when `shutdown` fires.
    pub fn spawn_background(&self, config: &Config, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let scheduler = self.scheduler.clone();
        let every = config.reminder_interval;
        let token = shutdown.clone();
        let reminders = tokio::spawn(async move {
            reminder::run_reminders(scheduler, every, token).await;
        });

        let targets: Vec<Arc<dyn Compact>> = vec![self.store.clone(), self.calendar.clone()];
        let threshold = config.compact_threshold;
        let compaction = tokio::spawn(async move {
            compactor::run_compactor(targets, threshold, COMPACT_CHECK_INTERVAL, shutdown).await;
        });
        info!(
            "background tasks: reminders every {:?}, compaction at {threshold} appends",
            every
        );
        vec![reminders, compaction]
    }
}
