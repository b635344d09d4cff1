use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::calendar::LocalCalendar;
use crate::store::WalStore;

/// A WAL-backed component whose log can be rewritten from live state.
#[async_trait]
pub trait Compact: Send + Sync {
    fn name(&self) -> &'static str;
    async fn appends_since_compact(&self) -> u64;
    async fn compact(&self) -> Result<(), String>;
}

#[async_trait]
impl Compact for WalStore {
    fn name(&self) -> &'static str {
        "bookings"
    }

    async fn appends_since_compact(&self) -> u64 {
        WalStore::appends_since_compact(self).await
    }

    async fn compact(&self) -> Result<(), String> {
        WalStore::compact(self).await.map_err(|e| e.to_string())
    }
}

#[async_trait]
impl Compact for LocalCalendar {
    fn name(&self) -> &'static str {
        "calendar"
    }

    async fn appends_since_compact(&self) -> u64 {
        LocalCalendar::appends_since_compact(self).await
    }

    async fn compact(&self) -> Result<(), String> {
        LocalCalendar::compact(self).await.map_err(|e| e.to_string())
    }
}

/// Compact `target` once it has taken `threshold` appends since the last rewrite.
/// Returns whether a compaction ran.
pub async fn compact_if_due(target: &dyn Compact, threshold: u64) -> bool {
    let appends = target.appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match target.compact().await {
        Ok(()) => {
            info!("{} log compacted after {appends} appends", target.name());
            true
        }
        Err(e) => {
            error!("{} log compaction failed: {e}", target.name());
            false
        }
    }
}

/// Background task that checks every log once per `every` until `shutdown` fires.
pub async fn run_compactor(
    targets: Vec<Arc<dyn Compact>>,
    threshold: u64,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.cancelled() => return,
        }
        for target in &targets {
            compact_if_due(target.as_ref(), threshold).await;
        }
    }
}
