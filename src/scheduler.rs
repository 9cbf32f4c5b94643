//! Background schedulers: long-cycle refresh, pruning, reporting ticks.
//!
//! Each tick runs a bounded unit of work; a failing tick logs and waits
//! for the next one instead of taking the task down.

use crate::ingest::{ActivitySnapshot, IngestStats};
use crate::notify::{self, Notifier};
use crate::store::{self, RetentionPolicy, Store};
use crate::universe::UniverseManager;
use std::sync::Arc;
use std::time::Duration;

const PRUNE_INTERVAL_SECS: u64 = 24 * 3600;
const ACTIVITY_INTERVAL_SECS: u64 = 10 * 60;

/// Universe refresh loop. The first tick fires at startup, then every
/// `period_secs`. The manager is owned by this task; nothing else touches
/// the request budget or the cache.
pub async fn universe_refresh_task(mut manager: UniverseManager, period_secs: u64) {
    log::info!("⏰ Universe refresh scheduler (period: {}h)", period_secs / 3600);
    let mut timer = tokio::time::interval(Duration::from_secs(period_secs));

    loop {
        timer.tick().await;
        let now = chrono::Utc::now().timestamp();
        let count = manager.refresh(now).await;
        log::info!("🌐 Monitored set: {} tokens", count);
    }
}

/// Daily store pruning per the retention policy.
pub async fn prune_task(db: Store) {
    log::info!("⏰ Prune scheduler (period: 24h)");
    let mut timer = tokio::time::interval(Duration::from_secs(PRUNE_INTERVAL_SECS));

    loop {
        timer.tick().await;
        let now = chrono::Utc::now().timestamp();

        let store_handle = db.clone();
        let result = store::with_retry("prune", 120, || {
            store_handle.prune(now, RetentionPolicy::default())
        })
        .await;

        match result {
            Ok(report) => {
                log::info!(
                    "🧹 Pruned {} ohlcv, {} signals, {} catalog rows",
                    report.ohlcv,
                    report.signals,
                    report.catalog
                );
            }
            Err(e) => log::warn!("⚠️  Prune pass failed: {}", e),
        }
    }
}

/// Ten-minute ingest activity snapshots for the notifier sink.
///
/// Reports the delta since the previous tick, not lifetime counters; the
/// first tick is skipped so the delta is always meaningful. The same tick
/// doubles as the store health check.
pub async fn activity_task(stats: Arc<IngestStats>, notifier: Notifier, db: Store) {
    log::info!("⏰ Activity reporter (period: 10min)");
    let mut timer = tokio::time::interval(Duration::from_secs(ACTIVITY_INTERVAL_SECS));
    timer.tick().await; // the startup tick carries no delta

    let mut previous = stats.snapshot();

    loop {
        timer.tick().await;

        if let Err(e) = db.health_check() {
            log::warn!("⚠️  Store health check failed: {}", e);
        }
        let current = stats.snapshot();
        let delta = ActivitySnapshot {
            messages: current.messages - previous.messages,
            errors: current.errors - previous.errors,
            pool_events: current.pool_events - previous.pool_events,
            swap_events: current.swap_events - previous.swap_events,
            dropped_events: current.dropped_events - previous.dropped_events,
        };
        previous = current;

        let text = notify::format_activity(&delta);
        log::info!("{}", text);
        if let Err(e) = notifier.send_text(&text).await {
            log::warn!("⚠️  Activity report delivery failed: {}", e);
        }
    }
}
