//! SolScout runtime.
//!
//! Wires the pipeline together and supervises it:
//! - bootstraps the store (fatal if the schema cannot be normalized)
//! - spawns the ingestor, signal engine, notifier dispatcher and the
//!   background schedulers
//! - waits for CTRL+C or a fatal report from any task, notifies the sink
//!   once on fatal, and exits non-zero
//!
//! Usage:
//!   cargo run --release
//!
//! Environment variables: see `config.rs` (`.env` is honored).

use dotenv::dotenv;
use log::{error, info};
use solscout::catalog::CatalogClient;
use solscout::config::Config;
use solscout::engine::SignalEngine;
use solscout::enrich::EnrichClient;
use solscout::ingest::{DispatchQueue, EventProcessor, IngestStats, StreamIngestor};
use solscout::notify::{self, Notifier};
use solscout::probe::{LiquidityProbe, QuoteProbe};
use solscout::scheduler;
use solscout::store::Store;
use solscout::universe::UniverseManager;
use std::sync::Arc;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Initialize rustls crypto provider (required for reqwest/tungstenite
    // with rustls-tls). Must happen before any HTTPS request.
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .ok(); // ignore error if already installed

    let cfg = Config::from_env();

    info!("🚀 SolScout starting");
    info!("   ├─ Store: {}", cfg.store_path);
    info!("   ├─ Stream: {}", cfg.stream_ws_url);
    info!("   ├─ Catalog: {}", cfg.catalog_api_url);
    info!("   ├─ Refresh period: {}h", cfg.refresh_period_secs / 3600);
    info!("   ├─ Event buffer: {}", cfg.event_buffer);
    info!("   └─ Age gate: {} days", cfg.min_token_age_days);

    // Schema bootstrap failures are unrecoverable by design
    let store = Store::open(&cfg.store_path)?;

    let stats = Arc::new(IngestStats::default());
    let queue = DispatchQueue::new(cfg.event_buffer);
    let (evict_tx, evict_rx) = mpsc::unbounded_channel::<String>();
    let (wake_tx, wake_rx) = mpsc::channel::<()>(1);
    let (fatal_tx, mut fatal_rx) = mpsc::channel::<String>(8);

    // Universe manager owns the monitored set and the API budget
    let catalog = Arc::new(CatalogClient::new(
        &cfg.catalog_api_url,
        cfg.catalog_api_key.clone(),
        &cfg.network,
    ));
    let universe = UniverseManager::new(store.clone(), catalog, cfg.clone(), evict_tx);
    let monitored = universe.monitored();

    let notifier = Notifier::new(&cfg);

    // Signal engine: single consumer of the dispatch queue
    let probe: Arc<dyn LiquidityProbe> = Arc::new(QuoteProbe::new(
        &cfg.quote_api_url,
        cfg.probe_usd_amount,
    ));
    let engine = SignalEngine::new(
        cfg.clone(),
        store.clone(),
        probe,
        monitored.clone(),
        wake_tx,
        fatal_tx.clone(),
    );

    // Ingestor: owns the WebSocket and the enrichment client
    let processor = EventProcessor::new(
        store.clone(),
        monitored,
        queue.clone(),
        stats.clone(),
        cfg.min_token_age_secs(),
    );
    let enrich = EnrichClient::new(&cfg.enrich_api_url, cfg.stream_api_key.clone());
    let ingestor = StreamIngestor::new(
        cfg.clone(),
        processor,
        enrich,
        stats.clone(),
        fatal_tx.clone(),
    );

    info!("🚀 Spawning tasks...");
    tokio::spawn(scheduler::universe_refresh_task(
        universe,
        cfg.refresh_period_secs,
    ));
    info!("   ├─ ✅ Universe refresh scheduler");

    tokio::spawn(scheduler::prune_task(store.clone()));
    info!("   ├─ ✅ Store prune scheduler");

    tokio::spawn(scheduler::activity_task(stats, notifier.clone(), store.clone()));
    info!("   ├─ ✅ Activity reporter");

    tokio::spawn(notify::dispatch_task(store.clone(), notifier.clone(), wake_rx));
    info!("   ├─ ✅ Notifier dispatcher");

    tokio::spawn(engine.run(queue, evict_rx));
    info!("   ├─ ✅ Signal engine");

    tokio::spawn(ingestor.run());
    info!("   └─ ✅ Stream ingestor");

    info!("🔄 Running. Press CTRL+C to shut down.");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("⚠️  Received CTRL+C, shutting down...");
            // Give in-flight store writes and deliveries a moment to drain
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;
            info!("✅ SolScout stopped");
            Ok(())
        }
        fatal = fatal_rx.recv() => {
            let reason = fatal.unwrap_or_else(|| "fatal channel closed".to_string());
            error!("💀 Fatal: {}", reason);
            // One bounded message to the sink before exit
            let _ = notifier
                .send_text(&format!("💀 scanner exiting: {}", reason))
                .await;
            std::process::exit(1);
        }
    }
}
