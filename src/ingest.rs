//! Streaming event ingestion.
//!
//! Maintains one `logsSubscribe` per watched AMM program over a single
//! WebSocket connection, classifies every notification, enriches
//! interesting signatures over HTTP, and dispatches per-mint swap events
//! to the signal engine through a bounded drop-oldest queue.
//!
//! Connection lifecycle:
//!
//! ```text
//! Disconnected -> Connecting -> Subscribed -> Active -> Disconnected
//! ```
//!
//! On socket loss the ingestor reconnects with exponential backoff (5s
//! doubling to a 5 minute cap, full jitter). When the attempt budget runs
//! out it raises a fatal to the supervisor instead of spinning forever.

use crate::config::Config;
use crate::constants::{is_quote_mint, USDC_MINT, WATCHED_PROGRAMS};
use crate::enrich::{EnrichClient, EnrichedTx};
use crate::store::{self, Store, StoreError};
use crate::types::SwapEvent;
use crate::universe::MonitoredSet;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::tungstenite::Message;

/// Ingestion counters, shared with the scheduler's activity snapshots.
#[derive(Debug, Default)]
pub struct IngestStats {
    pub messages: AtomicU64,
    pub errors: AtomicU64,
    pub pool_events: AtomicU64,
    pub swap_events: AtomicU64,
    pub dropped_events: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivitySnapshot {
    pub messages: u64,
    pub errors: u64,
    pub pool_events: u64,
    pub swap_events: u64,
    pub dropped_events: u64,
}

impl IngestStats {
    pub fn snapshot(&self) -> ActivitySnapshot {
        ActivitySnapshot {
            messages: self.messages.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            pool_events: self.pool_events.load(Ordering::Relaxed),
            swap_events: self.swap_events.load(Ordering::Relaxed),
            dropped_events: self.dropped_events.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Display for ActivitySnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "messages={} swaps={} pools={} errors={} dropped={}",
            self.messages, self.swap_events, self.pool_events, self.errors, self.dropped_events
        )
    }
}

/// Bounded dispatch queue between ingestor and engine.
///
/// On overflow the **oldest** event is discarded: recency wins for signal
/// detection, and memory stays bounded through bursts. tokio's mpsc drops
/// at the sender side, which is the wrong end, hence this hand-rolled
/// deque + notify pair.
pub struct DispatchQueue {
    inner: Mutex<VecDeque<SwapEvent>>,
    notify: Notify,
    capacity: usize,
}

impl DispatchQueue {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(4_096))),
            notify: Notify::new(),
            capacity,
        })
    }

    /// Push an event; returns true when an old event had to be dropped.
    pub fn push(&self, event: SwapEvent) -> bool {
        let dropped = {
            let mut queue = self.inner.lock().unwrap();
            let dropped = if queue.len() >= self.capacity {
                queue.pop_front();
                true
            } else {
                false
            };
            queue.push_back(event);
            dropped
        };
        self.notify.notify_one();
        dropped
    }

    /// Wait for the next event.
    pub async fn pop(&self) -> SwapEvent {
        loop {
            if let Some(event) = self.inner.lock().unwrap().pop_front() {
                return event;
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What a notification's log lines say about the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogKind {
    pub is_pool_init: bool,
    pub is_swap: bool,
}

impl LogKind {
    pub fn interesting(&self) -> bool {
        self.is_pool_init || self.is_swap
    }
}

/// Classify log lines into pool-init / swap.
pub fn classify_logs<S: AsRef<str>>(logs: &[S]) -> LogKind {
    let mut kind = LogKind {
        is_pool_init: false,
        is_swap: false,
    };
    for line in logs {
        let line = line.as_ref();
        if line.contains("InitializePool") || line.contains("initialize") {
            kind.is_pool_init = true;
        }
        if line.to_ascii_lowercase().contains("swap") {
            kind.is_swap = true;
        }
    }
    kind
}

/// A swap read out of a transaction's token transfers.
#[derive(Debug, Clone, PartialEq)]
pub struct SwapParts {
    pub target_mint: String,
    pub price_usd: f64,
    pub vol_usd: f64,
    pub is_buy: bool,
    pub is_sell: bool,
}

/// Interpret aggregated token transfers as a swap against a quote mint.
///
/// The target is the first non-quote mint with a positive amount; the
/// price comes from the absolute USDC leg divided by the target amount.
/// Transfers with a missing or zero leg yield None and the event is
/// dropped upstream.
pub fn interpret_swap(transfers: &[crate::enrich::TokenTransfer]) -> Option<SwapParts> {
    let mut usdc_sum = 0.0;
    let mut target: Option<(&str, f64)> = None;

    for transfer in transfers {
        if transfer.mint == USDC_MINT {
            usdc_sum += transfer.amount;
        }
        if target.is_none() && !is_quote_mint(&transfer.mint) && transfer.amount > 0.0 {
            target = Some((&transfer.mint, transfer.amount));
        }
    }

    let (target_mint, target_amount) = target?;
    let vol_usd = usdc_sum.abs();
    if vol_usd == 0.0 || target_amount == 0.0 {
        return None;
    }

    Some(SwapParts {
        target_mint: target_mint.to_string(),
        price_usd: vol_usd / target_amount,
        vol_usd,
        is_buy: usdc_sum < 0.0,
        is_sell: usdc_sum > 0.0,
    })
}

/// Outcome of processing one enriched transaction.
#[derive(Debug, PartialEq)]
pub enum ProcessResult {
    /// Pool-init recorded (and possibly a deposit event dispatched)
    Pool { mint: String },
    /// Swap ingested into OHLCV; `dispatched` when the mint is monitored
    Swap { mint: String, dispatched: bool },
    /// Pool too young, event dropped before OHLCV ingestion
    AgeGated { mint: String },
    /// Nothing usable in the transaction
    Skipped,
}

/// Store-facing half of the ingestor, factored out of the socket loop so
/// the event semantics stay testable without a connection.
pub struct EventProcessor {
    store: Store,
    monitored: MonitoredSet,
    queue: Arc<DispatchQueue>,
    stats: Arc<IngestStats>,
    min_age_secs: i64,
}

impl EventProcessor {
    pub fn new(
        store: Store,
        monitored: MonitoredSet,
        queue: Arc<DispatchQueue>,
        stats: Arc<IngestStats>,
        min_age_secs: i64,
    ) -> Self {
        Self {
            store,
            monitored,
            queue,
            stats,
            min_age_secs,
        }
    }

    fn is_monitored(&self, mint: &str) -> bool {
        self.monitored.read().unwrap().contains(mint)
    }

    fn dispatch(&self, event: SwapEvent) {
        if self.queue.push(event) {
            self.stats.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Apply one enriched transaction to the store and the dispatch queue.
    pub async fn process(
        &self,
        kind: LogKind,
        tx: &EnrichedTx,
        now: i64,
    ) -> Result<ProcessResult, StoreError> {
        if kind.is_pool_init {
            return self.process_pool_init(tx, now).await;
        }
        if kind.is_swap {
            return self.process_swap(tx, now).await;
        }
        Ok(ProcessResult::Skipped)
    }

    async fn process_pool_init(
        &self,
        tx: &EnrichedTx,
        now: i64,
    ) -> Result<ProcessResult, StoreError> {
        let Some(mint) = tx
            .transfers
            .iter()
            .find(|t| !is_quote_mint(&t.mint))
            .map(|t| t.mint.clone())
        else {
            return Ok(ProcessResult::Skipped);
        };

        let first_seen = tx.timestamp.unwrap_or(now);
        let store = self.store.clone();
        let pool_mint = mint.clone();
        store::with_retry("pool upsert", 30, || {
            store.upsert_pool(&pool_mint, first_seen, None, None)
        })
        .await?;
        self.stats.pool_events.fetch_add(1, Ordering::Relaxed);

        // A large deposit on a monitored mint arms the engine's LP boost
        let deposit_usd: f64 = tx
            .transfers
            .iter()
            .filter(|t| t.mint == USDC_MINT)
            .map(|t| t.amount.abs())
            .sum();
        if deposit_usd > 0.0 && self.is_monitored(&mint) {
            self.dispatch(SwapEvent {
                mint: mint.clone(),
                price_usd: 0.0,
                vol_usd: 0.0,
                ts: first_seen,
                buyer: None,
                is_buy: false,
                is_sell: false,
                deposit_usd: Some(deposit_usd),
            });
        }

        Ok(ProcessResult::Pool { mint })
    }

    async fn process_swap(&self, tx: &EnrichedTx, now: i64) -> Result<ProcessResult, StoreError> {
        let Some(parts) = interpret_swap(&tx.transfers) else {
            self.stats.errors.fetch_add(1, Ordering::Relaxed);
            return Ok(ProcessResult::Skipped);
        };

        // Age gate: a pool we saw born less than the threshold ago is
        // dropped before it can touch OHLCV. No pool record means the pool
        // predates observation and passes.
        if let Some(pool) = self.store.get_pool(&parts.target_mint)? {
            if now - pool.first_seen_ts < self.min_age_secs {
                log::debug!(
                    "⏭️  Age gate dropped swap for {} (pool {}s old)",
                    parts.target_mint,
                    now - pool.first_seen_ts
                );
                return Ok(ProcessResult::AgeGated {
                    mint: parts.target_mint,
                });
            }
        }

        let ts = tx.timestamp.unwrap_or(now);
        let store = self.store.clone();
        let (mint, price, vol) = (parts.target_mint.clone(), parts.price_usd, parts.vol_usd);
        store::with_retry("swap ingest", 30, || {
            store.ingest_swap(&mint, price, vol, ts)
        })
        .await?;
        self.stats.swap_events.fetch_add(1, Ordering::Relaxed);

        let dispatched = self.is_monitored(&parts.target_mint);
        if dispatched {
            self.dispatch(SwapEvent {
                mint: parts.target_mint.clone(),
                price_usd: parts.price_usd,
                vol_usd: parts.vol_usd,
                ts,
                buyer: tx.fee_payer.clone(),
                is_buy: parts.is_buy,
                is_sell: parts.is_sell,
                deposit_usd: None,
            });
        }

        Ok(ProcessResult::Swap {
            mint: parts.target_mint,
            dispatched,
        })
    }
}

/// Reconnect backoff: exponential with full jitter.
struct ReconnectBackoff {
    base_secs: u64,
    cap_secs: u64,
    max_attempts: u32,
    attempt: u32,
}

impl ReconnectBackoff {
    fn new(base_secs: u64, cap_secs: u64, max_attempts: u32) -> Self {
        Self {
            base_secs,
            cap_secs,
            max_attempts,
            attempt: 0,
        }
    }

    /// Next delay, or None once the attempt budget is spent.
    fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        let exp = self
            .base_secs
            .saturating_mul(1u64 << self.attempt.min(32))
            .min(self.cap_secs);
        self.attempt += 1;
        let jittered = rand::thread_rng().gen_range(0.0..1.0) * exp as f64;
        Some(Duration::from_secs_f64(jittered.max(0.1)))
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Disconnected,
    Connecting,
    Subscribed,
    Active,
}

/// The streaming ingestor task. Owns the WebSocket; everything it learns
/// flows out through the store, the dispatch queue, and the counters.
pub struct StreamIngestor {
    cfg: Config,
    processor: EventProcessor,
    enrich: EnrichClient,
    stats: Arc<IngestStats>,
    fatal_tx: mpsc::Sender<String>,
    state: ConnState,
    store_failures: u32,
}

/// Consecutive store failures tolerated in the ingest path before the
/// store counts as unreachable (each attempt already retried for 30s)
const STORE_FAILURE_LIMIT: u32 = 4;

impl StreamIngestor {
    pub fn new(
        cfg: Config,
        processor: EventProcessor,
        enrich: EnrichClient,
        stats: Arc<IngestStats>,
        fatal_tx: mpsc::Sender<String>,
    ) -> Self {
        Self {
            cfg,
            processor,
            enrich,
            stats,
            fatal_tx,
            state: ConnState::Disconnected,
            store_failures: 0,
        }
    }

    fn transition(&mut self, next: ConnState) {
        if self.state != next {
            log::debug!("🔄 Ingestor state: {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    fn ws_url(&self) -> String {
        match &self.cfg.stream_api_key {
            Some(key) => format!("{}/?api-key={}", self.cfg.stream_ws_url.trim_end_matches('/'), key),
            None => self.cfg.stream_ws_url.clone(),
        }
    }

    /// Run until shutdown or fatal. Reconnects on every socket loss.
    pub async fn run(mut self) {
        let mut backoff = ReconnectBackoff::new(5, 300, self.cfg.max_reconnect_attempts);

        loop {
            match self.run_connection().await {
                Ok(()) => {
                    // Clean shutdown (stream ended without error)
                    log::info!("✅ Ingestor connection closed cleanly");
                    return;
                }
                Err(e) => {
                    log::warn!("❌ Stream connection lost: {}", e);
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                }
            }

            // A connection that made it to Active earns a fresh budget
            if self.state == ConnState::Active {
                backoff.reset();
            }
            self.transition(ConnState::Disconnected);

            match backoff.next_delay() {
                Some(delay) => {
                    log::warn!("⏳ Reconnecting in {:.1}s", delay.as_secs_f64());
                    tokio::time::sleep(delay).await;
                }
                None => {
                    let _ = self
                        .fatal_tx
                        .send("stream subscription lost: reconnect attempts exhausted".to_string())
                        .await;
                    return;
                }
            }
        }
    }

    async fn run_connection(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        log::info!("🔌 Connecting to log stream: {}", self.cfg.stream_ws_url);
        self.transition(ConnState::Connecting);

        let (socket, _response) = tokio_tungstenite::connect_async(self.ws_url()).await?;
        let (mut write, mut read) = socket.split();

        // One logsSubscribe per watched program
        for (idx, program) in WATCHED_PROGRAMS.iter().enumerate() {
            let request = json!({
                "jsonrpc": "2.0",
                "id": idx + 1,
                "method": "logsSubscribe",
                "params": [
                    { "mentions": [program] },
                    { "commitment": "confirmed" }
                ]
            });
            write.send(Message::Text(request.to_string())).await?;
        }
        self.transition(ConnState::Subscribed);
        log::info!("📡 Subscribed to {} AMM programs", WATCHED_PROGRAMS.len());

        let mut heartbeat = tokio::time::interval(Duration::from_secs(30));
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        heartbeat.tick().await; // first tick fires immediately
        let mut acks = 0usize;

        loop {
            tokio::select! {
                message = read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(ack_id) = subscription_ack(&text) {
                                acks += 1;
                                log::debug!("   ├─ Subscription {} acknowledged", ack_id);
                                if acks >= WATCHED_PROGRAMS.len() {
                                    self.transition(ConnState::Active);
                                    log::info!("✅ Ingestor active");
                                }
                                continue;
                            }
                            self.on_notification(&text).await;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            return Err(format!("server closed connection: {:?}", frame).into());
                        }
                        Some(Ok(_)) => {} // pings/pongs/binary
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err("stream ended".into()),
                    }
                }
                _ = heartbeat.tick() => {
                    write.send(Message::Ping(Vec::new())).await?;
                }
            }
        }
    }

    async fn on_notification(&mut self, text: &str) {
        let Ok(value) = serde_json::from_str::<Value>(text) else {
            self.stats.errors.fetch_add(1, Ordering::Relaxed);
            return;
        };

        if value.get("method").and_then(Value::as_str) != Some("logsNotification") {
            return;
        }
        self.stats.messages.fetch_add(1, Ordering::Relaxed);

        let Some(result) = value.pointer("/params/result/value") else {
            self.stats.errors.fetch_add(1, Ordering::Relaxed);
            return;
        };

        // Failed transactions carry a non-null err
        if result.get("err").map(|e| !e.is_null()).unwrap_or(false) {
            return;
        }

        let Some(signature) = result.get("signature").and_then(Value::as_str) else {
            self.stats.errors.fetch_add(1, Ordering::Relaxed);
            return;
        };
        let logs: Vec<String> = result
            .get("logs")
            .and_then(Value::as_array)
            .map(|lines| {
                lines
                    .iter()
                    .filter_map(|l| l.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let kind = classify_logs(&logs);
        if !kind.interesting() {
            return;
        }

        // Enrichment is paced: one fetch per min_request_interval
        tokio::time::sleep(Duration::from_secs(self.cfg.min_request_interval_secs)).await;
        let enriched = match self.enrich.fetch(signature).await {
            Ok(Some(tx)) => tx,
            Ok(None) => return,
            Err(e) => {
                log::warn!("⚠️  Enrichment failed for {}: {}", signature, e);
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let now = chrono::Utc::now().timestamp();
        match self.processor.process(kind, &enriched, now).await {
            Ok(_) => {
                self.store_failures = 0;
            }
            Err(StoreError::Transient(msg)) => {
                log::warn!("⚠️  Store busy while processing {}: {}", signature, msg);
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                self.store_failures += 1;
                if self.store_failures >= STORE_FAILURE_LIMIT {
                    let _ = self
                        .fatal_tx
                        .send(format!(
                            "store unreachable after {} consecutive ingest failures",
                            self.store_failures
                        ))
                        .await;
                }
            }
            Err(StoreError::Permanent(msg)) => {
                let _ = self
                    .fatal_tx
                    .send(format!("store failure in ingest path: {}", msg))
                    .await;
            }
        }
    }
}

/// A subscription ack is a bare JSON-RPC response with a numeric result.
fn subscription_ack(text: &str) -> Option<u64> {
    let value: Value = serde_json::from_str(text).ok()?;
    if value.get("method").is_some() {
        return None;
    }
    value.get("result").and_then(Value::as_u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::TokenTransfer;
    use std::collections::HashSet;
    use std::sync::RwLock;

    const TARGET: &str = "DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263";

    fn transfers(usdc: f64, target: f64) -> Vec<TokenTransfer> {
        vec![
            TokenTransfer {
                mint: USDC_MINT.to_string(),
                amount: usdc,
            },
            TokenTransfer {
                mint: TARGET.to_string(),
                amount: target,
            },
        ]
    }

    fn make_processor(
        monitored: &[&str],
        min_age_secs: i64,
    ) -> (EventProcessor, Arc<DispatchQueue>, Arc<IngestStats>, Store) {
        let store = Store::open_in_memory().unwrap();
        let queue = DispatchQueue::new(16);
        let stats = Arc::new(IngestStats::default());
        let set: HashSet<String> = monitored.iter().map(|s| s.to_string()).collect();
        let processor = EventProcessor::new(
            store.clone(),
            Arc::new(RwLock::new(set)),
            queue.clone(),
            stats.clone(),
            min_age_secs,
        );
        (processor, queue, stats, store)
    }

    #[test]
    fn test_classify_pool_init_and_swap() {
        let pool = classify_logs(&["Program log: Instruction: InitializePool"]);
        assert!(pool.is_pool_init);

        let pool2 = classify_logs(&["Program log: initialize2"]);
        assert!(pool2.is_pool_init);

        let swap = classify_logs(&["Program log: Instruction: Swap", "ok"]);
        assert!(swap.is_swap && !swap.is_pool_init);

        // Case-insensitive swap match
        let swap2 = classify_logs(&["ray_log: SWAP executed"]);
        assert!(swap2.is_swap);

        let neither = classify_logs(&["Program consumed 12345 compute units"]);
        assert!(!neither.interesting());
    }

    #[test]
    fn test_interpret_swap_quote_detection() {
        // [{USDC, -a}, {X, +b}] with a,b > 0: buy of X at price a/b
        let parts = interpret_swap(&transfers(-150.0, 300.0)).unwrap();
        assert_eq!(parts.target_mint, TARGET);
        assert_eq!(parts.price_usd, 0.5);
        assert_eq!(parts.vol_usd, 150.0);
        assert!(parts.is_buy);
        assert!(!parts.is_sell);

        // Positive USDC leg: a sell
        let sell_side = vec![
            TokenTransfer {
                mint: USDC_MINT.to_string(),
                amount: 90.0,
            },
            TokenTransfer {
                mint: TARGET.to_string(),
                amount: 45.0,
            },
        ];
        let parts = interpret_swap(&sell_side).unwrap();
        assert!(parts.is_sell);
        assert_eq!(parts.price_usd, 2.0);
    }

    #[test]
    fn test_interpret_swap_drops_zero_legs() {
        assert_eq!(interpret_swap(&transfers(0.0, 300.0)), None);
        // No non-quote positive leg
        let quote_only = vec![TokenTransfer {
            mint: USDC_MINT.to_string(),
            amount: -10.0,
        }];
        assert_eq!(interpret_swap(&quote_only), None);
        assert_eq!(interpret_swap(&[]), None);
    }

    #[test]
    fn test_dispatch_queue_drops_oldest() {
        let queue = DispatchQueue::new(3);
        let event = |n: i64| SwapEvent {
            mint: format!("mint_{}", n),
            price_usd: 1.0,
            vol_usd: 100.0,
            ts: n,
            buyer: None,
            is_buy: true,
            is_sell: false,
            deposit_usd: None,
        };

        assert!(!queue.push(event(1)));
        assert!(!queue.push(event(2)));
        assert!(!queue.push(event(3)));
        // Overflow drops the head, not the new event
        assert!(queue.push(event(4)));
        assert_eq!(queue.len(), 3);

        let first = futures_util::future::FutureExt::now_or_never(queue.pop())
            .expect("queue has items");
        assert_eq!(first.mint, "mint_2");
    }

    #[tokio::test]
    async fn test_swap_processing_dispatches_monitored() {
        let (processor, queue, stats, store) = make_processor(&[TARGET], 14 * 86_400);
        let now = 1_700_000_000;

        let tx = EnrichedTx {
            timestamp: Some(now - 5),
            fee_payer: Some("BuyerWallet".to_string()),
            transfers: transfers(-500.0, 1_000.0),
        };
        let kind = LogKind {
            is_pool_init: false,
            is_swap: true,
        };

        let result = processor.process(kind, &tx, now).await.unwrap();
        assert_eq!(
            result,
            ProcessResult::Swap {
                mint: TARGET.to_string(),
                dispatched: true
            }
        );

        // OHLCV written
        let candles = store.get_candles(TARGET, 10).unwrap();
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].v, 500.0);

        // Event queued with the buyer attached
        let event = queue.pop().await;
        assert_eq!(event.mint, TARGET);
        assert_eq!(event.buyer.as_deref(), Some("BuyerWallet"));
        assert!(event.is_buy);
        assert_eq!(stats.swap_events.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_unmonitored_swap_not_dispatched() {
        let (processor, queue, _stats, store) = make_processor(&[], 14 * 86_400);
        let now = 1_700_000_000;

        let tx = EnrichedTx {
            timestamp: Some(now),
            fee_payer: None,
            transfers: transfers(-100.0, 200.0),
        };
        let result = processor
            .process(
                LogKind {
                    is_pool_init: false,
                    is_swap: true,
                },
                &tx,
                now,
            )
            .await
            .unwrap();

        assert_eq!(
            result,
            ProcessResult::Swap {
                mint: TARGET.to_string(),
                dispatched: false
            }
        );
        // OHLCV still updated, but nothing dispatched
        assert!(queue.is_empty());
        assert_eq!(store.get_candles(TARGET, 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_age_gate_drops_before_ohlcv() {
        let (processor, queue, _stats, store) = make_processor(&[TARGET], 14 * 86_400);
        let now = 1_700_000_000;

        // Pool born three days ago
        store
            .upsert_pool(TARGET, now - 3 * 86_400, None, None)
            .unwrap();

        let tx = EnrichedTx {
            timestamp: Some(now),
            fee_payer: None,
            transfers: transfers(-10_000.0, 5_000.0),
        };
        let result = processor
            .process(
                LogKind {
                    is_pool_init: false,
                    is_swap: true,
                },
                &tx,
                now,
            )
            .await
            .unwrap();

        assert_eq!(
            result,
            ProcessResult::AgeGated {
                mint: TARGET.to_string()
            }
        );
        // Dropped before ingest_swap: no candles, no dispatch
        assert!(store.get_candles(TARGET, 10).unwrap().is_empty());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_old_pool_passes_age_gate() {
        let (processor, _queue, _stats, store) = make_processor(&[TARGET], 14 * 86_400);
        let now = 1_700_000_000;

        store
            .upsert_pool(TARGET, now - 30 * 86_400, None, None)
            .unwrap();

        let tx = EnrichedTx {
            timestamp: Some(now),
            fee_payer: None,
            transfers: transfers(-100.0, 200.0),
        };
        let result = processor
            .process(
                LogKind {
                    is_pool_init: false,
                    is_swap: true,
                },
                &tx,
                now,
            )
            .await
            .unwrap();

        assert!(matches!(result, ProcessResult::Swap { .. }));
        assert_eq!(store.get_candles(TARGET, 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_pool_init_records_and_arms_boost() {
        let (processor, queue, stats, store) = make_processor(&[TARGET], 14 * 86_400);
        let now = 1_700_000_000;

        let tx = EnrichedTx {
            timestamp: Some(now - 2),
            fee_payer: None,
            transfers: vec![
                TokenTransfer {
                    mint: USDC_MINT.to_string(),
                    amount: -8_000.0,
                },
                TokenTransfer {
                    mint: TARGET.to_string(),
                    amount: 1_000_000.0,
                },
            ],
        };
        let result = processor
            .process(
                LogKind {
                    is_pool_init: true,
                    is_swap: false,
                },
                &tx,
                now,
            )
            .await
            .unwrap();

        assert_eq!(
            result,
            ProcessResult::Pool {
                mint: TARGET.to_string()
            }
        );
        let pool = store.get_pool(TARGET).unwrap().unwrap();
        assert_eq!(pool.first_seen_ts, now - 2);
        assert_eq!(stats.pool_events.load(Ordering::Relaxed), 1);

        // Monitored mint receives the deposit event
        let event = queue.pop().await;
        assert_eq!(event.deposit_usd, Some(8_000.0));
        assert!(!event.is_buy && !event.is_sell);
    }

    #[test]
    fn test_subscription_ack_detection() {
        assert_eq!(
            subscription_ack(r#"{"jsonrpc":"2.0","result":23784,"id":1}"#),
            Some(23_784)
        );
        assert_eq!(
            subscription_ack(r#"{"jsonrpc":"2.0","method":"logsNotification","params":{}}"#),
            None
        );
    }

    #[test]
    fn test_backoff_caps_and_exhausts() {
        let mut backoff = ReconnectBackoff::new(5, 300, 3);
        for _ in 0..3 {
            let delay = backoff.next_delay().expect("attempts remain");
            assert!(delay <= Duration::from_secs(300));
        }
        assert!(backoff.next_delay().is_none());

        backoff.reset();
        assert!(backoff.next_delay().is_some());
    }
}
