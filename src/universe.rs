//! Monitored-set lifecycle: budgeted catalog refresh with a cache hierarchy.
//!
//! A refresh tick resolves the universe from three sources in precedence
//! order:
//! 1. memory cache, when younger than its TTL and non-empty
//! 2. the store, when it holds enough fresh catalog rows with usable mints
//! 3. the external catalog API, under a strict daily request budget
//!
//! External fetches are batched and **written through** to the store after
//! every completed batch, so a crash mid-refresh leaves the catalog
//! monotonically improved and the next refresh resumes from the store.
//!
//! Failure policy: any transient failure keeps the previous monitored set;
//! an empty result never replaces a non-empty one.

use crate::catalog::{CatalogError, CatalogSource, CoinListEntry};
use crate::config::Config;
use crate::constants::is_valid_mint;
use crate::store::{self, Store};
use crate::types::CatalogToken;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;

/// Shared handle to the monitored set.
///
/// Readers are the ingestor filter and the engine; the universe manager is
/// the only writer and swaps the whole set atomically.
pub type MonitoredSet = Arc<RwLock<HashSet<String>>>;

/// Daily request budget, owned by the manager task.
#[derive(Debug)]
struct RequestBudget {
    day: i64,
    used: u32,
    limit: u32,
}

impl RequestBudget {
    fn new(limit: u32) -> Self {
        Self { day: 0, used: 0, limit }
    }

    /// Take one request slot; false when today's budget is spent.
    fn try_take(&mut self, now: i64) -> bool {
        let day = now.div_euclid(86_400);
        if day != self.day {
            self.day = day;
            self.used = 0;
        }
        if self.used >= self.limit {
            return false;
        }
        self.used += 1;
        true
    }
}

struct UniverseCache {
    tokens: Vec<CatalogToken>,
    fetched_at: i64,
}

/// Universe manager: decides the refresh source, fetches within budget,
/// writes through to the store, and publishes the monitored set.
pub struct UniverseManager {
    store: Store,
    source: Arc<dyn CatalogSource>,
    cfg: Config,
    monitored: MonitoredSet,
    evict_tx: mpsc::UnboundedSender<String>,
    cache: Option<UniverseCache>,
    coin_list: Option<(Vec<CoinListEntry>, i64)>,
    budget: RequestBudget,
}

impl UniverseManager {
    pub fn new(
        store: Store,
        source: Arc<dyn CatalogSource>,
        cfg: Config,
        evict_tx: mpsc::UnboundedSender<String>,
    ) -> Self {
        let budget = RequestBudget::new(cfg.daily_request_budget);
        Self {
            store,
            source,
            cfg,
            monitored: Arc::new(RwLock::new(HashSet::new())),
            evict_tx,
            cache: None,
            coin_list: None,
            budget,
        }
    }

    /// Handle for the ingestor filter and the engine.
    pub fn monitored(&self) -> MonitoredSet {
        self.monitored.clone()
    }

    /// Run one refresh tick. Returns the size of the published set (or of
    /// the retained previous set when every source came up empty).
    pub async fn refresh(&mut self, now: i64) -> usize {
        // Source 1: memory cache
        if let Some(cache) = &self.cache {
            if !cache.tokens.is_empty() && now - cache.fetched_at < self.cfg.memory_ttl_secs {
                log::info!(
                    "🧠 Universe from memory cache: {} tokens (age {}s)",
                    cache.tokens.len(),
                    now - cache.fetched_at
                );
                return cache.tokens.len();
            }
        }

        // Source 2: persisted catalog
        match self.store.fresh_catalog_tokens(
            &self.cfg.network,
            now,
            self.cfg.freshness_window_secs,
        ) {
            Ok(rows) => {
                let usable: Vec<CatalogToken> = rows
                    .into_iter()
                    .filter(|t| is_valid_mint(&t.mint))
                    .collect();
                if usable.len() >= self.cfg.min_fresh_count {
                    let admitted = self.apply_basic_filter(usable);
                    if !admitted.is_empty() {
                        log::info!("💾 Universe rehydrated from store: {} tokens", admitted.len());
                        return self.install(admitted, now);
                    }
                }
            }
            Err(e) => {
                log::warn!("⚠️  Store rehydration failed, keeping current set: {}", e);
                return self.current_len();
            }
        }

        // Source 3: external catalog
        let fetched = self.refresh_from_external(now).await;
        let admitted = self.apply_basic_filter(fetched);
        if admitted.is_empty() {
            log::warn!(
                "⚠️  External refresh produced no admissible tokens, keeping current set ({})",
                self.current_len()
            );
            return self.current_len();
        }

        log::info!("🌐 Universe refreshed from external catalog: {} tokens", admitted.len());
        self.install(admitted, now)
    }

    fn current_len(&self) -> usize {
        self.monitored.read().unwrap().len()
    }

    fn apply_basic_filter(&self, tokens: Vec<CatalogToken>) -> Vec<CatalogToken> {
        tokens
            .into_iter()
            .filter(|t| {
                t.volume_24h >= self.cfg.min_liquidity_usd
                    && t.fdv <= self.cfg.max_fdv_usd
                    && t.price_usd > 0.0
                    && is_valid_mint(&t.mint)
            })
            .collect()
    }

    /// Cache the tokens and atomically replace the monitored set.
    fn install(&mut self, tokens: Vec<CatalogToken>, now: i64) -> usize {
        self.publish_monitored_set(&tokens);
        let count = tokens.len();
        self.cache = Some(UniverseCache { tokens, fetched_at: now });
        count
    }

    /// Swap the monitored set and evict rolling state of removed mints.
    ///
    /// The new set is built off-lock; only the swap itself holds the write
    /// lock.
    fn publish_monitored_set(&self, tokens: &[CatalogToken]) {
        let next: HashSet<String> = tokens.iter().map(|t| t.mint.clone()).collect();

        let removed: Vec<String> = {
            let current = self.monitored.read().unwrap();
            current.difference(&next).cloned().collect()
        };

        *self.monitored.write().unwrap() = next;

        for mint in removed {
            let _ = self.evict_tx.send(mint);
        }
    }

    /// Budgeted external fetch. Returns whatever accumulated before the
    /// budget or the API gave out; every completed batch has already been
    /// written through to the store.
    async fn refresh_from_external(&mut self, now: i64) -> Vec<CatalogToken> {
        let Some(list) = self.ensure_coin_list(now).await else {
            return Vec::new();
        };

        let ids: Vec<String> = list.iter().map(|e| e.catalog_id.clone()).collect();
        let mut accumulated: Vec<CatalogToken> = Vec::new();

        for (batch_idx, chunk) in ids.chunks(self.cfg.price_batch_size).enumerate() {
            if batch_idx > 0 {
                tokio::time::sleep(Duration::from_secs(self.cfg.inter_batch_delay_secs)).await;
            }

            let quotes = match self.fetch_batch_with_retry(chunk, now).await {
                Some(quotes) => quotes,
                None => {
                    log::warn!(
                        "⚠️  Catalog refresh stopped after {} batches ({} tokens accumulated)",
                        batch_idx,
                        accumulated.len()
                    );
                    break;
                }
            };

            let batch: Vec<CatalogToken> = list
                .iter()
                .filter(|entry| quotes.contains_key(&entry.catalog_id))
                .map(|entry| {
                    let quote = &quotes[&entry.catalog_id];
                    CatalogToken {
                        catalog_id: entry.catalog_id.clone(),
                        mint: entry.mint.clone(),
                        symbol: entry.symbol.clone(),
                        name: entry.name.clone(),
                        price_usd: quote.price_usd,
                        volume_24h: quote.volume_24h,
                        market_cap: quote.market_cap,
                        fdv: quote.fdv,
                        updated_at: now,
                    }
                })
                .collect();

            // Write-through before the next batch is even requested
            let store = self.store.clone();
            let network = self.cfg.network.clone();
            let persisted = store::with_retry("catalog batch write", 30, || {
                store.upsert_catalog_batch(&network, &batch)
            })
            .await;
            if let Err(e) = persisted {
                log::warn!("⚠️  Catalog write-through failed, stopping refresh: {}", e);
                break;
            }

            log::debug!("   ├─ Batch {}: {} tokens persisted", batch_idx + 1, batch.len());
            accumulated.extend(batch);
        }

        accumulated
    }

    /// Fetch (or reuse) the filtered coin list.
    async fn ensure_coin_list(&mut self, now: i64) -> Option<Vec<CoinListEntry>> {
        if let Some((list, fetched_at)) = &self.coin_list {
            if now - fetched_at < self.cfg.coin_list_ttl_secs {
                return Some(list.clone());
            }
        }

        if !self.budget.try_take(now) {
            log::warn!("🚦 Daily catalog budget exhausted, skipping coin list fetch");
            return None;
        }

        self.pace().await;
        match self.source.coin_list().await {
            Ok(list) => {
                log::info!("📜 Coin list fetched: {} network-tagged ids", list.len());
                self.coin_list = Some((list.clone(), now));
                Some(list)
            }
            Err(e) => {
                log::warn!("⚠️  Coin list fetch failed: {}", e);
                None
            }
        }
    }

    /// One price batch with 429 handling. None means budget or retries ran
    /// out and the refresh should stop with what it has.
    async fn fetch_batch_with_retry(
        &mut self,
        ids: &[String],
        now: i64,
    ) -> Option<std::collections::HashMap<String, crate::catalog::PriceQuote>> {
        let mut attempts = 0;
        loop {
            if !self.budget.try_take(now) {
                log::warn!("🚦 Daily catalog budget exhausted mid-refresh");
                return None;
            }

            self.pace().await;
            match self.source.price_batch(ids).await {
                Ok(quotes) => return Some(quotes),
                Err(CatalogError::RateLimited) => {
                    attempts += 1;
                    if attempts > self.cfg.catalog_max_retries {
                        log::warn!("⚠️  Rate limit retries exhausted for batch");
                        return None;
                    }
                    log::warn!(
                        "⏳ Catalog rate limited, waiting 60s (attempt {} of {})",
                        attempts,
                        self.cfg.catalog_max_retries
                    );
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
                Err(e) => {
                    log::warn!("⚠️  Price batch failed: {}", e);
                    return None;
                }
            }
        }
    }

    /// Observe the minimum spacing between external requests.
    async fn pace(&self) {
        tokio::time::sleep(Duration::from_secs(self.cfg.min_request_interval_secs)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PriceQuote;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    // Real mainnet mints, guaranteed to pass the 32-byte base58 check
    const GOOD_MINT: &str = "DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263";
    const GOOD_MINT_2: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

    struct MockSource {
        list: Vec<CoinListEntry>,
        quotes: HashMap<String, PriceQuote>,
        list_calls: AtomicU32,
        batch_calls: AtomicU32,
        fail_after_batches: Option<u32>,
    }

    impl MockSource {
        fn new(list: Vec<CoinListEntry>, quotes: HashMap<String, PriceQuote>) -> Self {
            Self {
                list,
                quotes,
                list_calls: AtomicU32::new(0),
                batch_calls: AtomicU32::new(0),
                fail_after_batches: None,
            }
        }
    }

    #[async_trait]
    impl CatalogSource for MockSource {
        async fn coin_list(&self) -> Result<Vec<CoinListEntry>, CatalogError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.list.clone())
        }

        async fn price_batch(
            &self,
            ids: &[String],
        ) -> Result<HashMap<String, PriceQuote>, CatalogError> {
            let call = self.batch_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(limit) = self.fail_after_batches {
                if call >= limit {
                    return Err(CatalogError::Http("connection reset".to_string()));
                }
            }
            Ok(ids
                .iter()
                .filter_map(|id| self.quotes.get(id).map(|q| (id.clone(), q.clone())))
                .collect())
        }
    }

    fn entry(id: &str, mint: &str) -> CoinListEntry {
        CoinListEntry {
            catalog_id: id.to_string(),
            symbol: id.to_uppercase(),
            name: format!("{} token", id),
            mint: mint.to_string(),
        }
    }

    fn quote(volume: f64) -> PriceQuote {
        PriceQuote {
            price_usd: 0.5,
            market_cap: 1_000_000.0,
            volume_24h: volume,
            fdv: 1_000_000.0,
            last_updated_at: 0,
        }
    }

    fn test_config() -> Config {
        let mut cfg = Config::from_env();
        cfg.network = "solana".to_string();
        cfg.min_fresh_count = 1;
        cfg.min_request_interval_secs = 0;
        cfg.inter_batch_delay_secs = 0;
        cfg.price_batch_size = 1;
        cfg.min_liquidity_usd = 10_000.0;
        cfg.max_fdv_usd = 5_000_000.0;
        cfg
    }

    fn make_manager(
        cfg: Config,
        source: Arc<MockSource>,
    ) -> (UniverseManager, mpsc::UnboundedReceiver<String>) {
        let store = Store::open_in_memory().unwrap();
        let (evict_tx, evict_rx) = mpsc::unbounded_channel();
        (
            UniverseManager::new(store, source, cfg, evict_tx),
            evict_rx,
        )
    }

    #[tokio::test]
    async fn test_external_refresh_publishes_and_persists() {
        let source = Arc::new(MockSource::new(
            vec![entry("coin-a", GOOD_MINT), entry("coin-b", GOOD_MINT_2)],
            HashMap::from([
                ("coin-a".to_string(), quote(50_000.0)),
                ("coin-b".to_string(), quote(80_000.0)),
            ]),
        ));
        let (mut manager, _evict_rx) = make_manager(test_config(), source.clone());
        let now = 1_700_000_000;

        let count = manager.refresh(now).await;
        assert_eq!(count, 2);
        assert!(manager.monitored().read().unwrap().contains(GOOD_MINT));

        // Write-through happened batch by batch
        let persisted = manager
            .store
            .fresh_catalog_tokens("solana", now + 1, 3_600)
            .unwrap();
        assert_eq!(persisted.len(), 2);
        assert_eq!(source.batch_calls.load(Ordering::SeqCst), 2); // batch size 1
    }

    #[tokio::test]
    async fn test_memory_cache_short_circuits() {
        let source = Arc::new(MockSource::new(
            vec![entry("coin-a", GOOD_MINT)],
            HashMap::from([("coin-a".to_string(), quote(50_000.0))]),
        ));
        let (mut manager, _evict_rx) = make_manager(test_config(), source.clone());
        let now = 1_700_000_000;

        manager.refresh(now).await;
        let calls_after_first = source.batch_calls.load(Ordering::SeqCst);

        // Second refresh inside the memory TTL touches no source
        manager.refresh(now + 3_600).await;
        assert_eq!(source.batch_calls.load(Ordering::SeqCst), calls_after_first);
        assert_eq!(source.list_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_external_keeps_previous_set() {
        // First refresh succeeds, then the API starts returning nothing
        let source = Arc::new(MockSource::new(
            vec![entry("coin-a", GOOD_MINT)],
            HashMap::from([("coin-a".to_string(), quote(50_000.0))]),
        ));
        let mut cfg = test_config();
        cfg.memory_ttl_secs = 10; // force cache expiry on second tick
        let (mut manager, _evict_rx) = make_manager(cfg, source);
        let now = 1_700_000_000;

        assert_eq!(manager.refresh(now).await, 1);

        // Cache expired, store has the fresh row, so the set survives on
        // rehydration even if the external side would be empty
        let count = manager.refresh(now + 100).await;
        assert_eq!(count, 1);
        assert!(manager.monitored().read().unwrap().contains(GOOD_MINT));
    }

    #[tokio::test]
    async fn test_budget_zero_makes_no_external_calls() {
        let source = Arc::new(MockSource::new(
            vec![entry("coin-a", GOOD_MINT)],
            HashMap::from([("coin-a".to_string(), quote(50_000.0))]),
        ));
        let mut cfg = test_config();
        cfg.daily_request_budget = 0;
        let (mut manager, _evict_rx) = make_manager(cfg, source.clone());
        let now = 1_700_000_000;

        // Empty store, zero budget: set stays empty, no HTTP at all
        assert_eq!(manager.refresh(now).await, 0);
        assert_eq!(source.list_calls.load(Ordering::SeqCst), 0);
        assert_eq!(source.batch_calls.load(Ordering::SeqCst), 0);

        // With fresh rows in the store, rehydration works budget-free
        manager
            .store
            .upsert_catalog_batch(
                "solana",
                &[CatalogToken {
                    catalog_id: "coin-a".to_string(),
                    mint: GOOD_MINT.to_string(),
                    symbol: "A".to_string(),
                    name: "A token".to_string(),
                    price_usd: 0.5,
                    volume_24h: 50_000.0,
                    market_cap: 1_000_000.0,
                    fdv: 1_000_000.0,
                    updated_at: now,
                }],
            )
            .unwrap();

        assert_eq!(manager.refresh(now + 10).await, 1);
        assert_eq!(source.list_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_partial_refresh_keeps_completed_batches() {
        let mut source = MockSource::new(
            vec![entry("coin-a", GOOD_MINT), entry("coin-b", GOOD_MINT_2)],
            HashMap::from([
                ("coin-a".to_string(), quote(50_000.0)),
                ("coin-b".to_string(), quote(80_000.0)),
            ]),
        );
        source.fail_after_batches = Some(1); // second batch dies
        let (mut manager, _evict_rx) = make_manager(test_config(), Arc::new(source));
        let now = 1_700_000_000;

        let count = manager.refresh(now).await;
        assert_eq!(count, 1); // only the first batch made it

        // The completed batch is durable: write-through, no rollback
        let persisted = manager
            .store
            .fresh_catalog_tokens("solana", now + 1, 3_600)
            .unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].catalog_id, "coin-a");
    }

    #[tokio::test]
    async fn test_basic_filter_rejects_candidates() {
        let mut thin = quote(500.0); // under min liquidity
        thin.volume_24h = 500.0;
        let mut bloated = quote(50_000.0);
        bloated.fdv = 10_000_000.0; // over max fdv
        let mut free = quote(50_000.0);
        free.price_usd = 0.0;

        let source = Arc::new(MockSource::new(
            vec![
                entry("thin", GOOD_MINT),
                entry("bloated", GOOD_MINT_2),
                entry("free", "So11111111111111111111111111111111111111112"),
                entry("bad-mint", "not-a-mint"),
            ],
            HashMap::from([
                ("thin".to_string(), thin),
                ("bloated".to_string(), bloated),
                ("free".to_string(), free),
                ("bad-mint".to_string(), quote(50_000.0)),
            ]),
        ));
        let mut cfg = test_config();
        cfg.price_batch_size = 10;
        let (mut manager, _evict_rx) = make_manager(cfg, source);

        let count = manager.refresh(1_700_000_000).await;
        assert_eq!(count, 0); // every candidate fails the basic filter
    }

    #[tokio::test]
    async fn test_publish_evicts_removed_mints() {
        let source = Arc::new(MockSource::new(
            vec![entry("coin-a", GOOD_MINT)],
            HashMap::from([("coin-a".to_string(), quote(50_000.0))]),
        ));
        let (manager, mut evict_rx) = make_manager(test_config(), source);

        // Seed a previous generation directly
        manager
            .monitored
            .write()
            .unwrap()
            .insert("OldMint111".to_string());

        manager.publish_monitored_set(&[CatalogToken {
            catalog_id: "coin-a".to_string(),
            mint: GOOD_MINT.to_string(),
            symbol: "A".to_string(),
            name: "A token".to_string(),
            price_usd: 0.5,
            volume_24h: 50_000.0,
            market_cap: 1_000_000.0,
            fdv: 1_000_000.0,
            updated_at: 0,
        }]);

        assert_eq!(evict_rx.try_recv().unwrap(), "OldMint111");
        let set = manager.monitored.read().unwrap();
        assert!(set.contains(GOOD_MINT));
        assert!(!set.contains("OldMint111"));
    }

    #[test]
    fn test_budget_resets_on_day_change() {
        let mut budget = RequestBudget::new(2);
        let day1 = 86_400 * 100;
        assert!(budget.try_take(day1));
        assert!(budget.try_take(day1));
        assert!(!budget.try_take(day1));

        // Next day: counter resets
        assert!(budget.try_take(day1 + 86_400));
    }
}
