//! Core data structures shared across the pipeline.

use serde::{Deserialize, Serialize};

/// One entry of the external token catalog, persisted in `token_catalog`.
///
/// Keyed by (catalog_id, network) in the store; `mint` must be a valid
/// on-chain address before the entry is admitted to the monitored set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogToken {
    pub catalog_id: String,
    pub mint: String,
    pub symbol: String,
    pub name: String,
    pub price_usd: f64,
    pub volume_24h: f64,
    pub market_cap: f64,
    pub fdv: f64,
    pub updated_at: i64,
}

/// Pool metadata keyed by mint, persisted in `pools`.
#[derive(Debug, Clone)]
pub struct PoolRecord {
    pub mint: String,
    pub first_seen_ts: i64,
    pub liq_usd: Option<f64>,
    pub fdv_usd: Option<f64>,
}

/// One-minute OHLCV bucket.
///
/// `bucket_ts` is floored to the minute boundary; `v` is cumulative USD
/// volume within the bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub bucket_ts: i64,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
    pub v: f64,
}

/// A parsed per-mint event dispatched from the ingestor to the engine.
///
/// `deposit_usd` is set for liquidity-deposit (pool-init) events; plain
/// swaps leave it None.
#[derive(Debug, Clone)]
pub struct SwapEvent {
    pub mint: String,
    pub price_usd: f64,
    pub vol_usd: f64,
    pub ts: i64,
    pub buyer: Option<String>,
    pub is_buy: bool,
    pub is_sell: bool,
    pub deposit_usd: Option<f64>,
}

/// Persisted emitted signal (row of `signals`).
#[derive(Debug, Clone)]
pub struct SignalRecord {
    pub id: i64,
    pub mint: String,
    pub symbol: String,
    pub signal_ts: i64,
    pub ema_cross: bool,
    pub vol_spike: f64,
    pub rsi: f64,
    pub reasons: String,
    pub notified: bool,
}

/// Indicator snapshot computed from a mint's rolling state.
///
/// `rsi`/`atr` are None while the window is too short for the period;
/// `net_flow` is None when the 5-minute window has no sell volume (the
/// engine treats None with buy volume present as positive flow).
#[derive(Debug, Clone)]
pub struct MintMetrics {
    pub ema_bull: bool,
    pub rsi: Option<f64>,
    pub atr: Option<f64>,
    pub vol_5m: f64,
    pub avg_vol_30m: f64,
    pub avg_vol_60m: f64,
    pub volume_spike: f64,
    pub net_flow: Option<f64>,
    pub buy_vol_5m: f64,
    pub sell_vol_5m: f64,
    pub unique_buyers: usize,
    pub liquidity_boost: bool,
}
