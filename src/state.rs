//! In-memory rolling state per monitored mint.
//!
//! Each mint tracked by the engine owns one [`MintRollingState`]: a bounded
//! series of minute candles, a bounded ring of recent swaps, and the
//! liquidity-deposit flags. Both buffers cap at 120 entries and drop the
//! oldest, so memory stays constant per mint regardless of burst size.
//!
//! State is created on the first dispatched event for a mint and evicted
//! when the mint leaves the monitored set. Nothing here survives a restart;
//! the candle series is reseeded from the store's OHLCV buckets on demand.

use crate::indicators;
use crate::types::{Candle, MintMetrics, SwapEvent};
use std::collections::{HashSet, VecDeque};

/// Bound for the candle series and the swap ring
pub const WINDOW_CAPACITY: usize = 120;

/// Swaps below this USD size are excluded from the 5-minute flow sums
/// (they still count toward the distinct-buyer set)
pub const ICEBERG_MIN_USD: f64 = 50.0;

/// Deposits above this size arm the liquidity boost
pub const LP_DEPOSIT_MIN_USD: f64 = 5_000.0;

/// How long the liquidity boost stays armed after a deposit
pub const LP_BOOST_TTL_SECS: i64 = 600;

/// Flow window length
const FLOW_WINDOW_SECS: i64 = 300;

/// Per-mint rolling window container.
#[derive(Debug, Clone)]
pub struct MintRollingState {
    pub mint: String,

    /// Minute candles, strictly increasing bucket_ts, newest last
    candles: Vec<Candle>,

    /// Recent swaps, non-decreasing ts, newest last
    swaps: VecDeque<SwapEvent>,

    /// Cooldown anchor for signal emission
    pub last_signal_ts: i64,

    /// Timestamp of the last qualifying liquidity deposit (0 = none)
    last_deposit_ts: i64,
}

impl MintRollingState {
    pub fn new(mint: String) -> Self {
        Self {
            mint,
            candles: Vec::with_capacity(WINDOW_CAPACITY),
            swaps: VecDeque::with_capacity(WINDOW_CAPACITY),
            last_signal_ts: 0,
            last_deposit_ts: 0,
        }
    }

    /// Reseed the candle series from persisted buckets (oldest-first input).
    ///
    /// Used after a restart so indicator math does not start cold.
    pub fn seed_candles(&mut self, mut candles: Vec<Candle>) {
        if candles.len() > WINDOW_CAPACITY {
            candles.drain(..candles.len() - WINDOW_CAPACITY);
        }
        self.candles = candles;
    }

    /// Apply one dispatched event.
    ///
    /// Updates the candle for the event's minute bucket (or creates it),
    /// pushes the swap into the ring, and arms the liquidity boost on
    /// qualifying deposits. Both buffers trim to capacity afterwards.
    pub fn on_swap(&mut self, event: &SwapEvent) {
        if let Some(deposit) = event.deposit_usd {
            if deposit > LP_DEPOSIT_MIN_USD {
                self.last_deposit_ts = event.ts;
            }
        }

        if event.price_usd > 0.0 {
            self.merge_candle(event);
        }

        if event.is_buy || event.is_sell {
            self.swaps.push_back(event.clone());
            while self.swaps.len() > WINDOW_CAPACITY {
                self.swaps.pop_front();
            }
        }
    }

    fn merge_candle(&mut self, event: &SwapEvent) {
        let bucket_ts = event.ts - event.ts.rem_euclid(60);
        let price = event.price_usd;

        match self.candles.last().map(|c| c.bucket_ts) {
            Some(last_ts) if bucket_ts == last_ts => {
                let candle = self.candles.last_mut().unwrap();
                candle.h = candle.h.max(price);
                candle.l = candle.l.min(price);
                candle.c = price;
                candle.v += event.vol_usd;
            }
            Some(last_ts) if bucket_ts < last_ts => {
                // Late arrival: merge into its bucket if still buffered,
                // otherwise drop to keep the series strictly ordered
                if let Some(candle) =
                    self.candles.iter_mut().find(|c| c.bucket_ts == bucket_ts)
                {
                    candle.h = candle.h.max(price);
                    candle.l = candle.l.min(price);
                    candle.v += event.vol_usd;
                }
            }
            _ => {
                self.candles.push(Candle {
                    bucket_ts,
                    o: price,
                    h: price,
                    l: price,
                    c: price,
                    v: event.vol_usd,
                });
                if self.candles.len() > WINDOW_CAPACITY {
                    let excess = self.candles.len() - WINDOW_CAPACITY;
                    self.candles.drain(..excess);
                }
            }
        }
    }

    /// Distinct buyers and buy/sell USD volume over the last five minutes.
    ///
    /// Small swaps (under [`ICEBERG_MIN_USD`]) count toward the buyer set
    /// but not toward the volume sums.
    fn flow_window(&self, now: i64) -> (usize, f64, f64) {
        let cutoff = now - FLOW_WINDOW_SECS;
        let mut buyers: HashSet<&str> = HashSet::new();
        let mut buy_vol = 0.0;
        let mut sell_vol = 0.0;

        for swap in self.swaps.iter().rev() {
            if swap.ts < cutoff {
                break; // ring is time-ordered
            }
            if let Some(buyer) = &swap.buyer {
                buyers.insert(buyer.as_str());
            }
            if swap.vol_usd < ICEBERG_MIN_USD {
                continue;
            }
            if swap.is_buy {
                buy_vol += swap.vol_usd;
            } else if swap.is_sell {
                sell_vol += swap.vol_usd;
            }
        }

        (buyers.len(), buy_vol, sell_vol)
    }

    /// Whether a qualifying deposit landed within the boost TTL.
    pub fn liquidity_boost(&self, now: i64) -> bool {
        self.last_deposit_ts > 0 && now - self.last_deposit_ts < LP_BOOST_TTL_SECS
    }

    /// Compute the indicator snapshot for the current window.
    pub fn metrics(&self, now: i64) -> MintMetrics {
        let closes: Vec<f64> = self.candles.iter().map(|c| c.c).collect();

        // Bucket averages run over completed buckets only; the newest
        // candle is still accumulating and would dilute its own baseline
        let completed = &self.candles[..self.candles.len().saturating_sub(1)];
        let avg_vol = |span: usize| -> f64 {
            let tail = &completed[completed.len().saturating_sub(span)..];
            if tail.is_empty() {
                0.0
            } else {
                tail.iter().map(|c| c.v).sum::<f64>() / tail.len() as f64
            }
        };
        let avg_vol_30m = avg_vol(30);
        let avg_vol_60m = avg_vol(60);

        let (unique_buyers, buy_vol_5m, sell_vol_5m) = self.flow_window(now);
        let vol_5m = buy_vol_5m + sell_vol_5m;

        MintMetrics {
            ema_bull: indicators::ema_bull(&closes),
            rsi: indicators::rsi(&closes, indicators::WILDER_PERIOD),
            atr: indicators::atr(&self.candles, indicators::WILDER_PERIOD),
            vol_5m,
            avg_vol_30m,
            avg_vol_60m,
            volume_spike: indicators::volume_spike(vol_5m, avg_vol_30m),
            net_flow: indicators::net_flow(buy_vol_5m, sell_vol_5m),
            buy_vol_5m,
            sell_vol_5m,
            unique_buyers,
            liquidity_boost: self.liquidity_boost(now),
        }
    }

    #[cfg(test)]
    pub fn candle_count(&self) -> usize {
        self.candles.len()
    }

    #[cfg(test)]
    pub fn swap_count(&self) -> usize {
        self.swaps.len()
    }

    #[cfg(test)]
    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn swap(ts: i64, price: f64, vol: f64, buyer: &str, is_buy: bool) -> SwapEvent {
        SwapEvent {
            mint: "test_mint".to_string(),
            price_usd: price,
            vol_usd: vol,
            ts,
            buyer: Some(buyer.to_string()),
            is_buy,
            is_sell: !is_buy,
            deposit_usd: None,
        }
    }

    fn deposit(ts: i64, usd: f64) -> SwapEvent {
        SwapEvent {
            mint: "test_mint".to_string(),
            price_usd: 0.0,
            vol_usd: 0.0,
            ts,
            buyer: None,
            is_buy: false,
            is_sell: false,
            deposit_usd: Some(usd),
        }
    }

    #[test]
    fn test_ring_bounds_hold() {
        // 300 swaps in distinct minutes: both buffers cap at 120
        let mut state = MintRollingState::new("test_mint".to_string());
        for i in 0..300 {
            state.on_swap(&swap(1_000_000 + i * 60, 1.0, 100.0, "w", true));
        }
        assert_eq!(state.candle_count(), WINDOW_CAPACITY);
        assert_eq!(state.swap_count(), WINDOW_CAPACITY);
    }

    #[test]
    fn test_candle_series_strictly_ordered() {
        let mut state = MintRollingState::new("test_mint".to_string());
        let base = 1_000_020; // mid-minute

        state.on_swap(&swap(base, 1.0, 100.0, "a", true));
        state.on_swap(&swap(base + 10, 2.0, 100.0, "b", true)); // same bucket
        state.on_swap(&swap(base + 60, 3.0, 100.0, "c", true));
        state.on_swap(&swap(base + 180, 4.0, 100.0, "d", true));

        let buckets: Vec<i64> = state.candles().iter().map(|c| c.bucket_ts).collect();
        assert_eq!(buckets.len(), 3);
        assert!(buckets.windows(2).all(|w| w[0] < w[1]));

        // Same-bucket swaps merged
        let first = &state.candles()[0];
        assert_eq!(first.o, 1.0);
        assert_eq!(first.h, 2.0);
        assert_eq!(first.c, 2.0);
        assert_eq!(first.v, 200.0);
    }

    #[test]
    fn test_late_event_merges_or_drops() {
        let mut state = MintRollingState::new("test_mint".to_string());
        let base = 1_000_020;

        state.on_swap(&swap(base, 1.0, 100.0, "a", true));
        state.on_swap(&swap(base + 120, 2.0, 100.0, "b", true));

        // Late swap for the first bucket merges there
        state.on_swap(&swap(base + 5, 5.0, 50.0, "c", true));
        assert_eq!(state.candle_count(), 2);
        assert_eq!(state.candles()[0].h, 5.0);
        assert_eq!(state.candles()[0].v, 150.0);

        // Ordering invariant still holds
        let buckets: Vec<i64> = state.candles().iter().map(|c| c.bucket_ts).collect();
        assert!(buckets.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_iceberg_filter() {
        // A sub-$50 buy counts for buyer diversity but not volume
        let mut state = MintRollingState::new("test_mint".to_string());
        let now = 1_000_000;

        state.on_swap(&swap(now - 30, 1.0, 30.0, "small_fish", true));
        state.on_swap(&swap(now - 20, 1.0, 500.0, "whale", true));
        state.on_swap(&swap(now - 10, 1.0, 200.0, "seller", false));

        let m = state.metrics(now);
        assert_eq!(m.unique_buyers, 3); // small_fish still counted
        assert_eq!(m.buy_vol_5m, 500.0); // 30 USD excluded
        assert_eq!(m.sell_vol_5m, 200.0);
    }

    #[test]
    fn test_flow_window_excludes_old_swaps() {
        let mut state = MintRollingState::new("test_mint".to_string());
        let now = 1_000_000;

        state.on_swap(&swap(now - 400, 1.0, 1_000.0, "early", true));
        state.on_swap(&swap(now - 100, 1.0, 300.0, "recent", true));

        let m = state.metrics(now);
        assert_eq!(m.buy_vol_5m, 300.0);
        assert_eq!(m.unique_buyers, 1);
    }

    #[test]
    fn test_liquidity_boost_arms_and_expires() {
        let mut state = MintRollingState::new("test_mint".to_string());
        let now = 1_000_000;

        // Below threshold: no boost
        state.on_swap(&deposit(now, 4_000.0));
        assert!(!state.liquidity_boost(now + 10));

        // Above threshold: boost for ten minutes
        state.on_swap(&deposit(now + 20, 8_000.0));
        assert!(state.liquidity_boost(now + 30));
        assert!(state.liquidity_boost(now + 20 + LP_BOOST_TTL_SECS - 1));
        assert!(!state.liquidity_boost(now + 20 + LP_BOOST_TTL_SECS));
    }

    #[test]
    fn test_deposit_does_not_enter_swap_ring() {
        let mut state = MintRollingState::new("test_mint".to_string());
        state.on_swap(&deposit(1_000, 10_000.0));
        assert_eq!(state.swap_count(), 0);
        assert_eq!(state.candle_count(), 0);
    }

    #[test]
    fn test_metrics_volume_spike_scenario() {
        // 25 quiet minutes at $1000/bucket, then a 5-swap burst of $3000
        // each inside one minute: spike = 15000 / (1000 * 5) = 3.0
        let mut state = MintRollingState::new("test_mint".to_string());
        let start = 600_000; // minute-aligned

        let quiet: Vec<Candle> = (0..25)
            .map(|i| Candle {
                bucket_ts: start + i * 60,
                o: 1.0,
                h: 1.0,
                l: 1.0,
                c: 1.0 + i as f64 * 0.01,
                v: 1_000.0,
            })
            .collect();
        state.seed_candles(quiet);

        let burst_start = start + 25 * 60;
        for i in 0..5 {
            state.on_swap(&swap(
                burst_start + i * 10,
                1.3,
                3_000.0,
                &format!("buyer_{}", i),
                true,
            ));
        }

        let now = burst_start + 50;
        let m = state.metrics(now);

        assert_eq!(m.unique_buyers, 5);
        assert_eq!(m.vol_5m, 15_000.0);
        // avg_vol_30m covers the 25 completed quiet buckets only
        assert!((m.avg_vol_30m - 1_000.0).abs() < 1e-9);
        assert!((m.volume_spike - 3.0).abs() < 1e-9, "spike was {}", m.volume_spike);
        assert_eq!(m.net_flow, None); // no sells in window
        assert!(m.rsi.is_some());
    }

    #[test]
    fn test_seed_candles_caps_at_capacity() {
        let mut state = MintRollingState::new("test_mint".to_string());
        let many: Vec<Candle> = (0..200)
            .map(|i| Candle {
                bucket_ts: i * 60,
                o: 1.0,
                h: 1.0,
                l: 1.0,
                c: 1.0,
                v: 10.0,
            })
            .collect();
        state.seed_candles(many);
        assert_eq!(state.candle_count(), WINDOW_CAPACITY);
        // Newest buckets kept
        assert_eq!(state.candles()[0].bucket_ts, 80 * 60);
    }
}
