//! Signal engine: the single consumer of dispatched events.
//!
//! Owns all per-mint rolling state (no locks needed, single task), updates
//! it per event, evaluates the composite buy rule, applies the cooldown
//! and the liquidity probe gate, and persists emitted signals.
//!
//! The composite rule is an OR over eight conditions by default; the
//! combinator is configurable (`SIGNAL_RULE_MODE=all` demands every
//! condition at once) because the permissive OR is a property of the
//! observed deployment, not a law of nature.

use crate::config::{Config, SignalRuleMode};
use crate::ingest::DispatchQueue;
use crate::probe::LiquidityProbe;
use crate::state::MintRollingState;
use crate::store::{self, Store, StoreError};
use crate::types::{MintMetrics, SwapEvent};
use crate::universe::MonitoredSet;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Outcome of evaluating the composite rule.
#[derive(Debug, PartialEq)]
pub struct RuleVerdict {
    pub fired: bool,
    pub reasons: Vec<&'static str>,
}

/// Evaluate the composite buy rule against an indicator snapshot.
///
/// Returns the verdict plus the names of every condition that held, which
/// become the persisted `reasons` string.
pub fn evaluate_rule(cfg: &Config, m: &MintMetrics) -> RuleVerdict {
    let mut reasons = Vec::new();
    let mut held = 0usize;
    let mut checked = 0usize;

    let mut check = |name: &'static str, condition: bool| {
        checked += 1;
        if condition {
            held += 1;
            reasons.push(name);
        }
    };

    check("vol_spike", m.volume_spike >= cfg.min_volume_spike);
    check("unique_buyers", m.unique_buyers >= cfg.min_unique_buyers);
    // No sells with buy volume present reads as positive flow
    check(
        "net_flow",
        match m.net_flow {
            Some(ratio) => ratio > 1.0,
            None => m.buy_vol_5m > 0.0,
        },
    );
    check(
        "rsi_oversold",
        m.rsi.map(|r| r <= cfg.max_rsi_oversold).unwrap_or(false),
    );
    check("ema_bull", m.ema_bull);
    check("lp_boost", m.liquidity_boost);
    check("avg_vol", m.avg_vol_60m >= cfg.min_avg_vol_usd);
    check("vol_5m", m.vol_5m >= cfg.min_vol_5m_usd);

    let fired = match cfg.signal_rule_mode {
        SignalRuleMode::Any => held > 0,
        SignalRuleMode::All => held == checked,
    };

    RuleVerdict { fired, reasons }
}

/// Exit advisory, logged for observability only (never persisted).
fn exit_advisory(m: &MintMetrics) -> bool {
    m.rsi.map(|r| r > 70.0).unwrap_or(false)
        || m.net_flow.map(|ratio| ratio < 1.0).unwrap_or(false)
}

/// The engine task.
pub struct SignalEngine {
    cfg: Config,
    store: Store,
    probe: Arc<dyn LiquidityProbe>,
    monitored: MonitoredSet,
    states: HashMap<String, MintRollingState>,
    notify_wake: mpsc::Sender<()>,
    fatal_tx: mpsc::Sender<String>,
}

impl SignalEngine {
    pub fn new(
        cfg: Config,
        store: Store,
        probe: Arc<dyn LiquidityProbe>,
        monitored: MonitoredSet,
        notify_wake: mpsc::Sender<()>,
        fatal_tx: mpsc::Sender<String>,
    ) -> Self {
        Self {
            cfg,
            store,
            probe,
            monitored,
            states: HashMap::new(),
            notify_wake,
            fatal_tx,
        }
    }

    /// Consume events and eviction notices until both channels close.
    pub async fn run(
        mut self,
        queue: Arc<DispatchQueue>,
        mut evict_rx: mpsc::UnboundedReceiver<String>,
    ) {
        log::info!("🚦 Signal engine running");
        loop {
            tokio::select! {
                event = queue.pop() => {
                    self.handle_event(event).await;
                }
                notice = evict_rx.recv() => {
                    match notice {
                        Some(mint) => self.evict(&mint),
                        None => {
                            log::info!("✅ Signal engine stopping (eviction channel closed)");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Drop a mint's rolling state after it leaves the monitored set.
    pub fn evict(&mut self, mint: &str) {
        if self.states.remove(mint).is_some() {
            log::debug!("🧹 Evicted rolling state for {}", mint);
        }
    }

    /// Number of mints with live rolling state.
    pub fn tracked_mints(&self) -> usize {
        self.states.len()
    }

    /// Apply one dispatched event: update state, evaluate, gate, emit.
    pub async fn handle_event(&mut self, event: SwapEvent) {
        // Defense in depth: nothing unmonitored allocates state here, even
        // if a stale event slipped through the ingestor's filter
        if !self.monitored.read().unwrap().contains(&event.mint) {
            return;
        }

        if !self.states.contains_key(&event.mint) {
            let mut state = MintRollingState::new(event.mint.clone());
            // Warm start after restart: candles and the cooldown anchor
            // are rebuilt from the store
            if let Ok(candles) = self.store.get_candles(&event.mint, 120) {
                state.seed_candles(candles);
            }
            if let Ok(Some(ts)) = self.store.last_signal_ts(&event.mint) {
                state.last_signal_ts = ts;
            }
            self.states.insert(event.mint.clone(), state);
        }
        // Event timestamps drive the clock: deterministic under replay
        // and within one second of wall time when live
        let now = event.ts;
        let (metrics, last_signal_ts) = {
            let state = self.states.get_mut(&event.mint).unwrap();
            state.on_swap(&event);
            (state.metrics(now), state.last_signal_ts)
        };

        if exit_advisory(&metrics) {
            log::info!(
                "📉 Exit advisory for {}: rsi={:?} net_flow={:?}",
                event.mint,
                metrics.rsi,
                metrics.net_flow
            );
        }

        let verdict = evaluate_rule(&self.cfg, &metrics);
        if !verdict.fired {
            return;
        }

        if now - last_signal_ts < self.cfg.signal_cooldown_secs {
            log::debug!(
                "⏭️  Cooldown holds {} ({}s since last signal)",
                event.mint,
                now - last_signal_ts
            );
            return;
        }

        // Liquidity probe gate: a failed probe closes the gate
        let quote = match self.probe.check(&event.mint).await {
            Ok(quote) => quote,
            Err(e) => {
                log::warn!("⚠️  Liquidity probe failed for {}: {}", event.mint, e);
                return;
            }
        };
        let passes = quote.liquidity_usd >= self.cfg.min_liquidity_usd
            && quote.price_impact_pct <= self.cfg.max_price_impact_pct;
        if !passes {
            log::info!(
                "🚫 Liquidity gate rejected {}: impact={:.2}% est=${:.0}",
                event.mint,
                quote.price_impact_pct,
                quote.liquidity_usd
            );
            return;
        }

        let symbol = self
            .store
            .symbol_for_mint(&event.mint)
            .ok()
            .flatten()
            .unwrap_or_else(|| short_mint(&event.mint));

        let reasons = verdict.reasons.join(",");
        let store = self.store.clone();
        let (mint, ema_cross, vol_spike) = (event.mint.clone(), metrics.ema_bull, metrics.volume_spike);
        let rsi = metrics.rsi.unwrap_or(0.0);
        let inserted = store::with_retry("signal insert", 30, || {
            store.insert_signal(&mint, &symbol, now, ema_cross, vol_spike, rsi, &reasons)
        })
        .await;

        match inserted {
            Ok(id) => {
                if let Some(state) = self.states.get_mut(&event.mint) {
                    state.last_signal_ts = now;
                }
                log::info!(
                    "🚨 Signal #{} {} ({}): {} [impact {:.2}%]",
                    id,
                    symbol,
                    event.mint,
                    reasons,
                    quote.price_impact_pct
                );
                // Dispatcher wakes at most once per pending batch
                let _ = self.notify_wake.try_send(());
            }
            Err(StoreError::Transient(msg)) => {
                log::warn!("⚠️  Signal insert still failing, giving up this event: {}", msg);
            }
            Err(StoreError::Permanent(msg)) => {
                let _ = self
                    .fatal_tx
                    .send(format!("store failure on signal insert: {}", msg))
                    .await;
            }
        }
    }
}

/// Abbreviate a mint for display when no catalog symbol is known.
fn short_mint(mint: &str) -> String {
    if mint.len() <= 8 {
        mint.to_string()
    } else {
        format!("{}…{}", &mint[..4], &mint[mint.len() - 4..])
    }
}
