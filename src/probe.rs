//! Liquidity probe: a simulated swap against the aggregator.
//!
//! Before a signal is emitted the engine requests a quote for a small
//! USDC -> target swap and reads the reported price impact. The impact is
//! mapped onto a coarse liquidity estimate; thin pools produce outsized
//! impact on even a $10 probe and get filtered out.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::constants::USDC_MINT;

const QUOTE_DEADLINE: Duration = Duration::from_secs(10);

/// USDC carries six decimals on mainnet
const USDC_DECIMALS_FACTOR: f64 = 1_000_000.0;

/// Probe outcome: reported impact plus the bucketed liquidity estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeQuote {
    pub price_impact_pct: f64,
    pub liquidity_usd: f64,
}

#[derive(Debug)]
pub enum ProbeError {
    Http(String),
    Parse(String),
}

impl std::fmt::Display for ProbeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeError::Http(msg) => write!(f, "probe HTTP error: {}", msg),
            ProbeError::Parse(msg) => write!(f, "probe parse error: {}", msg),
        }
    }
}

impl std::error::Error for ProbeError {}

/// Interface to the liquidity gate, mockable in tests.
#[async_trait]
pub trait LiquidityProbe: Send + Sync {
    async fn check(&self, mint: &str) -> Result<ProbeQuote, ProbeError>;
}

/// Bucketed liquidity estimate from observed price impact.
pub fn liquidity_for_impact(price_impact_pct: f64) -> f64 {
    if price_impact_pct < 0.5 {
        50_000.0
    } else if price_impact_pct < 1.0 {
        25_000.0
    } else if price_impact_pct < 2.0 {
        15_000.0
    } else if price_impact_pct < 3.0 {
        10_000.0
    } else {
        5_000.0
    }
}

/// Aggregator-backed probe (`GET /quote`).
pub struct QuoteProbe {
    http: reqwest::Client,
    base_url: String,
    probe_usd_amount: f64,
}

impl QuoteProbe {
    pub fn new(base_url: &str, probe_usd_amount: f64) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            probe_usd_amount,
        }
    }
}

#[async_trait]
impl LiquidityProbe for QuoteProbe {
    async fn check(&self, mint: &str) -> Result<ProbeQuote, ProbeError> {
        let amount = (self.probe_usd_amount * USDC_DECIMALS_FACTOR) as u64;
        let url = format!(
            "{}/quote?inputMint={}&outputMint={}&amount={}",
            self.base_url, USDC_MINT, mint, amount
        );

        let response = self
            .http
            .get(&url)
            .timeout(QUOTE_DEADLINE)
            .send()
            .await
            .map_err(|e| ProbeError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProbeError::Http(format!("quote returned {}", response.status())));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| ProbeError::Parse(e.to_string()))?;

        parse_quote(&json)
    }
}

/// Pull the price impact out of a quote response.
///
/// The field arrives as a decimal string on current deployments but has
/// been a bare number historically, so both shapes are accepted. A quote
/// with no route plan means the aggregator found no path and the token is
/// effectively illiquid.
pub fn parse_quote(json: &Value) -> Result<ProbeQuote, ProbeError> {
    let has_route = json
        .get("routePlan")
        .and_then(Value::as_array)
        .map(|plan| !plan.is_empty())
        .unwrap_or(false);
    if !has_route {
        return Err(ProbeError::Parse("quote carries no route plan".to_string()));
    }

    let price_impact_pct = match json.get("priceImpactPct") {
        Some(Value::String(s)) => s
            .parse::<f64>()
            .map_err(|e| ProbeError::Parse(format!("bad priceImpactPct: {}", e)))?,
        Some(Value::Number(n)) => n.as_f64().unwrap_or(f64::MAX),
        _ => return Err(ProbeError::Parse("missing priceImpactPct".to_string())),
    };

    Ok(ProbeQuote {
        price_impact_pct,
        liquidity_usd: liquidity_for_impact(price_impact_pct),
    })
}
