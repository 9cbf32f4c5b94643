//! External token catalog client.
//!
//! Two endpoints, both JSON over HTTP:
//! - `/coins/list?include_platform=true` - full id list with per-network
//!   platform addresses; fetched rarely and filtered to the target network
//! - `/simple/price?ids=...` - market data for a comma-separated id batch
//!
//! Responses are heterogeneous (missing platforms, string/number price
//! fields), so parsing walks `serde_json::Value` tolerantly and skips
//! malformed entries instead of failing the batch.
//!
//! The client does no pacing of its own: the universe manager owns the
//! request budget, the inter-request interval, and the 429 retry policy.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Catalog request failure.
#[derive(Debug)]
pub enum CatalogError {
    /// 429 from the API; caller waits out the rate window and retries
    RateLimited,
    Http(String),
    Parse(String),
}

impl std::fmt::Display for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogError::RateLimited => write!(f, "catalog API rate limited (429)"),
            CatalogError::Http(msg) => write!(f, "catalog HTTP error: {}", msg),
            CatalogError::Parse(msg) => write!(f, "catalog parse error: {}", msg),
        }
    }
}

impl std::error::Error for CatalogError {}

/// One row of the coin list, already filtered to the target network.
#[derive(Debug, Clone)]
pub struct CoinListEntry {
    pub catalog_id: String,
    pub symbol: String,
    pub name: String,
    pub mint: String,
}

/// Market data for one catalog id from the price endpoint.
#[derive(Debug, Clone, Default)]
pub struct PriceQuote {
    pub price_usd: f64,
    pub market_cap: f64,
    pub volume_24h: f64,
    pub fdv: f64,
    pub last_updated_at: i64,
}

/// Abstraction over the catalog API so the universe manager can be tested
/// without network access.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Full coin list filtered to ids with an address on this network.
    async fn coin_list(&self) -> Result<Vec<CoinListEntry>, CatalogError>;

    /// Market data batch; ids absent from the response are simply missing.
    async fn price_batch(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, PriceQuote>, CatalogError>;
}

/// HTTP client for the catalog API.
pub struct CatalogClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    network: String,
}

impl CatalogClient {
    pub fn new(base_url: &str, api_key: Option<String>, network: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            network: network.to_string(),
        }
    }

    async fn get_json(&self, path_and_query: &str) -> Result<Value, CatalogError> {
        let url = format!("{}{}", self.base_url, path_and_query);
        let mut request = self.http.get(&url).timeout(Duration::from_secs(30));
        if let Some(key) = &self.api_key {
            request = request.header("x-cg-demo-api-key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CatalogError::Http(e.to_string()))?;

        if response.status().as_u16() == 429 {
            return Err(CatalogError::RateLimited);
        }
        if !response.status().is_success() {
            return Err(CatalogError::Http(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| CatalogError::Parse(e.to_string()))
    }
}

#[async_trait]
impl CatalogSource for CatalogClient {
    async fn coin_list(&self) -> Result<Vec<CoinListEntry>, CatalogError> {
        let json = self.get_json("/coins/list?include_platform=true").await?;
        Ok(parse_coin_list(&json, &self.network))
    }

    async fn price_batch(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, PriceQuote>, CatalogError> {
        let query = format!(
            "/simple/price?ids={}&vs_currencies=usd&include_market_cap=true\
             &include_24hr_vol=true&include_24hr_change=true&include_last_updated_at=true",
            ids.join(",")
        );
        let json = self.get_json(&query).await?;
        Ok(parse_price_map(&json))
    }
}

/// Extract coin list entries carrying an address for `network`.
fn parse_coin_list(json: &Value, network: &str) -> Vec<CoinListEntry> {
    let Some(entries) = json.as_array() else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            let catalog_id = entry.get("id")?.as_str()?;
            let mint = entry
                .get("platforms")?
                .get(network)?
                .as_str()
                .filter(|s| !s.is_empty())?;
            Some(CoinListEntry {
                catalog_id: catalog_id.to_string(),
                symbol: entry
                    .get("symbol")
                    .and_then(|s| s.as_str())
                    .unwrap_or_default()
                    .to_string(),
                name: entry
                    .get("name")
                    .and_then(|s| s.as_str())
                    .unwrap_or_default()
                    .to_string(),
                mint: mint.to_string(),
            })
        })
        .collect()
}

/// Extract the id -> market data map from the price endpoint.
///
/// The endpoint reports market cap but no separate fully-diluted value;
/// fdv falls back to market cap so the admission filter stays meaningful.
fn parse_price_map(json: &Value) -> HashMap<String, PriceQuote> {
    let Some(object) = json.as_object() else {
        return HashMap::new();
    };

    object
        .iter()
        .filter_map(|(id, data)| {
            let price_usd = data.get("usd").and_then(Value::as_f64)?;
            let market_cap = data
                .get("usd_market_cap")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            Some((
                id.clone(),
                PriceQuote {
                    price_usd,
                    market_cap,
                    volume_24h: data
                        .get("usd_24h_vol")
                        .and_then(Value::as_f64)
                        .unwrap_or(0.0),
                    fdv: market_cap,
                    last_updated_at: data
                        .get("last_updated_at")
                        .and_then(Value::as_i64)
                        .unwrap_or(0),
                },
            ))
        })
        .collect()
}
