//! Transaction detail enrichment.
//!
//! Log notifications only carry the signature and the log lines; amounts
//! and mints come from a follow-up POST to the enrichment endpoint:
//! request body `{"transactions": ["<signature>"]}`, response an array of
//! parsed transaction objects with `timestamp`, `tokenTransfers` and
//! `feePayer` fields.
//!
//! Each fetch carries a 15s deadline and retries transient HTTP failures
//! twice before giving up; a malformed or empty response is reported as
//! None rather than an error so the ingestor can drop the event and move
//! on.

use serde_json::{json, Value};
use std::time::Duration;

const FETCH_DEADLINE: Duration = Duration::from_secs(15);
const FETCH_RETRIES: u32 = 2;

/// One leg of a transaction's token movement. Amounts keep their sign:
/// negative means the account spent the token.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenTransfer {
    pub mint: String,
    pub amount: f64,
}

/// Parsed transaction details relevant to the pipeline.
#[derive(Debug, Clone, Default)]
pub struct EnrichedTx {
    pub timestamp: Option<i64>,
    pub fee_payer: Option<String>,
    pub transfers: Vec<TokenTransfer>,
}

#[derive(Debug)]
pub enum EnrichError {
    Http(String),
}

impl std::fmt::Display for EnrichError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnrichError::Http(msg) => write!(f, "enrichment HTTP error: {}", msg),
        }
    }
}

impl std::error::Error for EnrichError {}

/// Client for the enrichment endpoint.
pub struct EnrichClient {
    http: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl EnrichClient {
    pub fn new(url: &str, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.to_string(),
            api_key,
        }
    }

    /// Fetch details for one signature.
    ///
    /// Ok(None) means the endpoint answered but had nothing usable for
    /// this signature (not yet indexed, or an unparsable shape).
    pub async fn fetch(&self, signature: &str) -> Result<Option<EnrichedTx>, EnrichError> {
        let url = match &self.api_key {
            Some(key) => format!("{}?api-key={}", self.url, key),
            None => self.url.clone(),
        };
        let body = json!({ "transactions": [signature] });

        let mut last_err = String::new();
        for attempt in 0..=FETCH_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(500 * 2u64.pow(attempt - 1))).await;
            }

            let response = self
                .http
                .post(&url)
                .timeout(FETCH_DEADLINE)
                .json(&body)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    let value: Value = resp
                        .json()
                        .await
                        .map_err(|e| EnrichError::Http(e.to_string()))?;
                    return Ok(parse_enriched_response(&value));
                }
                Ok(resp) if resp.status().is_server_error() => {
                    last_err = format!("status {}", resp.status());
                }
                Ok(resp) => {
                    // 4xx is not going to improve with retries
                    return Err(EnrichError::Http(format!("status {}", resp.status())));
                }
                Err(e) => {
                    last_err = e.to_string();
                }
            }
        }

        Err(EnrichError::Http(format!(
            "fetch failed after {} attempts: {}",
            FETCH_RETRIES + 1,
            last_err
        )))
    }
}

/// Pull the first transaction object out of the response array.
pub fn parse_enriched_response(value: &Value) -> Option<EnrichedTx> {
    let tx = value.as_array()?.first()?;

    let transfers = tx
        .get("tokenTransfers")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|t| {
                    let mint = t.get("mint")?.as_str()?;
                    let amount = parse_amount(t.get("tokenAmount")?)?;
                    Some(TokenTransfer {
                        mint: mint.to_string(),
                        amount,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Some(EnrichedTx {
        timestamp: tx.get("timestamp").and_then(Value::as_i64),
        fee_payer: tx
            .get("feePayer")
            .and_then(Value::as_str)
            .map(str::to_string),
        transfers,
    })
}

/// Token amounts arrive either as numbers or as decimal strings.
fn parse_amount(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
