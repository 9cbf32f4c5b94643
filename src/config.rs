//! Runtime configuration from environment variables.

use std::env;

/// How the composite signal rule combines its conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalRuleMode {
    /// Any single condition fires the rule (default, permissive)
    Any,
    /// All enabled conditions must hold
    All,
}

/// Scanner configuration.
///
/// Loaded from environment variables with defaults matching the reference
/// deployment. `.env` is honored via dotenv from `main`.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database path
    pub store_path: String,
    /// Target network tag used in the catalog key
    pub network: String,

    // Notifier sink
    pub notifier_token: String,
    pub notifier_channel_id: String,
    pub notifier_api_url: String,

    // External endpoints
    pub catalog_api_url: String,
    pub catalog_api_key: Option<String>,
    pub stream_ws_url: String,
    pub stream_api_key: Option<String>,
    pub enrich_api_url: String,
    pub quote_api_url: String,

    // Signal thresholds
    pub min_token_age_days: i64,
    pub min_liquidity_usd: f64,
    pub max_fdv_usd: f64,
    pub min_volume_spike: f64,
    pub max_rsi_oversold: f64,
    pub max_price_impact_pct: f64,
    pub probe_usd_amount: f64,
    pub min_unique_buyers: usize,
    pub min_avg_vol_usd: f64,
    pub min_vol_5m_usd: f64,
    pub signal_cooldown_secs: i64,
    pub signal_rule_mode: SignalRuleMode,

    // Universe refresh
    pub refresh_period_secs: u64,
    pub memory_ttl_secs: i64,
    pub freshness_window_secs: i64,
    pub min_fresh_count: usize,
    pub coin_list_ttl_secs: i64,
    pub price_batch_size: usize,
    pub inter_batch_delay_secs: u64,
    pub min_request_interval_secs: u64,
    pub catalog_max_retries: u32,
    pub daily_request_budget: u32,

    // Ingestor
    pub event_buffer: usize,
    pub max_reconnect_attempts: u32,
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Every threshold has a default; only the notifier credentials are
    /// genuinely deployment-specific and default to empty (the notifier
    /// degrades to log-only when unset).
    pub fn from_env() -> Self {
        let rule_mode = match env::var("SIGNAL_RULE_MODE").as_deref() {
            Ok("all") | Ok("ALL") => SignalRuleMode::All,
            _ => SignalRuleMode::Any,
        };

        Self {
            store_path: env::var("STORE_URL")
                .unwrap_or_else(|_| "/var/lib/solscout/solscout.db".to_string()),
            network: env::var("NETWORK").unwrap_or_else(|_| "solana".to_string()),

            notifier_token: env::var("NOTIFIER_TOKEN").unwrap_or_default(),
            notifier_channel_id: env::var("NOTIFIER_CHANNEL_ID").unwrap_or_default(),
            notifier_api_url: env::var("NOTIFIER_API_URL")
                .unwrap_or_else(|_| "https://api.telegram.org".to_string()),

            catalog_api_url: env::var("CATALOG_API_URL")
                .unwrap_or_else(|_| "https://api.coingecko.com/api/v3".to_string()),
            catalog_api_key: env::var("CATALOG_API_KEY").ok().filter(|s| !s.is_empty()),
            stream_ws_url: env::var("STREAM_WS_URL")
                .unwrap_or_else(|_| "wss://api.mainnet-beta.solana.com".to_string()),
            stream_api_key: env::var("STREAM_API_KEY").ok().filter(|s| !s.is_empty()),
            enrich_api_url: env::var("ENRICH_API_URL")
                .unwrap_or_else(|_| "https://api.helius.xyz/v0/transactions".to_string()),
            quote_api_url: env::var("AGGREGATOR_API_URL")
                .unwrap_or_else(|_| "https://quote-api.jup.ag/v6".to_string()),

            min_token_age_days: parse_env("MIN_TOKEN_AGE_DAYS", 14),
            min_liquidity_usd: parse_env("MIN_LIQUIDITY_USD", 10_000.0),
            max_fdv_usd: parse_env("MAX_FDV_USD", 5_000_000.0),
            min_volume_spike: parse_env("MIN_VOLUME_SPIKE", 3.0),
            max_rsi_oversold: parse_env("MAX_RSI_OVERSOLD", 35.0),
            max_price_impact_pct: parse_env("MAX_PRICE_IMPACT_PERCENT", 3.0),
            probe_usd_amount: parse_env("PROBE_USD_AMOUNT", 10.0),
            min_unique_buyers: parse_env("MIN_UNIQUE_BUYERS", 5),
            min_avg_vol_usd: parse_env("MIN_AVG_VOL_USD", 1_000.0),
            min_vol_5m_usd: parse_env("MIN_VOL_5M_USD", 5_000.0),
            signal_cooldown_secs: parse_env("SIGNAL_COOLDOWN_SECS", 1_800),
            signal_rule_mode: rule_mode,

            refresh_period_secs: parse_env("UNIVERSE_REFRESH_SECS", 48 * 3600),
            memory_ttl_secs: parse_env("UNIVERSE_MEMORY_TTL_SECS", 48 * 3600),
            freshness_window_secs: parse_env("UNIVERSE_FRESHNESS_SECS", 24 * 3600),
            min_fresh_count: parse_env("UNIVERSE_MIN_FRESH_COUNT", 25),
            coin_list_ttl_secs: parse_env("COIN_LIST_TTL_SECS", 48 * 3600),
            price_batch_size: parse_env::<usize>("PRICE_BATCH_SIZE", 50).min(250),
            inter_batch_delay_secs: parse_env("INTER_BATCH_DELAY_SECS", 5),
            min_request_interval_secs: parse_env("MIN_REQUEST_INTERVAL_SECS", 3),
            catalog_max_retries: parse_env("CATALOG_MAX_RETRIES", 2),
            daily_request_budget: parse_env("DAILY_REQUEST_BUDGET", 280),

            event_buffer: parse_env("EVENT_BUFFER", 4_096),
            max_reconnect_attempts: parse_env("MAX_RECONNECT_ATTEMPTS", 10),
        }
    }

    /// Age gate threshold in seconds
    pub fn min_token_age_secs(&self) -> i64 {
        self.min_token_age_days * 86_400
    }
}
