//! # SolScout — Solana token signal scanner
//!
//! Watches a rolling universe of Solana tokens, ingests AMM swap and
//! pool-initialization events over a WebSocket log subscription, maintains
//! per-mint rolling indicators, and emits de-duplicated buy signals to a
//! messaging sink after a liquidity probe.
//!
//! ## Architecture
//!
//! ```text
//! catalog API ──> universe ──> store (token_catalog) + monitored set
//! log stream ──> ingest ──(bounded queue)──> engine ──> store (signals)
//!                   │                           │
//!                   └─> store (pools, ohlcv)    └─> probe ──> notify
//! scheduler ──> universe refresh / store prune / activity snapshots
//! ```
//!
//! **Key principle:** raw events are never persisted. The store holds only
//! minute aggregates (OHLCV), pool metadata, the token catalog, and emitted
//! signals; everything else lives in bounded in-memory windows owned by a
//! single consumer task.
//!
//! ## Module organization
//!
//! - `config` - environment configuration
//! - `constants` - quote mints and AMM program identifiers
//! - `types` - core data structures (SwapEvent, Candle, CatalogToken)
//! - `store` - SQLite persistence (catalog, pools, ohlcv, signals)
//! - `state` - per-mint rolling window container
//! - `indicators` - pure indicator math (EMA, RSI, ATR, spike, net flow)
//! - `catalog` - external token catalog client
//! - `universe` - monitored set lifecycle and budgeted refresh
//! - `enrich` - transaction detail enrichment client
//! - `ingest` - WebSocket log subscription and event dispatch
//! - `engine` - signal evaluation over dispatched events
//! - `probe` - simulated-swap liquidity gate
//! - `notify` - messaging sink and delivery dispatcher
//! - `scheduler` - long-cycle refresh, pruning, reporting ticks

pub mod catalog;
pub mod config;
pub mod constants;
pub mod engine;
pub mod enrich;
pub mod indicators;
pub mod ingest;
pub mod notify;
pub mod probe;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod types;
pub mod universe;

// Re-export commonly used types
pub use config::Config;
pub use engine::SignalEngine;
pub use ingest::{DispatchQueue, IngestStats, StreamIngestor};
pub use notify::Notifier;
pub use probe::{LiquidityProbe, QuoteProbe};
pub use state::MintRollingState;
pub use store::{Store, StoreError};
pub use types::{Candle, CatalogToken, PoolRecord, SignalRecord, SwapEvent};
pub use universe::UniverseManager;
