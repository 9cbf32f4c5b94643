//! SQLite persistence for the scanner.
//!
//! Tables (see `/sql/` directory):
//! - `token_catalog` - UPSERT on (catalog_id, network), the persisted universe
//! - `pools` - UPSERT on mint (first observed pool init, last known liquidity)
//! - `ohlcv` - UPSERT on (mint, bucket_ts), one-minute aggregates
//! - `signals` - INSERT (append-only emitted signals)
//!
//! All schema files use IF NOT EXISTS clauses and are embedded into the
//! binary, so `bootstrap()` is idempotent across restarts. A legacy catalog
//! layout that named the external id column `coin_id` is normalized in
//! place before the migrations run.

use crate::types::{Candle, CatalogToken, PoolRecord, SignalRecord};
use rusqlite::{params, Connection, ErrorCode};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Embedded schema migrations, applied in order.
const MIGRATIONS: [(&str, &str); 4] = [
    ("01_token_catalog.sql", include_str!("../sql/01_token_catalog.sql")),
    ("02_pools.sql", include_str!("../sql/02_pools.sql")),
    ("03_ohlcv.sql", include_str!("../sql/03_ohlcv.sql")),
    ("04_signals.sql", include_str!("../sql/04_signals.sql")),
];

/// Store failure classification.
///
/// Transient failures (busy database, locked file) are safe to retry with
/// backoff; permanent failures surface to the supervisor.
#[derive(Debug)]
pub enum StoreError {
    Transient(String),
    Permanent(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Transient(msg) => write!(f, "transient store error: {}", msg),
            StoreError::Permanent(msg) => write!(f, "permanent store error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _)
                if code.code == ErrorCode::DatabaseBusy
                    || code.code == ErrorCode::DatabaseLocked =>
            {
                StoreError::Transient(err.to_string())
            }
            _ => StoreError::Permanent(err.to_string()),
        }
    }
}

/// Row counts removed by a prune pass.
#[derive(Debug, Default, PartialEq)]
pub struct PruneReport {
    pub ohlcv: usize,
    pub signals: usize,
    pub catalog: usize,
}

/// Retention windows applied by [`Store::prune`], in seconds.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub ohlcv_secs: i64,
    pub signal_secs: i64,
    pub catalog_secs: i64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            ohlcv_secs: 24 * 3600,
            signal_secs: 24 * 3600,
            catalog_secs: 72 * 3600,
        }
    }
}

/// Shared SQLite store.
///
/// A single connection behind a mutex; every operation acquires and
/// releases per call. Long transactions are forbidden, the only
/// multi-statement transaction is the catalog batch write-through.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the database and run the idempotent bootstrap.
    pub fn open(db_path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.bootstrap()?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.bootstrap()?;
        Ok(store)
    }

    /// Idempotent schema bootstrap.
    ///
    /// Enables WAL mode, normalizes the legacy catalog column, then applies
    /// every embedded migration. Safe to run on every start; a failure here
    /// is fatal to the process.
    pub fn bootstrap(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();

        // WAL survives in-memory connections as a no-op
        conn.pragma_update(None, "journal_mode", "WAL")?;

        normalize_legacy_catalog(&conn)?;

        for (name, sql) in MIGRATIONS {
            conn.execute_batch(sql).map_err(|e| {
                StoreError::Permanent(format!("migration {} failed: {}", name, e))
            })?;
        }

        log::info!("📘 Store ready ({} migrations applied)", MIGRATIONS.len());
        Ok(())
    }

    /// Upsert a pool record. On conflict only non-null fields are updated;
    /// `first_seen_ts` keeps its original value.
    pub fn upsert_pool(
        &self,
        mint: &str,
        first_seen_ts: i64,
        liq_usd: Option<f64>,
        fdv_usd: Option<f64>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO pools (mint, first_seen_ts, liq_usd, fdv_usd)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(mint) DO UPDATE SET
                liq_usd = COALESCE(excluded.liq_usd, pools.liq_usd),
                fdv_usd = COALESCE(excluded.fdv_usd, pools.fdv_usd)
            "#,
            params![mint, first_seen_ts, liq_usd, fdv_usd],
        )?;
        Ok(())
    }

    /// Look up a pool record by mint.
    pub fn get_pool(&self, mint: &str) -> Result<Option<PoolRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT mint, first_seen_ts, liq_usd, fdv_usd FROM pools WHERE mint = ?1",
        )?;
        let mut rows = stmt.query_map([mint], |row| {
            Ok(PoolRecord {
                mint: row.get(0)?,
                first_seen_ts: row.get(1)?,
                liq_usd: row.get(2)?,
                fdv_usd: row.get(3)?,
            })
        })?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Write one catalog batch in a single transaction.
    ///
    /// Failure of any row aborts the whole batch; the caller retries at
    /// batch granularity. Completed batches are never rolled back by later
    /// failures, which is what makes a partial refresh resumable.
    pub fn upsert_catalog_batch(
        &self,
        network: &str,
        entries: &[CatalogToken],
    ) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        for entry in entries {
            tx.execute(
                r#"
                INSERT INTO token_catalog (
                    catalog_id, network, mint, symbol, name,
                    price_usd, volume_24h, market_cap, fdv, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                ON CONFLICT(catalog_id, network) DO UPDATE SET
                    mint = excluded.mint,
                    symbol = excluded.symbol,
                    name = excluded.name,
                    price_usd = excluded.price_usd,
                    volume_24h = excluded.volume_24h,
                    market_cap = excluded.market_cap,
                    fdv = excluded.fdv,
                    updated_at = excluded.updated_at
                "#,
                params![
                    entry.catalog_id,
                    network,
                    entry.mint,
                    entry.symbol,
                    entry.name,
                    entry.price_usd,
                    entry.volume_24h,
                    entry.market_cap,
                    entry.fdv,
                    entry.updated_at,
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Catalog rows fresher than `window_secs` with a non-empty mint,
    /// used to rehydrate the monitored set from the store.
    pub fn fresh_catalog_tokens(
        &self,
        network: &str,
        now: i64,
        window_secs: i64,
    ) -> Result<Vec<CatalogToken>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT catalog_id, mint, symbol, name,
                   price_usd, volume_24h, market_cap, fdv, updated_at
            FROM token_catalog
            WHERE network = ?1 AND updated_at > ?2 AND mint != ''
            ORDER BY volume_24h DESC
            "#,
        )?;
        let rows = stmt.query_map(params![network, now - window_secs], |row| {
            Ok(CatalogToken {
                catalog_id: row.get(0)?,
                mint: row.get(1)?,
                symbol: row.get(2)?,
                name: row.get(3)?,
                price_usd: row.get(4)?,
                volume_24h: row.get(5)?,
                market_cap: row.get(6)?,
                fdv: row.get(7)?,
                updated_at: row.get(8)?,
            })
        })?;

        let mut tokens = Vec::new();
        for row in rows {
            tokens.push(row?);
        }
        Ok(tokens)
    }

    /// Validate the connection with a trivial round trip.
    pub fn health_check(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    /// Display symbol for a mint, from the newest catalog row carrying it.
    pub fn symbol_for_mint(&self, mint: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT symbol FROM token_catalog WHERE mint = ?1 ORDER BY updated_at DESC LIMIT 1",
        )?;
        let mut rows = stmt.query_map([mint], |row| row.get::<_, Option<String>>(0))?;
        match rows.next() {
            Some(row) => Ok(row?),
            None => Ok(None),
        }
    }

    /// Merge a swap into its one-minute bucket.
    ///
    /// Merge rule: `h = max(h, p)`, `l = min(l, p)`, `c = p`,
    /// `v = v + vol_usd`; the open is written once at bucket creation.
    pub fn ingest_swap(
        &self,
        mint: &str,
        price: f64,
        vol_usd: f64,
        ts: i64,
    ) -> Result<(), StoreError> {
        let bucket_ts = ts - ts.rem_euclid(60);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO ohlcv (mint, bucket_ts, o, h, l, c, v)
            VALUES (?1, ?2, ?3, ?3, ?3, ?3, ?4)
            ON CONFLICT(mint, bucket_ts) DO UPDATE SET
                h = MAX(ohlcv.h, excluded.h),
                l = MIN(ohlcv.l, excluded.l),
                c = excluded.c,
                v = ohlcv.v + excluded.v
            "#,
            params![mint, bucket_ts, price, vol_usd],
        )?;
        Ok(())
    }

    /// Last `n` buckets for a mint, ordered oldest to newest.
    pub fn get_candles(&self, mint: &str, n: usize) -> Result<Vec<Candle>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT bucket_ts, o, h, l, c, v FROM (
                SELECT bucket_ts, o, h, l, c, v
                FROM ohlcv WHERE mint = ?1
                ORDER BY bucket_ts DESC LIMIT ?2
            ) ORDER BY bucket_ts ASC
            "#,
        )?;
        let rows = stmt.query_map(params![mint, n as i64], |row| {
            Ok(Candle {
                bucket_ts: row.get(0)?,
                o: row.get(1)?,
                h: row.get(2)?,
                l: row.get(3)?,
                c: row.get(4)?,
                v: row.get(5)?,
            })
        })?;

        let mut candles = Vec::new();
        for row in rows {
            candles.push(row?);
        }
        Ok(candles)
    }

    /// Append an emitted signal (notified = false). Returns the row id.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_signal(
        &self,
        mint: &str,
        symbol: &str,
        signal_ts: i64,
        ema_cross: bool,
        vol_spike: f64,
        rsi: f64,
        reasons: &str,
    ) -> Result<i64, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO signals (mint, symbol, signal_ts, ema_cross, vol_spike, rsi, reasons)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![mint, symbol, signal_ts, ema_cross, vol_spike, rsi, reasons],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Signals not yet delivered, oldest first.
    pub fn unnotified_signals(&self) -> Result<Vec<SignalRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, mint, symbol, signal_ts, ema_cross, vol_spike, rsi, reasons, notified
            FROM signals WHERE notified = 0 ORDER BY signal_ts ASC
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(SignalRecord {
                id: row.get(0)?,
                mint: row.get(1)?,
                symbol: row.get(2)?,
                signal_ts: row.get(3)?,
                ema_cross: row.get(4)?,
                vol_spike: row.get(5)?,
                rsi: row.get(6)?,
                reasons: row.get(7)?,
                notified: row.get(8)?,
            })
        })?;

        let mut signals = Vec::new();
        for row in rows {
            signals.push(row?);
        }
        Ok(signals)
    }

    /// Flip `notified` after confirmed delivery.
    pub fn mark_notified(&self, id: i64) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("UPDATE signals SET notified = 1 WHERE id = ?1", [id])?;
        Ok(())
    }

    /// Timestamp of the most recent signal for a mint, if any.
    pub fn last_signal_ts(&self, mint: &str) -> Result<Option<i64>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let ts = conn
            .query_row(
                "SELECT MAX(signal_ts) FROM signals WHERE mint = ?1",
                [mint],
                |row| row.get::<_, Option<i64>>(0),
            )?;
        Ok(ts)
    }

    /// Delete rows past their retention window.
    pub fn prune(&self, now: i64, policy: RetentionPolicy) -> Result<PruneReport, StoreError> {
        let conn = self.conn.lock().unwrap();

        let ohlcv = conn.execute(
            "DELETE FROM ohlcv WHERE bucket_ts < ?1",
            [now - policy.ohlcv_secs],
        )?;
        let signals = conn.execute(
            "DELETE FROM signals WHERE signal_ts < ?1",
            [now - policy.signal_secs],
        )?;
        let catalog = conn.execute(
            "DELETE FROM token_catalog WHERE updated_at < ?1",
            [now - policy.catalog_secs],
        )?;

        Ok(PruneReport {
            ohlcv,
            signals,
            catalog,
        })
    }
}

/// Normalize the legacy catalog column.
///
/// The original deployment stored the external id as `coin_id`. Precedence:
/// - both `catalog_id` and `coin_id` present: drop `coin_id`
/// - only `coin_id`: rename to `catalog_id`
/// - neither (on an existing table): add `catalog_id`
///
/// A missing table is left for the migrations to create.
fn normalize_legacy_catalog(conn: &Connection) -> Result<(), StoreError> {
    let table_exists: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'token_catalog'",
            [],
            |row| row.get::<_, i64>(0),
        )
        .map(|n| n > 0)?;

    if !table_exists {
        return Ok(());
    }

    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info('token_catalog')")?;
    let columns: Vec<String> = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<_, _>>()?;

    let has_new = columns.iter().any(|c| c == "catalog_id");
    let has_legacy = columns.iter().any(|c| c == "coin_id");

    match (has_new, has_legacy) {
        (true, true) => {
            log::warn!("🔧 Catalog carries both catalog_id and legacy coin_id, dropping coin_id");
            conn.execute_batch("ALTER TABLE token_catalog DROP COLUMN coin_id")
                .map_err(|e| StoreError::Permanent(format!("legacy column drop failed: {}", e)))?;
        }
        (false, true) => {
            log::warn!("🔧 Renaming legacy catalog column coin_id -> catalog_id");
            conn.execute_batch("ALTER TABLE token_catalog RENAME COLUMN coin_id TO catalog_id")
                .map_err(|e| {
                    StoreError::Permanent(format!("legacy column rename failed: {}", e))
                })?;
        }
        (false, false) => {
            log::warn!("🔧 Catalog table missing catalog_id, adding column");
            conn.execute_batch(
                "ALTER TABLE token_catalog ADD COLUMN catalog_id TEXT NOT NULL DEFAULT ''",
            )
            .map_err(|e| StoreError::Permanent(format!("catalog_id add failed: {}", e)))?;
        }
        (true, false) => {} // already normalized
    }

    Ok(())
}

/// Retry a store operation while it fails transiently.
///
/// Backoff doubles from 250ms and the whole loop is bounded by
/// `deadline_secs`. Permanent errors return immediately.
pub async fn with_retry<T, F>(
    op_name: &str,
    deadline_secs: u64,
    mut op: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Result<T, StoreError>,
{
    let started = std::time::Instant::now();
    let mut delay_ms = 250u64;

    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(StoreError::Transient(msg)) => {
                if started.elapsed() >= Duration::from_secs(deadline_secs) {
                    return Err(StoreError::Transient(format!(
                        "{} deadline exceeded: {}",
                        op_name, msg
                    )));
                }
                log::warn!("⏳ {} transient failure, retrying in {}ms: {}", op_name, delay_ms, msg);
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = (delay_ms * 2).min(5_000);
            }
            Err(err) => return Err(err),
        }
    }
}
