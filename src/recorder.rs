//! Snapshot recorder (component G): persists top-of-book samples from the
//! quote cache at a fixed cadence, batched per interval so the recorder
//! never blocks the detector (spec.md 4.G).
//!
//! Storage is `rusqlite` in WAL mode, directly grounded on the teacher's
//! `backtest_v2::book_recorder::BookSnapshotStorage`: same schema-constant
//! + `Arc<Mutex<Connection>>` + batched-transaction shape, narrowed to the
//! flat `OrderbookSnapshot` row spec.md section 6 describes instead of the
//! teacher's L2-book-with-JSON-levels row.

use crate::error::EngineError;
use crate::ids::{Interner, SymbolId, VenueId};
use crate::model::OrderbookSnapshot;
use crate::quote_cache::QuoteCache;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

const SNAPSHOT_SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS orderbook_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    venue TEXT NOT NULL,
    symbol TEXT NOT NULL,
    bid REAL NOT NULL,
    ask REAL NOT NULL,
    bid_qty REAL,
    ask_qty REAL,
    ts_wall_us INTEGER NOT NULL,
    ts_ns INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_snapshots_venue_symbol_ts
    ON orderbook_snapshots(venue, symbol, ts_ns);

CREATE INDEX IF NOT EXISTS idx_snapshots_ts
    ON orderbook_snapshots(ts_ns);
"#;

/// Durable store for recorded top-of-book samples, read back by the
/// backtest replayer.
pub struct SnapshotStore {
    conn: Arc<Mutex<Connection>>,
    next_id: AtomicU64,
}

impl SnapshotStore {
    pub fn open(db_path: &str) -> Result<Self, EngineError> {
        let path = Path::new(db_path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| EngineError::StorageOpenFailed(e.to_string()))?;
            }
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(db_path, flags)
            .map_err(|e| EngineError::StorageOpenFailed(e.to_string()))?;
        conn.execute_batch(SNAPSHOT_SCHEMA)
            .map_err(|e| EngineError::StorageOpenFailed(e.to_string()))?;
        let next_id = next_row_id(&conn).unwrap_or(1);
        info!(path = %db_path, "snapshot store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            next_id: AtomicU64::new(next_id),
        })
    }

    pub fn open_memory() -> Result<Self, EngineError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| EngineError::StorageOpenFailed(e.to_string()))?;
        conn.execute_batch(SNAPSHOT_SCHEMA)
            .map_err(|e| EngineError::StorageOpenFailed(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            next_id: AtomicU64::new(1),
        })
    }

    /// Append a batch of snapshots inside a single transaction.
    pub fn store_batch(&self, snapshots: &[OrderbookSnapshot]) -> Result<usize> {
        if snapshots.is_empty() {
            return Ok(0);
        }
        let conn = self.conn.lock();
        conn.execute("BEGIN IMMEDIATE", [])
            .context("begin snapshot batch transaction")?;
        let mut count = 0usize;
        for snap in snapshots {
            let result = conn.execute(
                r#"INSERT INTO orderbook_snapshots
                    (venue, symbol, bid, ask, bid_qty, ask_qty, ts_wall_us, ts_ns)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
                params![
                    snap.venue,
                    snap.symbol,
                    snap.bid,
                    snap.ask,
                    snap.bid_qty,
                    snap.ask_qty,
                    snap.ts_wall_us as i64,
                    snap.ts_ns as i64,
                ],
            );
            if result.is_ok() {
                count += 1;
            }
        }
        conn.execute("COMMIT", []).context("commit snapshot batch")?;
        self.next_id.fetch_add(count as u64, Ordering::Relaxed);
        Ok(count)
    }

    /// Load every snapshot with `ts_ns` in `[start_ns, end_ns]`, restricted
    /// to `venues`/`symbols` when non-empty, ordered by `ts_ns`.
    pub fn load_window(
        &self,
        start_ns: u64,
        end_ns: u64,
        venues: &[String],
        symbols: &[String],
    ) -> Result<Vec<OrderbookSnapshot>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"SELECT id, venue, symbol, bid, ask, bid_qty, ask_qty, ts_wall_us, ts_ns
               FROM orderbook_snapshots
               WHERE ts_ns >= ?1 AND ts_ns <= ?2
               ORDER BY ts_ns ASC"#,
        )?;
        let rows = stmt
            .query_map(params![start_ns as i64, end_ns as i64], |row| {
                Ok(OrderbookSnapshot {
                    id: row.get::<_, i64>(0)? as u64,
                    venue: row.get(1)?,
                    symbol: row.get(2)?,
                    bid: row.get(3)?,
                    ask: row.get(4)?,
                    bid_qty: row.get(5)?,
                    ask_qty: row.get(6)?,
                    ts_wall_us: row.get::<_, i64>(7)? as u64,
                    ts_ns: row.get::<_, i64>(8)? as u64,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let venue_filter: Option<std::collections::HashSet<&str>> = if venues.is_empty() {
            None
        } else {
            Some(venues.iter().map(|s| s.as_str()).collect())
        };
        let symbol_filter: Option<std::collections::HashSet<&str>> = if symbols.is_empty() {
            None
        } else {
            Some(symbols.iter().map(|s| s.as_str()).collect())
        };

        Ok(rows
            .into_iter()
            .filter(|s| venue_filter.as_ref().map_or(true, |f| f.contains(s.venue.as_str())))
            .filter(|s| symbol_filter.as_ref().map_or(true, |f| f.contains(s.symbol.as_str())))
            .collect())
    }
}

fn next_row_id(conn: &Connection) -> rusqlite::Result<u64> {
    conn.query_row("SELECT COALESCE(MAX(id), 0) + 1 FROM orderbook_snapshots", [], |r| {
        r.get::<_, i64>(0)
    })
    .map(|v| v as u64)
}

/// Reads the current cache cell for every active `(venue, symbol)` pair and
/// batches the samples into a [`SnapshotStore`] append, on a fixed cadence
/// or minimum price-move threshold (spec.md 4.G).
pub struct Recorder {
    store: Arc<SnapshotStore>,
    venue_names: Arc<Interner>,
    symbol_names: Arc<Interner>,
    min_move_bps: f64,
    last_mid: Mutex<std::collections::HashMap<(u8, u16), f64>>,
}

impl Recorder {
    pub fn new(
        store: Arc<SnapshotStore>,
        venue_names: Arc<Interner>,
        symbol_names: Arc<Interner>,
        min_move_bps: f64,
    ) -> Self {
        Self {
            store,
            venue_names,
            symbol_names,
            min_move_bps,
            last_mid: Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// One sampling pass over every addressable cell in `cache`. Returns
    /// the number of snapshots actually persisted (cells that hadn't moved
    /// enough since the last sample, or that have never been written, are
    /// skipped).
    pub fn sample_and_store(&self, cache: &QuoteCache) -> Result<usize> {
        let mut batch = Vec::new();
        let wall_us = wall_clock_us();

        for v in 0..cache.venues() {
            for s in 0..cache.symbols() {
                let venue = VenueId(v as u8);
                let symbol = SymbolId(s as u16);
                let Some(quote) = cache.read(venue, symbol) else {
                    continue;
                };
                let mid = (quote.bid + quote.ask) / 2.0;
                let key = (venue.0, symbol.0);
                let moved_enough = {
                    let mut last = self.last_mid.lock();
                    match last.get(&key) {
                        Some(&prev) if prev > 0.0 => {
                            let move_bps = ((mid - prev) / prev).abs() * 10_000.0;
                            let moved = move_bps >= self.min_move_bps;
                            if moved {
                                last.insert(key, mid);
                            }
                            moved
                        }
                        _ => {
                            last.insert(key, mid);
                            true
                        }
                    }
                };
                if !moved_enough {
                    continue;
                }

                let Some(venue_name) = self.venue_names.name_of(venue.0) else {
                    continue;
                };
                let Some(symbol_name) = self.symbol_names.name_of(symbol.0) else {
                    continue;
                };

                batch.push(OrderbookSnapshot {
                    id: 0,
                    venue: venue_name,
                    symbol: symbol_name,
                    bid: quote.bid,
                    ask: quote.ask,
                    bid_qty: Some(quote.bid_qty),
                    ask_qty: Some(quote.ask_qty),
                    ts_wall_us: wall_us,
                    ts_ns: quote.ts_ns,
                });
            }
        }

        let n = self.store.store_batch(&batch)?;
        debug!(recorded = n, sampled = batch.len(), "snapshot batch written");
        Ok(n)
    }
}

fn wall_clock_us() -> u64 {
    chrono::Utc::now().timestamp_micros().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Recorder, QuoteCache) {
        let store = Arc::new(SnapshotStore::open_memory().unwrap());
        let venues = Arc::new(Interner::new(4));
        let symbols = Arc::new(Interner::new(4));
        venues.intern("binance");
        symbols.intern("BTCUSDT");
        let cache = QuoteCache::new(1, 1);
        (Recorder::new(store.clone(), venues, symbols, 0.0), cache)
    }

    #[test]
    fn samples_every_written_cell() {
        let (recorder, cache) = setup();
        cache.submit(VenueId(0), SymbolId(0), 100.0, 100.5, 1.0, 1.0, 1);
        let n = recorder.sample_and_store(&cache).unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn empty_cache_produces_no_rows() {
        let (recorder, cache) = setup();
        let n = recorder.sample_and_store(&cache).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn store_and_reload_round_trips_window() {
        let store = SnapshotStore::open_memory().unwrap();
        let snap = OrderbookSnapshot {
            id: 0,
            venue: "binance".to_string(),
            symbol: "BTCUSDT".to_string(),
            bid: 100.0,
            ask: 100.5,
            bid_qty: Some(1.0),
            ask_qty: Some(1.0),
            ts_wall_us: 1,
            ts_ns: 1_000,
        };
        store.store_batch(&[snap.clone()]).unwrap();
        let rows = store.load_window(0, 2_000, &[], &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].venue, "binance");

        let rows = store.load_window(5_000, 6_000, &[], &[]).unwrap();
        assert!(rows.is_empty());
    }
}
