//! Data model shared by the quote cache, detector, ring, stats block, and
//! backtest replayer. Mirrors `spec.md` section 3 field-for-field.

use crate::ids::{SymbolId, VenueId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single top-of-book update for one (venue, symbol) pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub venue: VenueId,
    pub symbol: SymbolId,
    pub bid: f64,
    pub ask: f64,
    pub bid_qty: f64,
    pub ask_qty: f64,
    pub ts_ns: u64,
    pub seq: u64,
}

/// A transient cross-venue dislocation. Never stored raw in the shared
/// image — it is either discarded (not profitable) or turned into an
/// [`Operation`] and pushed onto the ring.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Opportunity {
    pub symbol: SymbolId,
    pub buy_venue: VenueId,
    pub sell_venue: VenueId,
    pub buy_ask: f64,
    pub sell_bid: f64,
    pub gross_bps: f64,
    pub net_bps: f64,
    pub detected_ns: u64,
}

/// Maximum byte length of each fixed-width string field in an
/// [`Operation`] record, per spec.md section 6.
pub const OP_TYPE_LEN: usize = 20;
pub const OP_STRATEGY_LEN: usize = 20;
pub const OP_SYMBOL_LEN: usize = 12;
pub const OP_VENUE_LEN: usize = 20;

/// One detected-and-accepted arbitrage cycle, simulated or real.
///
/// This is the owned, ergonomic form used by the detector and the backtest
/// replayer. [`crate::shm::layout`] defines the byte-exact 176-byte record
/// this type round-trips through for the shared-memory ring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: u64,
    pub ts_ns: u64,
    pub kind: String,
    pub strategy: String,
    pub symbol: String,
    pub buy_venue: String,
    pub sell_venue: String,
    pub qty: f64,
    pub entry_px: f64,
    pub exit_px: f64,
    pub pnl: f64,
    pub pnl_pct: f64,
    pub spread_bps: f64,
    pub fees_paid: f64,
    pub is_open: bool,
}

/// Aggregate counters mirrored into the shared-memory header.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Stats {
    pub engine_running: bool,
    pub strategy_enabled: [bool; 3],
    pub opps_detected: u64,
    pub opps_executed: u64,
    pub orders_placed: u64,
    pub orders_filled: u64,
    pub total_profit_usd: f64,
    pub balance_usd: f64,
    pub wins: u32,
    pub losses: u32,
    pub win_rate: f64,
    pub open_positions: u32,
    pub avg_latency_us: u32,
    pub p99_latency_us: u32,
    pub last_update_ns: u64,
}

impl Stats {
    /// `wins / (wins + losses)`, or `0.0` when nothing has settled yet
    /// (spec.md invariant 3).
    pub fn compute_win_rate(wins: u32, losses: u32) -> f64 {
        let total = wins + losses;
        if total > 0 {
            wins as f64 / total as f64
        } else {
            0.0
        }
    }
}

/// A persisted top-of-book sample, written by the snapshot recorder and
/// read back by the backtest replayer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderbookSnapshot {
    pub id: u64,
    pub venue: String,
    pub symbol: String,
    pub bid: f64,
    pub ask: f64,
    pub bid_qty: Option<f64>,
    pub ask_qty: Option<f64>,
    pub ts_wall_us: u64,
    pub ts_ns: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestWindow {
    pub start_ts_ns: u64,
    pub end_ts_ns: u64,
    pub duration_s: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestParams {
    pub symbols: Vec<String>,
    pub venues: Vec<String>,
    pub min_spread_bps: f64,
    pub fee_bps: f64,
    pub slippage_bps: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SpreadStats {
    pub avg_bps: f64,
    pub min_bps: f64,
    pub max_bps: f64,
    pub median_bps: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ProfitStats {
    pub total_usd: f64,
    pub avg_per_trade_usd: f64,
    pub best_usd: f64,
}

/// Per-symbol rollup inside a [`BacktestResult`], per spec.md section 4.H
/// step 4 ("per-symbol {count, mean spread, profit sum}").
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SymbolStats {
    pub count: u64,
    pub mean_spread_bps: f64,
    pub profit_usd: f64,
}

/// Lifecycle: `pending -> (completed | failed)`, both terminal. Modeled as
/// `completed: bool` plus an optional `error_message`, matching spec.md's
/// literal field names rather than introducing a separate enum — a `false`
/// `completed` value is only ever observed transiently inside
/// [`crate::backtest::run_backtest`] before the row is finalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub window: BacktestWindow,
    pub params: BacktestParams,
    pub total_opportunities: u64,
    pub opportunities_per_minute: f64,
    pub spread: SpreadStats,
    pub profit: ProfitStats,
    pub per_symbol: HashMap<String, SymbolStats>,
    pub completed: bool,
    pub error_message: Option<String>,
    pub recommendation: String,
}
