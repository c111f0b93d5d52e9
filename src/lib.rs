//! Cross-exchange spot arbitrage core.
//!
//! Components A-H of the specification live in their own modules: the quote
//! cache (`quote_cache`), the opportunity detector (`detector`), the
//! operations ring codec (`ring`), the shared-memory contract (`shm`), the
//! control channel (`control`), the snapshot recorder (`recorder`), and the
//! backtest replayer (`backtest`). `engine` wires the live pieces (A, B, E,
//! F, G) into a single process-wide context, replacing the source's global
//! singletons (`bridge`, `binance_service`) with an explicitly constructed
//! and explicitly passed struct.

pub mod backtest;
pub mod config;
pub mod control;
pub mod detector;
pub mod engine;
pub mod error;
pub mod histogram;
pub mod ids;
pub mod model;
pub mod quote_cache;
pub mod recorder;
pub mod ring;
pub mod shm;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current time as nanoseconds since the Unix epoch.
#[inline]
pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos() as u64
}
