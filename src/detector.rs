//! Opportunity detector (component B): scans the quote cache for
//! cross-venue dislocations, gates them on net spread after fees and
//! slippage, and — when eligible — turns them into [`Operation`] records on
//! the ring.

use crate::config::DetectorConfig;
use crate::histogram::LatencyHistogram;
use crate::ids::{Interner, SymbolId, VenueId};
use crate::model::{Opportunity, Operation};
use crate::quote_cache::QuoteCache;
use crate::shm::SharedRegion;
use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Fixed strategy enumeration (spec.md section 9 design notes): only
/// `cross_exchange` is implemented; the other two slots are reserved.
pub const STRATEGY_NAMES: [&str; 3] = ["cross_exchange", "funding_rate", "triangular"];

pub fn strategy_index(name: &str) -> Option<usize> {
    STRATEGY_NAMES.iter().position(|&s| s == name)
}

static NEXT_OPERATION_ID: AtomicU64 = AtomicU64::new(1);

/// Counters for conditions spec.md's error taxonomy names but that the
/// shared-memory header has no dedicated field for.
#[derive(Debug, Default)]
pub struct DetectorDiagnostics {
    /// A scan found only stale quotes, or `ask*` was non-positive (a
    /// defect) — the symbol was skipped this scan.
    pub symbol_errors: AtomicU64,
    /// An opportunity passed the net-spread gate but failed the
    /// eligibility gate (strategy disabled, position cap, balance).
    pub eligibility_skips: AtomicU64,
    /// A `DetectorConfig::validate()` failure kept the previous config.
    pub config_rejects: AtomicU64,
}

pub struct Detector {
    config: ArcSwap<DetectorConfig>,
    venue_names: Arc<Interner>,
    symbol_names: Arc<Interner>,
    latency: LatencyHistogram,
    ewma_latency_us: std::sync::atomic::AtomicU64,
    pub diagnostics: DetectorDiagnostics,
}

impl Detector {
    pub fn new(config: DetectorConfig, venue_names: Arc<Interner>, symbol_names: Arc<Interner>) -> Self {
        Self {
            config: ArcSwap::from_pointee(config),
            venue_names,
            symbol_names,
            latency: LatencyHistogram::new(),
            ewma_latency_us: std::sync::atomic::AtomicU64::new(0),
            diagnostics: DetectorDiagnostics::default(),
        }
    }

    pub fn config(&self) -> DetectorConfig {
        **self.config.load()
    }

    /// Hot-reload the detector's parameters. Publishes by atomic pointer
    /// swap (spec.md 4.B); an invalid config is rejected, the previous one
    /// kept, and `config_rejects` incremented.
    pub fn update_config(&self, new: DetectorConfig) -> Result<(), String> {
        if let Err(e) = new.validate() {
            self.diagnostics.config_rejects.fetch_add(1, Ordering::Relaxed);
            return Err(e);
        }
        self.config.store(Arc::new(new));
        Ok(())
    }

    /// Scan every symbol whose cache cell may have changed, as triggered by
    /// [`crate::quote_cache::SubmitOutcome::Changed`]. Returns the
    /// opportunity emitted, if any (for tests and instrumentation); side
    /// effects (ring push, counters) are applied to `shm` directly.
    pub fn scan_symbol(&self, cache: &QuoteCache, symbol: SymbolId, shm: &SharedRegion) -> Option<Opportunity> {
        let started = quanta::Instant::now();
        let result = self.scan_symbol_inner(cache, symbol, shm);
        self.record_latency(started.elapsed().as_micros() as u64, shm);
        result
    }

    fn scan_symbol_inner(
        &self,
        cache: &QuoteCache,
        symbol: SymbolId,
        shm: &SharedRegion,
    ) -> Option<Opportunity> {
        let cfg = self.config();
        if cfg.fee_bps < 0.0 || cfg.slippage_bps < 0.0 {
            self.diagnostics.symbol_errors.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let now = crate::now_ns();
        let freshness_ns = cfg.freshness_window_ms * 1_000_000;

        let mut best_bid: Option<(f64, f64, VenueId)> = None; // (price, qty, venue)
        let mut best_ask: Option<(f64, f64, VenueId)> = None;

        for v in 0..cache.venues() {
            let venue = VenueId(v as u8);
            let Some(quote) = cache.read(venue, symbol) else {
                continue;
            };
            if now.saturating_sub(quote.ts_ns) > freshness_ns {
                continue;
            }
            best_bid = Some(pick_best(best_bid, (quote.bid, quote.bid_qty, venue), true));
            best_ask = Some(pick_best(best_ask, (quote.ask, quote.ask_qty, venue), false));
        }

        let (bid_px, _, bid_venue) = best_bid?;
        let (ask_px, _, ask_venue) = best_ask?;

        if ask_px <= 0.0 {
            // Impossible under a valid quote; treat as a defect, not a cross.
            self.diagnostics.symbol_errors.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        if bid_px <= ask_px || bid_venue == ask_venue {
            return None;
        }

        let gross_bps = (bid_px - ask_px) / ask_px * 10_000.0;
        let net_bps = gross_bps - 2.0 * cfg.fee_bps - cfg.slippage_bps;

        if net_bps < cfg.min_spread_bps {
            return None;
        }

        let opp = Opportunity {
            symbol,
            buy_venue: ask_venue,
            sell_venue: bid_venue,
            buy_ask: ask_px,
            sell_bid: bid_px,
            gross_bps,
            net_bps,
            detected_ns: now,
        };

        shm.increment_opps_detected();

        if self.try_execute(&opp, &cfg, shm) {
            shm.increment_opps_executed();
        } else {
            self.diagnostics.eligibility_skips.fetch_add(1, Ordering::Relaxed);
        }

        Some(opp)
    }

    fn try_execute(&self, opp: &Opportunity, cfg: &DetectorConfig, shm: &SharedRegion) -> bool {
        if !cfg.strategy_enabled[0] {
            return false;
        }
        let balance = shm.balance();
        let notional = cfg.position_cap_usd.min(balance.max(0.0));
        if notional <= 0.0 || notional > cfg.position_cap_usd || notional > balance {
            return false;
        }

        let pnl = (opp.net_bps / 10_000.0) * notional;
        let fees = (2.0 * cfg.fee_bps / 10_000.0) * notional;

        let op = Operation {
            id: NEXT_OPERATION_ID.fetch_add(1, Ordering::Relaxed),
            ts_ns: opp.detected_ns,
            kind: "arbitrage".to_string(),
            strategy: STRATEGY_NAMES[0].to_string(),
            symbol: self.symbol_names.name_of(opp.symbol.0).unwrap_or_default(),
            buy_venue: self.venue_names.name_of(opp.buy_venue.0).unwrap_or_default(),
            sell_venue: self.venue_names.name_of(opp.sell_venue.0).unwrap_or_default(),
            qty: notional / opp.buy_ask,
            entry_px: opp.buy_ask,
            exit_px: opp.sell_bid,
            pnl,
            pnl_pct: if notional > 0.0 { pnl / notional * 100.0 } else { 0.0 },
            spread_bps: opp.net_bps,
            fees_paid: fees,
            is_open: false,
        };

        shm.push_operation(&op);
        // Simulation mode executes the paired buy/sell leg as one synthetic,
        // already-closed operation (spec.md 4.B step 5): the order is
        // placed and filled in the same step, so both counters advance
        // together.
        shm.increment_orders_placed();
        shm.increment_orders_filled();
        shm.add_profit(pnl);
        shm.set_balance(balance + pnl);
        shm.record_trade_outcome(pnl > 0.0);
        true
    }

    fn record_latency(&self, sample_us: u64, shm: &SharedRegion) {
        self.latency.record(sample_us);
        // EWMA(alpha = 1/64), spec.md 4.D.
        let prev = self.ewma_latency_us.load(Ordering::Relaxed);
        let next = if prev == 0 {
            sample_us
        } else {
            prev + (sample_us as i64 - prev as i64) / 64
        }
        .max(0) as u64;
        self.ewma_latency_us.store(next, Ordering::Relaxed);
        shm.set_latency(next as u32, self.latency.p99() as u32);
    }
}

/// Tie-break rule (spec.md 4.B): greater top-of-book size wins; on a
/// further tie, the lower numeric venue id wins (stable).
fn pick_best(
    current: Option<(f64, f64, VenueId)>,
    candidate: (f64, f64, VenueId),
    is_bid: bool,
) -> (f64, f64, VenueId) {
    let Some(cur) = current else { return candidate };
    let better_price = if is_bid {
        candidate.0 > cur.0
    } else {
        candidate.0 < cur.0
    };
    if better_price {
        return candidate;
    }
    if candidate.0 == cur.0 {
        if candidate.1 > cur.1 {
            return candidate;
        }
        if candidate.1 == cur.1 && candidate.2 .0 < cur.2 .0 {
            return candidate;
        }
    }
    cur
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{Interner, SymbolId, VenueId};
    use tempfile::tempdir;

    fn setup(capacity: u32) -> (Detector, QuoteCache, SharedRegion, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let shm = SharedRegion::create(&dir.path().join("shm"), capacity).unwrap();
        shm.set_balance(10_000.0);
        let venues = Arc::new(Interner::new(8));
        let symbols = Arc::new(Interner::new(8));
        venues.intern("A");
        venues.intern("B");
        symbols.intern("BTCUSDT");
        let cache = QuoteCache::new(2, 1);
        let detector = Detector::new(
            DetectorConfig {
                min_spread_bps: 3.0,
                fee_bps: 10.0,
                slippage_bps: 2.0,
                strategy_enabled: [true, false, false],
                position_cap_usd: 100.0,
                freshness_window_ms: 500,
            },
            venues,
            symbols,
        );
        (detector, cache, shm, dir)
    }

    #[test]
    fn unprofitable_cross_is_not_emitted() {
        let (detector, cache, shm, _dir) = setup(10);
        let now = crate::now_ns();
        cache.submit(VenueId(0), SymbolId(0), 30_000.0, 30_010.0, 1.0, 1.0, now);
        cache.submit(VenueId(1), SymbolId(0), 30_020.0, 30_025.0, 1.0, 1.0, now + 1);
        let opp = detector.scan_symbol(&cache, SymbolId(0), &shm);
        assert!(opp.is_none());
        assert_eq!(shm.stats_snapshot().opps_detected, 0);
    }

    #[test]
    fn profitable_cross_is_emitted_and_executed() {
        let (detector, cache, shm, _dir) = setup(10);
        let now = crate::now_ns();
        cache.submit(VenueId(0), SymbolId(0), 30_000.0, 30_010.0, 1.0, 1.0, now);
        cache.submit(VenueId(1), SymbolId(0), 30_100.0, 30_105.0, 1.0, 1.0, now + 1);
        let opp = detector.scan_symbol(&cache, SymbolId(0), &shm).unwrap();
        assert!(opp.net_bps >= 3.0);
        let stats = shm.stats_snapshot();
        assert_eq!(stats.opps_detected, 1);
        assert_eq!(stats.opps_executed, 1);
        assert!(stats.total_profit_usd > 0.0);
    }

    #[test]
    fn stale_venue_is_excluded() {
        let (detector, cache, shm, _dir) = setup(10);
        cache.submit(VenueId(0), SymbolId(0), 2_000.0, 2_001.0, 1.0, 1.0, 0);
        cache.submit(VenueId(1), SymbolId(0), 2_050.0, 2_051.0, 1.0, 1.0, 0);
        // Age venue 0 past the 500ms freshness window by scanning "now" far later.
        // scan_symbol_inner uses crate::now_ns() internally, so we simulate
        // staleness by using timestamps already far in the past relative to now.
        let opp = detector.scan_symbol(&cache, SymbolId(0), &shm);
        // Both quotes were submitted with ts_ns=0, both effectively "ancient"
        // relative to now_ns(), so both are excluded and no cross is found.
        assert!(opp.is_none());
    }

    #[test]
    fn negative_fee_bps_skips_the_symbol() {
        let (detector, cache, shm, _dir) = setup(10);
        detector
            .config
            .store(Arc::new(DetectorConfig {
                fee_bps: -1.0,
                ..detector.config()
            }));
        cache.submit(VenueId(0), SymbolId(0), 30_000.0, 30_010.0, 1.0, 1.0, crate::now_ns());
        cache.submit(VenueId(1), SymbolId(0), 30_100.0, 30_105.0, 1.0, 1.0, crate::now_ns());
        let opp = detector.scan_symbol(&cache, SymbolId(0), &shm);
        assert!(opp.is_none());
        assert_eq!(
            detector.diagnostics.symbol_errors.load(Ordering::Relaxed),
            1
        );
    }

    #[test]
    fn strategy_name_lookup() {
        assert_eq!(strategy_index("cross_exchange"), Some(0));
        assert_eq!(strategy_index("triangular"), Some(2));
        assert_eq!(strategy_index("unknown"), None);
    }
}
