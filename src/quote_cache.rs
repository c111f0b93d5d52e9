//! Per-(venue, symbol) top-of-book cache (component A).
//!
//! Readers never block a writer and a writer never blocks on a reader: each
//! cell is guarded by a seqlock-style generation counter (even = stable, odd
//! = write in flight) rather than a `RwLock`, so `read()` is wait-free with
//! respect to `submit()` and only spins against a genuinely concurrent write
//! to the *same* cell — which spec.md section 5 says should be rare, since
//! writers for a given (venue, symbol) are expected to be serialized
//! upstream.

use crate::ids::{SymbolId, VenueId, MAX_SYMBOLS, MAX_VENUES};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::model::Quote;

struct QuoteCell {
    /// Even when stable, odd while a write is in flight.
    generation: AtomicU32,
    bid: AtomicU64,
    ask: AtomicU64,
    bid_qty: AtomicU64,
    ask_qty: AtomicU64,
    ts_ns: AtomicU64,
    seq: AtomicU64,
}

impl QuoteCell {
    fn new() -> Self {
        Self {
            generation: AtomicU32::new(0),
            bid: AtomicU64::new(0),
            ask: AtomicU64::new(0),
            bid_qty: AtomicU64::new(0),
            ask_qty: AtomicU64::new(0),
            ts_ns: AtomicU64::new(0),
            seq: AtomicU64::new(0),
        }
    }
}

/// Outcome of a [`QuoteCache::submit`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The quote was written and changed the cell's best bid and/or ask.
    Changed,
    /// The quote was written but matched the existing bid and ask exactly.
    Unchanged,
    /// `ts_ns` was not newer than the cell's current `ts_ns` — no-op.
    Stale,
    /// The quote failed basic validation (NaN/Inf/non-positive ask) and was
    /// dropped; the cache was left unchanged.
    Rejected,
}

/// Flat two-dimensional top-of-book store, indexed by interned venue and
/// symbol ids. Sized once at construction for the process lifetime — there
/// is no eviction.
pub struct QuoteCache {
    venues: usize,
    symbols: usize,
    cells: Vec<QuoteCell>,
    bad_quotes: AtomicU64,
}

impl QuoteCache {
    /// Build a cache addressing up to `venues x symbols` cells. Panics if
    /// either dimension exceeds the fixed enumeration bound (spec.md 4.A:
    /// "typical cardinality <= 32 venues x <= 256 symbols").
    pub fn new(venues: usize, symbols: usize) -> Self {
        assert!(venues <= MAX_VENUES, "venues exceeds MAX_VENUES");
        assert!(symbols <= MAX_SYMBOLS, "symbols exceeds MAX_SYMBOLS");
        let mut cells = Vec::with_capacity(venues * symbols);
        cells.resize_with(venues * symbols, QuoteCell::new);
        Self {
            venues,
            symbols,
            cells,
            bad_quotes: AtomicU64::new(0),
        }
    }

    #[inline]
    fn index(&self, venue: VenueId, symbol: SymbolId) -> Option<usize> {
        let v = venue.0 as usize;
        let s = symbol.0 as usize;
        if v >= self.venues || s >= self.symbols {
            return None;
        }
        Some(v * self.symbols + s)
    }

    pub fn venues(&self) -> usize {
        self.venues
    }

    pub fn symbols(&self) -> usize {
        self.symbols
    }

    pub fn bad_quotes(&self) -> u64 {
        self.bad_quotes.load(Ordering::Relaxed)
    }

    /// Write a new top-of-book sample for `(venue, symbol)`.
    ///
    /// Invalid numbers (NaN, infinite, non-positive ask) are rejected and
    /// `bad_quotes` is incremented; the cache is left unchanged. A quote
    /// with `ts_ns` not newer than the cell's current `ts_ns` is a no-op
    /// (idempotence on stale, spec.md testable property 5).
    #[allow(clippy::too_many_arguments)]
    pub fn submit(
        &self,
        venue: VenueId,
        symbol: SymbolId,
        bid: f64,
        ask: f64,
        bid_qty: f64,
        ask_qty: f64,
        ts_ns: u64,
    ) -> SubmitOutcome {
        let Some(idx) = self.index(venue, symbol) else {
            self.bad_quotes.fetch_add(1, Ordering::Relaxed);
            return SubmitOutcome::Rejected;
        };

        if !is_valid_quote(bid, ask, bid_qty, ask_qty) {
            self.bad_quotes.fetch_add(1, Ordering::Relaxed);
            return SubmitOutcome::Rejected;
        }

        let cell = &self.cells[idx];

        // Cheap pre-check outside the write lock: serialized writers per
        // cell make this race-free in the common case, and a stale write
        // that slips through is caught again once the lock is held.
        if ts_ns <= cell.ts_ns.load(Ordering::Relaxed) && cell.seq.load(Ordering::Relaxed) != 0 {
            return SubmitOutcome::Stale;
        }

        cell.generation.fetch_add(1, Ordering::AcqRel); // -> odd: write in flight

        if ts_ns <= cell.ts_ns.load(Ordering::Relaxed) && cell.seq.load(Ordering::Relaxed) != 0 {
            cell.generation.fetch_add(1, Ordering::Release); // -> even, no change
            return SubmitOutcome::Stale;
        }

        let prev_bid = f64::from_bits(cell.bid.load(Ordering::Relaxed));
        let prev_ask = f64::from_bits(cell.ask.load(Ordering::Relaxed));

        cell.bid.store(bid.to_bits(), Ordering::Relaxed);
        cell.ask.store(ask.to_bits(), Ordering::Relaxed);
        cell.bid_qty.store(bid_qty.to_bits(), Ordering::Relaxed);
        cell.ask_qty.store(ask_qty.to_bits(), Ordering::Relaxed);
        cell.ts_ns.store(ts_ns, Ordering::Relaxed);
        let new_seq = cell.seq.fetch_add(1, Ordering::Relaxed) + 1;

        cell.generation.fetch_add(1, Ordering::Release); // -> even: published

        let _ = new_seq;
        if prev_bid != bid || prev_ask != ask {
            SubmitOutcome::Changed
        } else {
            SubmitOutcome::Unchanged
        }
    }

    /// Read a consistent snapshot of `(venue, symbol)`'s current quote.
    /// Returns `None` if the indices are out of range or the cell has
    /// never been written.
    pub fn read(&self, venue: VenueId, symbol: SymbolId) -> Option<Quote> {
        let idx = self.index(venue, symbol)?;
        let cell = &self.cells[idx];

        loop {
            let g1 = cell.generation.load(Ordering::Acquire);
            if g1 & 1 == 1 {
                std::hint::spin_loop();
                continue;
            }
            let bid = f64::from_bits(cell.bid.load(Ordering::Relaxed));
            let ask = f64::from_bits(cell.ask.load(Ordering::Relaxed));
            let bid_qty = f64::from_bits(cell.bid_qty.load(Ordering::Relaxed));
            let ask_qty = f64::from_bits(cell.ask_qty.load(Ordering::Relaxed));
            let ts_ns = cell.ts_ns.load(Ordering::Relaxed);
            let seq = cell.seq.load(Ordering::Relaxed);
            let g2 = cell.generation.load(Ordering::Acquire);
            if g1 == g2 {
                if seq == 0 {
                    return None;
                }
                return Some(Quote {
                    venue,
                    symbol,
                    bid,
                    ask,
                    bid_qty,
                    ask_qty,
                    ts_ns,
                    seq,
                });
            }
            std::hint::spin_loop();
        }
    }
}

fn is_valid_quote(bid: f64, ask: f64, bid_qty: f64, ask_qty: f64) -> bool {
    [bid, ask, bid_qty, ask_qty].iter().all(|v| v.is_finite()) && ask > 0.0 && bid >= 0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_then_read_round_trips() {
        let cache = QuoteCache::new(2, 2);
        let outcome = cache.submit(VenueId(0), SymbolId(0), 100.0, 100.5, 1.0, 2.0, 10);
        assert_eq!(outcome, SubmitOutcome::Changed);
        let q = cache.read(VenueId(0), SymbolId(0)).unwrap();
        assert_eq!(q.bid, 100.0);
        assert_eq!(q.ask, 100.5);
        assert_eq!(q.seq, 1);
    }

    #[test]
    fn stale_ts_ns_is_a_no_op() {
        let cache = QuoteCache::new(1, 1);
        cache.submit(VenueId(0), SymbolId(0), 100.0, 100.5, 1.0, 2.0, 10);
        let outcome = cache.submit(VenueId(0), SymbolId(0), 999.0, 999.5, 1.0, 2.0, 5);
        assert_eq!(outcome, SubmitOutcome::Stale);
        let q = cache.read(VenueId(0), SymbolId(0)).unwrap();
        assert_eq!(q.bid, 100.0, "stale write must not mutate the cell");
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let cache = QuoteCache::new(1, 1);
        let outcome = cache.submit(VenueId(0), SymbolId(0), f64::NAN, 100.0, 1.0, 1.0, 1);
        assert_eq!(outcome, SubmitOutcome::Rejected);
        assert_eq!(cache.bad_quotes(), 1);
        assert!(cache.read(VenueId(0), SymbolId(0)).is_none());

        let outcome = cache.submit(VenueId(0), SymbolId(0), 100.0, 0.0, 1.0, 1.0, 1);
        assert_eq!(outcome, SubmitOutcome::Rejected);
        assert_eq!(cache.bad_quotes(), 2);
    }

    #[test]
    fn out_of_range_indices_are_rejected() {
        let cache = QuoteCache::new(1, 1);
        let outcome = cache.submit(VenueId(5), SymbolId(0), 1.0, 2.0, 1.0, 1.0, 1);
        assert_eq!(outcome, SubmitOutcome::Rejected);
    }
}
