//! Shared-memory contract (component E): a byte-exact, named region mapping
//! the stats block and the operations ring for an out-of-process supervisor
//! to read. The header and per-operation record match spec.md section 6's
//! table exactly; the ring's physical slot count is `capacity + 1` rather
//! than `capacity` so all `capacity` entries section 6 names are usable —
//! see [`layout::physical_slots`].
//!
//! Realized with `memmap2::MmapMut` over a file-backed region — the
//! teacher's own dependency comment ("Memory-mapped IO for shared metrics")
//! is the grounding for reaching for this crate instead of hand-rolled
//! `shm_open`/`mmap` FFI. `/dev/shm` is Linux-specific;
//! [`crate::config::Config::default`] falls back to a temp-dir file when
//! it's unavailable.

use crate::error::EngineError;
use crate::model::{Operation, Stats};
use crate::ring;
use memmap2::MmapMut;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

pub mod layout {
    //! Byte offsets from spec.md section 6's shared-memory layout table.
    pub const ENGINE_RUNNING: usize = 0;
    pub const STRATEGY_ENABLED: usize = 1;
    pub const OPPS_DETECTED: usize = 8;
    pub const OPPS_EXECUTED: usize = 16;
    pub const ORDERS_PLACED: usize = 24;
    pub const ORDERS_FILLED: usize = 32;
    pub const TOTAL_PROFIT_USD: usize = 40;
    pub const BALANCE_USD: usize = 48;
    pub const WINS: usize = 56;
    pub const LOSSES: usize = 60;
    pub const WIN_RATE: usize = 64;
    pub const OPEN_POSITIONS: usize = 72;
    pub const AVG_LATENCY_US: usize = 80;
    pub const P99_LATENCY_US: usize = 84;
    pub const LAST_UPDATE_NS: usize = 88;
    pub const HEADER_SIZE: usize = 96;

    pub fn ops_array_offset() -> usize {
        HEADER_SIZE
    }

    /// Physical slot count backing a ring with `capacity` *usable* entries.
    /// One slot is always kept empty (`(head+1) mod physical == tail` is
    /// the full condition `crate::ring::push` applies), so `capacity`
    /// usable entries need `capacity + 1` physical slots — otherwise a
    /// "capacity"-sized ring can only ever hold `capacity - 1` entries
    /// before it starts overwriting.
    pub fn physical_slots(capacity: u32) -> usize {
        capacity as usize + 1
    }

    pub fn ops_head_offset(capacity: u32) -> usize {
        HEADER_SIZE + physical_slots(capacity) * super::ring::OPERATION_SLOT_SIZE
    }

    pub fn ops_tail_offset(capacity: u32) -> usize {
        ops_head_offset(capacity) + 4
    }

    pub fn total_operations_offset(capacity: u32) -> usize {
        ops_head_offset(capacity) + 8
    }

    /// Total region size `S = 96 + 176*(N+1) + 16`, rounded up to the OS
    /// page size by the caller when truncating the backing file. The
    /// array holds `N + 1` physical slots so all `N` usable entries spec.md
    /// section 6 names are reachable without the one-empty-slot discipline
    /// silently losing one.
    pub fn region_size(capacity: u32) -> usize {
        total_operations_offset(capacity) + 8
    }
}

/// A mapped shared-memory region, either the engine's write-once-at-startup
/// mapping or a supervisor's read path (which retains write access only to
/// advance the ring's `tail`, per spec.md section 5's documented exception).
pub struct SharedRegion {
    mmap: MmapMut,
    capacity: u32,
}

impl SharedRegion {
    /// Create (or truncate) the backing file at `path`, zero the header,
    /// and mark `engine_running = true`. This is the engine's write-once
    /// initialization (spec.md 4.E).
    pub fn create(path: &Path, capacity: u32) -> Result<Self, EngineError> {
        let size = layout::region_size(capacity);
        let page_size = page_size();
        let padded = size.div_ceil(page_size) * page_size;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| EngineError::ShmMapFailed(e.to_string()))?;
        file.set_len(padded as u64)
            .map_err(|e| EngineError::ShmMapFailed(e.to_string()))?;

        let mut mmap =
            unsafe { MmapMut::map_mut(&file).map_err(|e| EngineError::ShmMapFailed(e.to_string()))? };
        mmap[..size].fill(0);

        let region = Self { mmap, capacity };
        region.set_engine_running(true);
        Ok(region)
    }

    /// Open an existing region read/write (the one write a reader is
    /// allowed: advancing the ring's `tail` to acknowledge entries).
    /// Returns `ShmDisconnected` if the path is missing or too small for
    /// `capacity`.
    pub fn open(path: &Path, capacity: u32) -> Result<Self, EngineError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| EngineError::ShmDisconnected(e.to_string()))?;
        let len = file
            .metadata()
            .map_err(|e| EngineError::ShmDisconnected(e.to_string()))?
            .len() as usize;
        if len < layout::region_size(capacity) {
            return Err(EngineError::ShmDisconnected(format!(
                "region too small: {len} bytes, expected at least {}",
                layout::region_size(capacity)
            )));
        }
        let mmap = unsafe {
            MmapMut::map_mut(&file).map_err(|e| EngineError::ShmDisconnected(e.to_string()))?
        };
        Ok(Self { mmap, capacity })
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    fn ptr(&self) -> *mut u8 {
        self.mmap.as_ptr() as *mut u8
    }

    fn u64_at(&self, offset: usize) -> &AtomicU64 {
        unsafe { AtomicU64::from_ptr(self.ptr().add(offset) as *mut u64) }
    }

    fn u32_at(&self, offset: usize) -> &AtomicU32 {
        unsafe { AtomicU32::from_ptr(self.ptr().add(offset) as *mut u32) }
    }

    fn f64_bits_at(&self, offset: usize) -> &AtomicU64 {
        self.u64_at(offset)
    }

    // ---- engine_running / strategy_enabled -----------------------------

    pub fn engine_running(&self) -> bool {
        unsafe { *self.ptr().add(layout::ENGINE_RUNNING) != 0 }
    }

    pub fn set_engine_running(&self, running: bool) {
        unsafe {
            *self.ptr().add(layout::ENGINE_RUNNING) = running as u8;
        }
        self.touch_last_update();
    }

    pub fn strategy_enabled(&self, slot: usize) -> bool {
        assert!(slot < 3);
        unsafe { *self.ptr().add(layout::STRATEGY_ENABLED + slot) != 0 }
    }

    pub fn set_strategy_enabled(&self, slot: usize, enabled: bool) {
        assert!(slot < 3);
        unsafe {
            *self.ptr().add(layout::STRATEGY_ENABLED + slot) = enabled as u8;
        }
        self.touch_last_update();
    }

    // ---- counters --------------------------------------------------------

    pub fn increment_opps_detected(&self) {
        self.u64_at(layout::OPPS_DETECTED).fetch_add(1, Ordering::Relaxed);
        self.touch_last_update();
    }

    pub fn increment_opps_executed(&self) {
        self.u64_at(layout::OPPS_EXECUTED).fetch_add(1, Ordering::Relaxed);
        self.touch_last_update();
    }

    pub fn increment_orders_placed(&self) {
        self.u64_at(layout::ORDERS_PLACED).fetch_add(1, Ordering::Relaxed);
        self.touch_last_update();
    }

    pub fn increment_orders_filled(&self) {
        self.u64_at(layout::ORDERS_FILLED).fetch_add(1, Ordering::Relaxed);
        self.touch_last_update();
    }

    pub fn add_profit(&self, delta_usd: f64) {
        let cur = f64::from_bits(self.f64_bits_at(layout::TOTAL_PROFIT_USD).load(Ordering::Relaxed));
        self.f64_bits_at(layout::TOTAL_PROFIT_USD)
            .store((cur + delta_usd).to_bits(), Ordering::Relaxed);
        self.touch_last_update();
    }

    pub fn set_balance(&self, balance_usd: f64) {
        self.f64_bits_at(layout::BALANCE_USD)
            .store(balance_usd.to_bits(), Ordering::Relaxed);
        self.touch_last_update();
    }

    pub fn balance(&self) -> f64 {
        f64::from_bits(self.f64_bits_at(layout::BALANCE_USD).load(Ordering::Relaxed))
    }

    /// Record a settled trade outcome: bumps `wins`/`losses` and
    /// recomputes `win_rate` (spec.md invariant 3).
    pub fn record_trade_outcome(&self, won: bool) {
        if won {
            self.u32_at(layout::WINS).fetch_add(1, Ordering::Relaxed);
        } else {
            self.u32_at(layout::LOSSES).fetch_add(1, Ordering::Relaxed);
        }
        let wins = self.u32_at(layout::WINS).load(Ordering::Relaxed);
        let losses = self.u32_at(layout::LOSSES).load(Ordering::Relaxed);
        let rate = Stats::compute_win_rate(wins, losses);
        self.f64_bits_at(layout::WIN_RATE)
            .store(rate.to_bits(), Ordering::Relaxed);
        self.touch_last_update();
    }

    pub fn set_open_positions(&self, n: u32) {
        self.u32_at(layout::OPEN_POSITIONS).store(n, Ordering::Relaxed);
        self.touch_last_update();
    }

    pub fn set_latency(&self, avg_us: u32, p99_us: u32) {
        self.u32_at(layout::AVG_LATENCY_US).store(avg_us, Ordering::Relaxed);
        self.u32_at(layout::P99_LATENCY_US).store(p99_us, Ordering::Relaxed);
        self.touch_last_update();
    }

    fn touch_last_update(&self) {
        let now = crate::now_ns();
        self.u64_at(layout::LAST_UPDATE_NS).store(now, Ordering::Release);
    }

    pub fn last_update_ns(&self) -> u64 {
        self.u64_at(layout::LAST_UPDATE_NS).load(Ordering::Acquire)
    }

    /// Read a full, self-consistent snapshot of the stats header, retrying
    /// if `last_update_ns` changes mid-read (spec.md 4.E: "re-read if
    /// `last_update_ns` changes mid-parse").
    pub fn stats_snapshot(&self) -> Stats {
        loop {
            let before = self.last_update_ns();
            let snapshot = Stats {
                engine_running: self.engine_running(),
                strategy_enabled: [
                    self.strategy_enabled(0),
                    self.strategy_enabled(1),
                    self.strategy_enabled(2),
                ],
                opps_detected: self.u64_at(layout::OPPS_DETECTED).load(Ordering::Relaxed),
                opps_executed: self.u64_at(layout::OPPS_EXECUTED).load(Ordering::Relaxed),
                orders_placed: self.u64_at(layout::ORDERS_PLACED).load(Ordering::Relaxed),
                orders_filled: self.u64_at(layout::ORDERS_FILLED).load(Ordering::Relaxed),
                total_profit_usd: f64::from_bits(
                    self.f64_bits_at(layout::TOTAL_PROFIT_USD).load(Ordering::Relaxed),
                ),
                balance_usd: self.balance(),
                wins: self.u32_at(layout::WINS).load(Ordering::Relaxed),
                losses: self.u32_at(layout::LOSSES).load(Ordering::Relaxed),
                win_rate: f64::from_bits(self.f64_bits_at(layout::WIN_RATE).load(Ordering::Relaxed)),
                open_positions: self.u32_at(layout::OPEN_POSITIONS).load(Ordering::Relaxed),
                avg_latency_us: self.u32_at(layout::AVG_LATENCY_US).load(Ordering::Relaxed),
                p99_latency_us: self.u32_at(layout::P99_LATENCY_US).load(Ordering::Relaxed),
                last_update_ns: before,
            };
            if self.last_update_ns() == before {
                return snapshot;
            }
        }
    }

    // ---- operations ring --------------------------------------------------

    /// Physical slot count backing this ring, i.e. `capacity + 1` — see
    /// [`layout::physical_slots`]. [`ring::push`]/[`ring::len`] index
    /// arithmetic must use this, not `self.capacity`, or the ring only
    /// ever holds `capacity - 1` entries before overwriting.
    fn physical_capacity(&self) -> u32 {
        self.capacity + 1
    }

    fn slot_offset(&self, idx: u32) -> usize {
        layout::ops_array_offset() + idx as usize * ring::OPERATION_SLOT_SIZE
    }

    fn head(&self) -> u32 {
        self.u32_at(layout::ops_head_offset(self.capacity)).load(Ordering::Acquire)
    }

    fn tail(&self) -> u32 {
        self.u32_at(layout::ops_tail_offset(self.capacity)).load(Ordering::Acquire)
    }

    /// Writer path (the detector): populate the slot's bytes, then publish
    /// by storing the advanced `head` with release ordering. On overflow,
    /// `tail` is advanced too (lossy overwrite, spec.md 4.C).
    pub fn push_operation(&self, op: &Operation) {
        let head = self.u32_at(layout::ops_head_offset(self.capacity)).load(Ordering::Relaxed);
        let tail = self.tail();
        let result = ring::push(head, tail, self.physical_capacity());

        let offset = self.slot_offset(result.slot);
        let slot = unsafe {
            std::slice::from_raw_parts_mut(self.ptr().add(offset), ring::OPERATION_SLOT_SIZE)
        };
        ring::encode_operation(op, slot);

        if result.overwrote_oldest {
            self.u32_at(layout::ops_tail_offset(self.capacity))
                .store(result.new_tail, Ordering::Relaxed);
        }
        self.u32_at(layout::ops_head_offset(self.capacity))
            .store(result.new_head, Ordering::Release);
        self.u64_at(layout::total_operations_offset(self.capacity))
            .fetch_add(1, Ordering::Relaxed);
        self.touch_last_update();
    }

    /// Reader path (the supervisor): copy every unread entry in
    /// `[tail, head)`, then store `tail := head` to mark them acknowledged.
    pub fn drain_operations(&self) -> Vec<Operation> {
        let head = self.head();
        let tail = self.tail();
        let n = ring::len(head, tail, self.physical_capacity());
        let mut out = Vec::with_capacity(n as usize);
        let mut idx = tail;
        for _ in 0..n {
            let offset = self.slot_offset(idx);
            let slot = unsafe { std::slice::from_raw_parts(self.ptr().add(offset), ring::OPERATION_SLOT_SIZE) };
            out.push(ring::decode_operation(slot));
            idx = (idx + 1) % self.physical_capacity();
        }
        self.u32_at(layout::ops_tail_offset(self.capacity))
            .store(head, Ordering::Release);
        out
    }

    pub fn total_operations(&self) -> u64 {
        self.u64_at(layout::total_operations_offset(self.capacity)).load(Ordering::Relaxed)
    }

    pub fn ring_head(&self) -> u32 {
        self.head()
    }

    pub fn ring_tail(&self) -> u32 {
        self.tail()
    }
}

/// 4 KiB on every platform this core targets; avoids a dedicated `libc`
/// dependency for a single `sysconf` call.
fn page_size() -> usize {
    4096
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn new_region(dir: &Path, capacity: u32) -> SharedRegion {
        SharedRegion::create(&dir.join("shm"), capacity).unwrap()
    }

    #[test]
    fn create_zeroes_header_and_marks_running() {
        let dir = tempdir().unwrap();
        let region = new_region(dir.path(), 8);
        assert!(region.engine_running());
        assert_eq!(region.stats_snapshot().opps_detected, 0);
    }

    #[test]
    fn ring_push_and_drain_round_trips() {
        let dir = tempdir().unwrap();
        let region = new_region(dir.path(), 4);
        for i in 0..3 {
            region.push_operation(&sample_op(i));
        }
        assert_eq!(region.ring_head(), 3);
        let ops = region.drain_operations();
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[0].id, 0);
        assert_eq!(region.ring_tail(), region.ring_head());
    }

    #[test]
    fn ring_overflow_is_lossy_but_never_overtakes() {
        let dir = tempdir().unwrap();
        let region = new_region(dir.path(), 4);
        for i in 0..10 {
            region.push_operation(&sample_op(i));
        }
        // capacity 4 is fully usable (5 physical slots): the most recent
        // 4 entries survive, the first 6 pushed are lost to overwrite.
        let ops = region.drain_operations();
        assert_eq!(ops.len(), 4);
        assert_eq!(ops.first().unwrap().id, 6);
        assert_eq!(ops.last().unwrap().id, 9);
    }

    #[test]
    fn reopen_sees_writer_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shm");
        let writer = SharedRegion::create(&path, 4).unwrap();
        writer.increment_opps_detected();
        let reader = SharedRegion::open(&path, 4).unwrap();
        assert_eq!(reader.stats_snapshot().opps_detected, 1);
    }

    #[test]
    fn open_missing_path_is_disconnected() {
        let dir = tempdir().unwrap();
        let err = SharedRegion::open(&dir.path().join("nope"), 4).unwrap_err();
        assert!(matches!(err, EngineError::ShmDisconnected(_)));
    }

    fn sample_op(id: u64) -> Operation {
        Operation {
            id,
            ts_ns: id,
            kind: "arb".into(),
            strategy: "cross_exchange".into(),
            symbol: "BTCUSDT".into(),
            buy_venue: "binance".into(),
            sell_venue: "bybit".into(),
            qty: 1.0,
            entry_px: 100.0,
            exit_px: 101.0,
            pnl: 1.0,
            pnl_pct: 1.0,
            spread_bps: 10.0,
            fees_paid: 0.1,
            is_open: false,
        }
    }
}
