//! Process-wide engine context (spec.md section 9 design note: replaces
//! the source's global singletons `bridge`/`binance_service` with an
//! explicitly constructed and explicitly passed struct, in the shape of
//! the teacher's `AppState` in `main.rs`).
//!
//! `Engine` owns the shared-memory region as the single writer, the quote
//! cache, the detector, the interners, and the recorder/control-channel
//! wiring. `submit_quote` is the single external push entry point spec.md
//! section 1 names.

use crate::config::Config;
use crate::control::{ControlChannelStats, ControlCommand};
use crate::detector::Detector;
use crate::error::EngineError;
use crate::ids::{Interner, SymbolId, VenueId};
use crate::quote_cache::{QuoteCache, SubmitOutcome};
use crate::recorder::{Recorder, SnapshotStore};
use crate::shm::SharedRegion;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Process-wide context wiring components A, B, E, F, G into a single
/// owned struct, created once at startup.
pub struct Engine {
    pub config: Config,
    pub shm: Arc<SharedRegion>,
    pub cache: Arc<QuoteCache>,
    pub detector: Arc<Detector>,
    pub venue_names: Arc<Interner>,
    pub symbol_names: Arc<Interner>,
    pub control_stats: Arc<ControlChannelStats>,
    running: Arc<AtomicBool>,
}

impl Engine {
    /// Map (or create) the shared-memory region, build the quote cache and
    /// detector, and mark `engine_running = true`. This is the write-once
    /// initialization spec.md section 4.E describes.
    pub fn start(config: Config) -> Result<Self, EngineError> {
        let shm = Arc::new(SharedRegion::create(
            std::path::Path::new(&config.shm_path),
            config.ring_capacity,
        )?);
        shm.set_balance(config.starting_balance_usd);
        for (slot, enabled) in config.detector.strategy_enabled.iter().enumerate() {
            shm.set_strategy_enabled(slot, *enabled);
        }

        let venue_names = Arc::new(Interner::new(crate::ids::MAX_VENUES));
        let symbol_names = Arc::new(Interner::new(crate::ids::MAX_SYMBOLS));
        let cache = Arc::new(QuoteCache::new(crate::ids::MAX_VENUES, crate::ids::MAX_SYMBOLS));
        let detector = Arc::new(Detector::new(
            config.detector,
            venue_names.clone(),
            symbol_names.clone(),
        ));

        info!(shm_path = %config.shm_path, "engine started");

        Ok(Self {
            config,
            shm,
            cache,
            detector,
            venue_names,
            symbol_names,
            control_stats: Arc::new(ControlChannelStats::default()),
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Cooperative shutdown: flips `engine_running` in the shared image and
    /// the in-process flag the detector/recorder loops poll at their scan
    /// boundaries (spec.md section 5).
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Relaxed);
        self.shm.set_engine_running(false);
        info!("engine shutdown requested");
    }

    /// External push interface (spec.md section 1):
    /// `submit_quote(venue, symbol, bid, ask, bid_qty, ask_qty, ts_ns)`.
    /// Interns the venue/symbol name on first sight, writes the quote into
    /// the cache, and — if the write changed the best bid or ask — runs
    /// one detector scan for that symbol.
    #[allow(clippy::too_many_arguments)]
    pub fn submit_quote(
        &self,
        venue: &str,
        symbol: &str,
        bid: f64,
        ask: f64,
        bid_qty: f64,
        ask_qty: f64,
        ts_ns: u64,
    ) {
        let Some(venue_id) = self.venue_names.intern(venue) else {
            warn!(venue, "venue interner at capacity, quote dropped");
            return;
        };
        let Some(symbol_id) = self.symbol_names.intern(symbol) else {
            warn!(symbol, "symbol interner at capacity, quote dropped");
            return;
        };

        let outcome = self.cache.submit(
            VenueId(venue_id as u8),
            SymbolId(symbol_id),
            bid,
            ask,
            bid_qty,
            ask_qty,
            ts_ns,
        );

        if outcome == SubmitOutcome::Changed {
            self.detector
                .scan_symbol(&self.cache, SymbolId(symbol_id), &self.shm);
        }
    }

    /// Apply a decoded control-channel command. Effects land before the
    /// next detector scan boundary, as spec.md section 4.F requires; there
    /// is no reply frame.
    pub fn apply_command(&self, cmd: ControlCommand) {
        match cmd {
            ControlCommand::StartStrategy(name) => self.set_strategy(&name, true),
            ControlCommand::StopStrategy(name) => self.set_strategy(&name, false),
            ControlCommand::UpdateConfig(payload) => self.update_config(&payload),
            ControlCommand::Shutdown => self.shutdown(),
        }
    }

    fn set_strategy(&self, name: &str, enabled: bool) {
        match crate::detector::strategy_index(name) {
            Some(idx) => {
                let mut cfg = self.detector.config();
                cfg.strategy_enabled[idx] = enabled;
                if self.detector.update_config(cfg).is_ok() {
                    self.shm.set_strategy_enabled(idx, enabled);
                }
            }
            None => {
                self.detector
                    .diagnostics
                    .config_rejects
                    .fetch_add(1, Ordering::Relaxed);
                warn!(name, "unknown strategy name in control command");
            }
        }
    }

    /// `update_config` payload is a JSON-encoded partial/full
    /// [`crate::config::DetectorConfig`]; invalid JSON or an
    /// out-of-range value is rejected and the previous config kept
    /// (spec.md section 7's `Configuration` error class).
    fn update_config(&self, payload: &str) {
        match serde_json::from_str::<crate::config::DetectorConfig>(payload) {
            Ok(new_cfg) => {
                if let Err(e) = self.detector.update_config(new_cfg) {
                    warn!(error = %e, "rejected config update");
                }
            }
            Err(e) => {
                self.detector
                    .diagnostics
                    .config_rejects
                    .fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "malformed update_config payload");
            }
        }
    }

    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Build a [`Recorder`] bound to this engine's cache and interners.
    pub fn build_recorder(&self, store: Arc<SnapshotStore>, min_move_bps: f64) -> Recorder {
        Recorder::new(store, self.venue_names.clone(), self.symbol_names.clone(), min_move_bps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_config(dir: &std::path::Path) -> Config {
        Config {
            shm_path: dir.join("shm").to_string_lossy().into_owned(),
            socket_path: dir.join("ctl.sock").to_string_lossy().into_owned(),
            recorder_db_path: dir.join("snaps.db").to_string_lossy().into_owned(),
            ring_capacity: 16,
            ..Config::default()
        }
    }

    #[test]
    fn submit_quote_interns_and_scans() {
        let dir = tempdir().unwrap();
        let engine = Engine::start(test_config(dir.path())).unwrap();
        let now = crate::now_ns();
        engine.submit_quote("binance", "BTCUSDT", 30_000.0, 30_010.0, 1.0, 1.0, now);
        engine.submit_quote("bybit", "BTCUSDT", 30_100.0, 30_105.0, 1.0, 1.0, now + 1);
        let stats = engine.shm.stats_snapshot();
        assert_eq!(stats.opps_detected, 1);
        assert_eq!(stats.opps_executed, 1);
    }

    #[test]
    fn shutdown_command_flips_running_flags() {
        let dir = tempdir().unwrap();
        let engine = Engine::start(test_config(dir.path())).unwrap();
        engine.apply_command(ControlCommand::Shutdown);
        assert!(!engine.is_running());
        assert!(!engine.shm.engine_running());
    }

    #[test]
    fn start_strategy_unknown_name_increments_config_rejects() {
        let dir = tempdir().unwrap();
        let engine = Engine::start(test_config(dir.path())).unwrap();
        engine.apply_command(ControlCommand::StartStrategy("quantum_arb".to_string()));
        assert_eq!(
            engine
                .detector
                .diagnostics
                .config_rejects
                .load(Ordering::Relaxed),
            1
        );
    }

    #[test]
    fn update_config_rejects_malformed_json() {
        let dir = tempdir().unwrap();
        let engine = Engine::start(test_config(dir.path())).unwrap();
        engine.apply_command(ControlCommand::UpdateConfig("not json".to_string()));
        assert_eq!(
            engine
                .detector
                .diagnostics
                .config_rejects
                .load(Ordering::Relaxed),
            1
        );
    }
}
