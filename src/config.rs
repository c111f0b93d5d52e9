//! Process configuration, loaded once from the environment at startup.
//!
//! Mirrors the teacher's `Config::from_env` idiom (`models.rs`): dotenv-aware,
//! every variable has a sane default, parse failures fall back to the
//! default rather than failing startup.

use serde::{Deserialize, Serialize};

/// Detector parameters that can be hot-reloaded at runtime via the control
/// channel (spec.md 4.B "double-buffered config block").
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub min_spread_bps: f64,
    pub fee_bps: f64,
    pub slippage_bps: f64,
    pub strategy_enabled: [bool; 3],
    pub position_cap_usd: f64,
    /// Max age, in milliseconds, for a quote to participate in detection.
    pub freshness_window_ms: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_spread_bps: 3.0,
            fee_bps: 10.0,
            slippage_bps: 2.0,
            strategy_enabled: [true, false, false],
            position_cap_usd: 1_000.0,
            freshness_window_ms: 500,
        }
    }
}

impl DetectorConfig {
    /// Reject configurations with obviously out-of-range parameters,
    /// per spec.md section 7's `Configuration` error class. Negative fees,
    /// slippage, or a non-positive spread floor are rejected; the caller
    /// keeps the previous config and increments `config_rejects`.
    pub fn validate(&self) -> Result<(), String> {
        if self.fee_bps < 0.0 {
            return Err(format!("fee_bps must be >= 0, got {}", self.fee_bps));
        }
        if self.slippage_bps < 0.0 {
            return Err(format!("slippage_bps must be >= 0, got {}", self.slippage_bps));
        }
        if self.position_cap_usd <= 0.0 {
            return Err(format!(
                "position_cap_usd must be > 0, got {}",
                self.position_cap_usd
            ));
        }
        if self.freshness_window_ms == 0 {
            return Err("freshness_window_ms must be > 0".to_string());
        }
        Ok(())
    }
}

/// Process-wide configuration for the `engine` binary (and defaults shared
/// with `backtest`/`replay_feed`).
#[derive(Debug, Clone)]
pub struct Config {
    pub shm_path: String,
    pub ring_capacity: u32,
    pub socket_path: String,
    pub recorder_db_path: String,
    pub recorder_interval_ms: u64,
    pub starting_balance_usd: f64,
    pub detector: DetectorConfig,
    /// CPU core to pin the quote-arrival/detector path to, where supported
    /// (spec.md section 5: "pinned where supported"). `None` = no pinning.
    pub detector_pin_core: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shm_path: default_shm_path(),
            ring_capacity: 100,
            socket_path: "/tmp/arb_core_v1.sock".to_string(),
            recorder_db_path: "./arb_snapshots.db".to_string(),
            detector_pin_core: None,
            recorder_interval_ms: 1_000,
            starting_balance_usd: 10_000.0,
            detector: DetectorConfig::default(),
        }
    }
}

/// `/dev/shm` is Linux-specific; fall back to a temp-dir file elsewhere so
/// the engine still starts (spec.md doesn't mandate POSIX shm specifically,
/// only a "named, process-wide region").
fn default_shm_path() -> String {
    let dev_shm = std::path::Path::new("/dev/shm");
    if dev_shm.is_dir() {
        "/dev/shm/arb_core_v1".to_string()
    } else {
        std::env::temp_dir()
            .join("arb_core_v1")
            .to_string_lossy()
            .into_owned()
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("ARB_SHM_PATH") {
            cfg.shm_path = v;
        }
        if let Ok(v) = std::env::var("ARB_RING_CAPACITY") {
            if let Ok(n) = v.parse() {
                cfg.ring_capacity = n;
            }
        }
        if let Ok(v) = std::env::var("ARB_SOCKET_PATH") {
            cfg.socket_path = v;
        }
        if let Ok(v) = std::env::var("ARB_RECORDER_DB_PATH") {
            cfg.recorder_db_path = v;
        }
        if let Ok(v) = std::env::var("ARB_RECORDER_INTERVAL_MS") {
            if let Ok(n) = v.parse() {
                cfg.recorder_interval_ms = n;
            }
        }
        if let Ok(v) = std::env::var("ARB_DETECTOR_PIN_CORE") {
            if let Ok(n) = v.parse() {
                cfg.detector_pin_core = Some(n);
            }
        }
        if let Ok(v) = std::env::var("ARB_STARTING_BALANCE_USD") {
            if let Ok(n) = v.parse() {
                cfg.starting_balance_usd = n;
            }
        }
        if let Ok(v) = std::env::var("ARB_FRESHNESS_WINDOW_MS") {
            if let Ok(n) = v.parse() {
                cfg.detector.freshness_window_ms = n;
            }
        }
        if let Ok(v) = std::env::var("ARB_FEE_BPS") {
            if let Ok(n) = v.parse() {
                cfg.detector.fee_bps = n;
            }
        }
        if let Ok(v) = std::env::var("ARB_SLIPPAGE_BPS") {
            if let Ok(n) = v.parse() {
                cfg.detector.slippage_bps = n;
            }
        }
        if let Ok(v) = std::env::var("ARB_MIN_SPREAD_BPS") {
            if let Ok(n) = v.parse() {
                cfg.detector.min_spread_bps = n;
            }
        }
        if let Ok(v) = std::env::var("ARB_POSITION_CAP_USD") {
            if let Ok(n) = v.parse() {
                cfg.detector.position_cap_usd = n;
            }
        }

        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_negative_fee_bps() {
        let mut cfg = DetectorConfig::default();
        cfg.fee_bps = -1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn default_config_validates() {
        assert!(DetectorConfig::default().validate().is_ok());
    }
}
