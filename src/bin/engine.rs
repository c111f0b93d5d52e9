//! `engine` binary: owns the shared-memory region as the single writer,
//! runs the detector (driven by `submit_quote`), the control-channel
//! thread, and the recorder thread. A standalone feed can talk to it via
//! `submit_quote` (in-process) or, for soak-testing, via the
//! `replay_feed` binary + a future network adapter.
//!
//! This binary itself has no exchange feed wired in (spec.md: "the core
//! assumes a push interface"); it exposes `submit_quote` for a future
//! caller and, in the meantime, demonstrates the wiring with a
//! synthetic feed when `ARB_DEMO_FEED=1`.

use anyhow::{Context, Result};
use arb_core::config::Config;
use arb_core::control::{run_control_channel, CommandHandler};
use arb_core::engine::Engine;
use arb_core::recorder::SnapshotStore;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "engine")]
#[command(about = "Cross-exchange spot arbitrage core: quote cache, detector, shared-memory contract, control channel, and snapshot recorder.")]
struct Args {
    /// Run a synthetic two-venue quote feed to demonstrate the wiring
    /// without a live exchange driver.
    #[arg(long, env = "ARB_DEMO_FEED", default_value_t = false)]
    demo_feed: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = Config::from_env();

    pin_detector_core(config.detector_pin_core);

    let engine = Arc::new(Engine::start(config.clone()).context("failed to start engine")?);

    let store = Arc::new(
        SnapshotStore::open(&config.recorder_db_path).context("failed to open snapshot store")?,
    );
    let recorder = Arc::new(engine.build_recorder(store, 0.0));

    let control_engine = engine.clone();
    let handler: CommandHandler = Arc::new(move |cmd| control_engine.apply_command(cmd));
    let control_stats = engine.control_stats.clone();
    let control_socket = config.socket_path.clone();
    let control_handle = tokio::spawn(async move {
        if let Err(e) = run_control_channel(&control_socket, handler, control_stats).await {
            warn!(error = %e, "control channel exited");
        }
    });

    let recorder_engine = engine.clone();
    let recorder_clone = recorder.clone();
    let recorder_interval = Duration::from_millis(config.recorder_interval_ms);
    let recorder_handle = tokio::spawn(async move {
        let mut tick = tokio::time::interval(recorder_interval);
        while recorder_engine.is_running() {
            tick.tick().await;
            if let Err(e) = recorder_clone.sample_and_store(&recorder_engine.cache) {
                warn!(error = %e, "snapshot recorder batch failed");
            }
        }
    });

    if args.demo_feed {
        let demo_engine = engine.clone();
        tokio::spawn(async move { run_demo_feed(demo_engine).await });
    }

    info!(
        shm_path = %config.shm_path,
        socket_path = %config.socket_path,
        "engine running; Ctrl-C to shut down"
    );
    tokio::signal::ctrl_c().await.ok();
    engine.shutdown();

    control_handle.abort();
    let _ = recorder_handle.await;
    Ok(())
}

/// A synthetic two-venue quote generator, useful for `cargo run --bin
/// engine -- --demo-feed` smoke tests without network access.
async fn run_demo_feed(engine: Arc<Engine>) {
    let mut tick = tokio::time::interval(Duration::from_millis(50));
    let mut phase: f64 = 0.0;
    while engine.is_running() {
        tick.tick().await;
        phase += 0.1;
        let wobble = phase.sin() * 15.0;
        let now = arb_core::now_ns();
        engine.submit_quote("binance", "BTCUSDT", 30_000.0, 30_010.0, 1.0, 1.0, now);
        engine.submit_quote(
            "bybit",
            "BTCUSDT",
            30_010.0 + wobble,
            30_020.0 + wobble,
            1.0,
            1.0,
            now,
        );
    }
}

/// Pin this process's main thread to the configured CPU core, where the
/// platform supports it (spec.md section 5: "pinned where supported").
/// Best-effort only: an out-of-range index or an unsupported platform just
/// logs a warning and leaves the thread unpinned.
#[cfg(target_os = "linux")]
fn pin_detector_core(core: Option<usize>) {
    let Some(core) = core else { return };
    match core_affinity::get_core_ids() {
        Some(core_ids) => match core_ids.get(core) {
            Some(id) => {
                if core_affinity::set_for_current(*id) {
                    info!(core, "pinned detector thread to CPU core");
                } else {
                    warn!(core, "failed to pin detector thread to CPU core");
                }
            }
            None => warn!(core, available = core_ids.len(), "requested core out of range, not pinning"),
        },
        None => warn!("could not enumerate CPU core ids, not pinning"),
    }
}

#[cfg(not(target_os = "linux"))]
fn pin_detector_core(core: Option<usize>) {
    if let Some(core) = core {
        warn!(core, "CPU pinning is only supported on linux; ignoring ARB_DETECTOR_PIN_CORE");
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "arb_core=info,engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

