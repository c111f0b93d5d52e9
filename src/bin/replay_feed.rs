//! `replay_feed` binary: replays a recorded snapshot database back through
//! `submit_quote` at (optionally accelerated) wall-clock pace, for
//! soak-testing the engine without live exchange feeds.
//!
//! Grounded on the teacher's own `replay_dome_window` / `dome_replay_ingest`
//! pattern: a standalone binary that drives recorded data back through the
//! live-path contract (here, `Engine::submit_quote`) rather than re-running
//! the backtest aggregation path.

use anyhow::{Context, Result};
use arb_core::config::Config;
use arb_core::engine::Engine;
use arb_core::recorder::SnapshotStore;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "replay_feed")]
#[command(about = "Replay a recorded snapshot database through submit_quote at accelerated pace.")]
struct Args {
    /// Path to the snapshot database.
    #[arg(long)]
    db: Option<String>,

    /// Window start, nanoseconds since the Unix epoch.
    #[arg(long)]
    start_ns: u64,

    /// Window end, nanoseconds since the Unix epoch.
    #[arg(long)]
    end_ns: u64,

    /// Speed multiplier relative to the snapshots' original cadence.
    /// `0` replays as fast as possible with no inter-snapshot delay.
    #[arg(long, default_value_t = 1.0)]
    speed: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = Config::from_env();

    let db_path = args.db.unwrap_or_else(|| config.recorder_db_path.clone());
    let store = SnapshotStore::open(&db_path).context("failed to open snapshot store")?;
    let mut snapshots = store.load_window(args.start_ns, args.end_ns, &[], &[])?;
    snapshots.sort_by_key(|s| s.ts_ns);

    if snapshots.is_empty() {
        info!("no snapshots in the requested window; nothing to replay");
        return Ok(());
    }

    let engine = Engine::start(config).context("failed to start engine")?;
    info!(count = snapshots.len(), speed = args.speed, "replaying snapshots");

    let mut prev_ts_ns: Option<u64> = None;
    for snap in &snapshots {
        if args.speed > 0.0 {
            if let Some(prev) = prev_ts_ns {
                let delta_ns = snap.ts_ns.saturating_sub(prev);
                let sleep_ns = (delta_ns as f64 / args.speed) as u64;
                if sleep_ns > 0 {
                    tokio::time::sleep(std::time::Duration::from_nanos(sleep_ns)).await;
                }
            }
        }
        prev_ts_ns = Some(snap.ts_ns);

        engine.submit_quote(
            &snap.venue,
            &snap.symbol,
            snap.bid,
            snap.ask,
            snap.bid_qty.unwrap_or(0.0),
            snap.ask_qty.unwrap_or(0.0),
            arb_core::now_ns(),
        );
    }

    let stats = engine.shm.stats_snapshot();
    info!(
        opps_detected = stats.opps_detected,
        opps_executed = stats.opps_executed,
        total_profit_usd = stats.total_profit_usd,
        "replay complete"
    );
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "arb_core=info,replay_feed=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
