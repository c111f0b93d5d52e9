//! `backtest` binary: runs the backtest replayer (component H) over a
//! snapshot database for a given window and prints the resulting
//! `BacktestResult` as JSON.

use anyhow::{Context, Result};
use arb_core::backtest::{run_backtest, NoCancellation};
use arb_core::config::Config;
use arb_core::recorder::SnapshotStore;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "backtest")]
#[command(about = "Replay recorded top-of-book snapshots through the cross-exchange detection rule.")]
struct Args {
    /// Path to the snapshot database (defaults to ARB_RECORDER_DB_PATH / Config default).
    #[arg(long)]
    db: Option<String>,

    /// Window start, nanoseconds since the Unix epoch.
    #[arg(long)]
    start_ns: u64,

    /// Window end, nanoseconds since the Unix epoch.
    #[arg(long)]
    end_ns: u64,

    /// Restrict to these venues (repeatable). Empty = all venues.
    #[arg(long = "venue")]
    venues: Vec<String>,

    /// Restrict to these symbols (repeatable). Empty = all symbols.
    #[arg(long = "symbol")]
    symbols: Vec<String>,

    /// Override the detector's default minimum net spread, in bps.
    #[arg(long)]
    min_spread_bps: Option<f64>,

    /// Override the detector's default round-trip fee, in bps.
    #[arg(long)]
    fee_bps: Option<f64>,

    /// Override the detector's default slippage estimate, in bps.
    #[arg(long)]
    slippage_bps: Option<f64>,
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = Config::from_env();

    let db_path = args.db.unwrap_or(config.recorder_db_path);
    let store = SnapshotStore::open(&db_path).context("failed to open snapshot store")?;

    let result = run_backtest(
        &store,
        args.start_ns,
        args.end_ns,
        args.venues,
        args.symbols,
        args.min_spread_bps.unwrap_or(config.detector.min_spread_bps),
        args.fee_bps.unwrap_or(config.detector.fee_bps),
        args.slippage_bps.unwrap_or(config.detector.slippage_bps),
        &NoCancellation,
    )
    .context("backtest replay failed")?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "arb_core=info,backtest=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
