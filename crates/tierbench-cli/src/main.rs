//! Tierbench CLI
//!
//! # Usage
//!
//! ```bash
//! tierbench rx --mode pipeline --tier cxl --rx-cores 4 --sample-freq 64
//! tierbench tx --tx-cores 2 --burst-us 100 --gap-us 50 --latency-out lat.txt
//! tierbench loopback --tier cxl --relaxed-numa --sw-timestamp --duration-secs 5
//! ```
//!
//! Every subcommand runs until SIGINT/SIGTERM (or `--duration-secs`), then
//! prints its end-of-run report. Initialisation errors exit with status 1.

use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tierbench_common::{CycleClock, HwStamp, LoopbackPort, Shutdown};
use tierbench_rx::{OpMode, RxEngine, TierMode};
use tierbench_tx::packet::SECONDARY_DST_PORT;
use tierbench_tx::TxEngine;

mod args;
mod output;
mod signal;

use args::{RxArgs, TxArgs};
use output::OutputFormat;

const CALIBRATION_WINDOW: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(name = "tierbench")]
#[command(version)]
#[command(about = "Tiered-memory packet processing testbed", long_about = None)]
struct Cli {
    /// Report format
    #[arg(long, short, global = true, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Monitor interval
    #[arg(long, global = true, env = "TIERBENCH_INTERVAL_MS")]
    interval_ms: Option<u64>,

    /// Stop after this many seconds
    #[arg(long, global = true)]
    duration_secs: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Tiered receive pipeline
    Rx(RxArgs),
    /// Burst generator and telemetry correlator
    Tx(TxArgs),
    /// Both sides in one process over in-memory wires
    Loopback {
        #[command(flatten)]
        rx: RxArgs,
        #[command(flatten)]
        tx: TxArgs,
    },
}

fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn calibrate() -> anyhow::Result<CycleClock> {
    let clock = CycleClock::calibrate(CALIBRATION_WINDOW)?;
    tracing::info!(hz = clock.hz(), "cycle counter calibrated");
    Ok(clock)
}

fn run_rx(cli: &Cli, args: RxArgs) -> anyhow::Result<()> {
    let config = args.into_config(cli.interval_ms)?;
    let shutdown = Shutdown::new();
    let mut engine = RxEngine::new(config, calibrate()?, shutdown.clone())?;
    let port = Arc::new(engine.loopback_port(HwStamp::Rx)?);
    tracing::warn!("no traffic source attached, the port only sees frames delivered in-process");

    let signals = signal::spawn_signal_thread(shutdown, cli.duration_secs.map(Duration::from_secs))?;
    engine.start(port)?;
    engine.run_monitor();
    let report = engine.stop();
    let _ = signals.join();

    cli.format.print(&report, |r| r.log());
    Ok(())
}

fn run_tx(cli: &Cli, args: TxArgs) -> anyhow::Result<()> {
    let config = args.into_config(cli.interval_ms)?;
    let shutdown = Shutdown::new();
    let mut engine = TxEngine::new(config, calibrate()?, shutdown.clone())?;
    let port = Arc::new(engine.loopback_port(HwStamp::Tx)?);
    tracing::warn!("no receiver attached, generated frames are dropped");

    let signals = signal::spawn_signal_thread(shutdown, cli.duration_secs.map(Duration::from_secs))?;
    engine.start(port)?;
    engine.run_monitor();
    let report = engine.stop()?;
    let _ = signals.join();

    cli.format.print(&report, |r| r.log());
    Ok(())
}

fn run_loopback(cli: &Cli, rx_args: RxArgs, tx_args: TxArgs) -> anyhow::Result<()> {
    let rx_config = rx_args.into_config(cli.interval_ms)?;
    let place_after_rx = tx_args.tx_first_core.is_none() && tx_args.tx_config.is_none();
    let mut tx_config = tx_args.into_config(cli.interval_ms)?;
    if place_after_rx {
        let per_lane = match rx_config.op_mode {
            OpMode::Pipeline => 2,
            OpMode::Rtc => 1,
        };
        tx_config.first_core = rx_config.first_core + per_lane * rx_config.rx_cores as usize;
    }
    if rx_config.tier_mode != TierMode::None && tx_config.secondary_dst_port.is_none() {
        tx_config.secondary_dst_port = Some(SECONDARY_DST_PORT);
        tracing::info!(port = SECONDARY_DST_PORT, "steering half the traffic to secondary tiers");
    }

    let clock = calibrate()?;
    let shutdown = Shutdown::new();
    let mut rx = RxEngine::new(rx_config, clock, shutdown.clone())?;
    let mut tx = TxEngine::new(tx_config, clock, shutdown.clone())?;

    let rx_port = Arc::new(rx.loopback_port(HwStamp::Rx)?);
    let tx_port = Arc::new(tx.loopback_port(HwStamp::Tx)?);
    LoopbackPort::connect(&tx_port, &rx_port);

    let signals = signal::spawn_signal_thread(
        shutdown.clone(),
        cli.duration_secs.map(Duration::from_secs),
    )?;
    rx.start(rx_port)?;
    if let Err(e) = tx.start(tx_port) {
        shutdown.trigger();
        rx.stop();
        return Err(e.into());
    }

    let rx_monitor = rx.monitor();
    let rx_interval = rx.monitor_interval();
    let monitor_shutdown = shutdown.clone();
    std::thread::scope(|s| {
        s.spawn(move || rx_monitor.run(rx_interval, &monitor_shutdown));
        tx.run_monitor();
    });

    let tx_report = tx.stop()?;
    let rx_report = rx.stop();
    let _ = signals.join();

    cli.format.print(&rx_report, |r| r.log());
    cli.format.print(&tx_report, |r| r.log());
    Ok(())
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    tracing::info!("tierbench v{}", env!("CARGO_PKG_VERSION"));

    let result = match cli.command {
        Commands::Rx(ref args) => run_rx(&cli, args.clone()),
        Commands::Tx(ref args) => run_tx(&cli, args.clone()),
        Commands::Loopback { ref rx, ref tx } => run_loopback(&cli, rx.clone(), tx.clone()),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "fatal");
        std::process::exit(1);
    }
}
