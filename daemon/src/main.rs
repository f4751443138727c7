use anyhow::{Context, Result};
use blackbox_core::config::Config;
use blackbox_core::elm327::Elm327;
use blackbox_core::hardware::LinuxI2cBus;
use blackbox_core::obd::{ObdSampler, ScriptedObd};
use blackbox_core::rtc::{Clock, Ds3231, SystemClock};
use blackbox_core::session::{Session, StopReason};
use blackbox_core::trip::TripNamer;
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod logging;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "/etc/blackbox/config.toml")]
    config: PathBuf,

    /// Use the host clock and a scripted drive instead of the RTC and OBD adapter
    #[arg(long)]
    dry_run: bool,
}

async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = if args.config.exists() {
        Some(Config::load_from_file(&args.config).context("Failed to load config")?)
    } else {
        None
    };
    let level = config.as_ref().map(|c| c.general.log_level.as_str()).unwrap_or("info");
    logging::init(level)?;

    let config = config.unwrap_or_else(|| {
        warn!("Config file not found at {:?}, using defaults", args.config);
        Config::default()
    });
    info!("Starting blackbox logger...");

    // Samples block a worker thread; Ctrl-C is watched from another one.
    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        interrupted().await;
        on_signal.cancel();
    });

    let clock: Box<dyn Clock + Send> = if args.dry_run {
        info!("Using host clock (Dry Run)");
        Box::new(SystemClock)
    } else {
        let bus = LinuxI2cBus::open(&config.rtc.bus, config.rtc.address)
            .with_context(|| format!("Failed to open RTC on {}", config.rtc.bus))?;
        Box::new(Ds3231::new(bus))
    };

    let obd: Box<dyn ObdSampler + Send> = if args.dry_run {
        info!("Using scripted OBD drive (Dry Run)");
        Box::new(ScriptedObd::demo_drive())
    } else {
        let mut elm = Elm327::connect(&config.obd).context("Failed to connect to OBD adapter")?;
        elm.set_cancellation(shutdown.clone());
        Box::new(elm)
    };

    // Trip files are named after the host's date at start-up.
    let trips = TripNamer::for_date(chrono::Local::now().date_naive());
    let mut session = Session::new(clock, obd, config.output.clone(), trips);

    match session.run(shutdown).await {
        Ok(StopReason::EngineStopped { trip_file }) => {
            info!("Trip saved to {}", trip_file.display());
            Ok(())
        }
        Ok(StopReason::Interrupted) => {
            info!("Stopped by operator after {} rows", session.rows_written());
            Ok(())
        }
        Err(e) => {
            error!("Logging aborted after {} rows: {}", session.rows_written(), e);
            Err(e).context("Logging session failed")
        }
    }
}
