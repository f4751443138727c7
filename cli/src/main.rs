use anyhow::{Context, Result};
use blackbox_core::config::Config;
use blackbox_core::elm327::{list_ports, Elm327};
use blackbox_core::hardware::LinuxI2cBus;
use blackbox_core::obd::ObdSampler;
use blackbox_core::rtc::{Clock, Ds3231};
use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "/etc/blackbox/config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the time held by the RTC
    ReadClock,
    /// Write a time to the RTC (defaults to the host's local time)
    SetClock {
        /// "YYYY-MM-DD HH:MM:SS"
        #[arg(long)]
        at: Option<String>,
    },
    /// List serial ports that may host an OBD adapter
    Ports,
    /// Query every logged metric once
    Sample,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = if cli.config.exists() {
        Config::load_from_file(&cli.config).context("Failed to load config")?
    } else {
        Config::default()
    };

    match cli.command {
        Commands::ReadClock => {
            let mut rtc = open_rtc(&config)?;
            let now = rtc.read_datetime().context("Failed to read RTC")?;
            println!("{}", now.format("%Y-%m-%d %H:%M:%S"));
        }
        Commands::SetClock { at } => {
            let target = match at {
                Some(s) => NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
                    .with_context(|| format!("'{}' is not YYYY-MM-DD HH:MM:SS", s))?,
                None => chrono::Local::now().naive_local(),
            };
            let mut rtc = open_rtc(&config)?;
            rtc.set_datetime(&target).context("Failed to set RTC")?;
            println!("RTC set to {}", target.format("%Y-%m-%d %H:%M:%S"));
        }
        Commands::Ports => {
            let ports = list_ports();
            if ports.is_empty() {
                println!("No serial ports found");
            }
            for port in ports {
                println!("{}", port);
            }
        }
        Commands::Sample => {
            let mut elm = Elm327::connect(&config.obd).context("Could not reach an OBD adapter")?;
            let s = elm.sample().context("Query failed")?;
            println!("--- OBD sample ({}) ---", elm.name());
            println!("RPM:          {}", s.rpm);
            println!("Speed:        {} km/h", s.speed);
            println!("Throttle:     {:.1}%", s.throttle);
            println!("Engine load:  {:.1}%", s.load);
            println!("Fuel status:  {}", s.fuel_status);
        }
    }

    Ok(())
}

fn open_rtc(config: &Config) -> Result<Ds3231<LinuxI2cBus>> {
    let bus = LinuxI2cBus::open(&config.rtc.bus, config.rtc.address)
        .with_context(|| format!("Failed to open RTC on {}", config.rtc.bus))?;
    Ok(Ds3231::new(bus))
}
