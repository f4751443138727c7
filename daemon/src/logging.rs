use anyhow::{Context, Result};
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

pub fn init(level: &str) -> Result<()> {
    let level = Level::from_str(level).unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")
}
