//! Tracing subscriber for hosts that do not bring their own
//!
//! Without `RUST_LOG`, only this crate logs at the configured level and every
//! other target is held at `warn`, so the native WebRTC stack stays quiet.

use std::fs::OpenOptions;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::{
    filter::LevelFilter, fmt, fmt::writer::BoxMakeWriter, layer::SubscriberExt,
    util::SubscriberInitExt, EnvFilter, Layer,
};

use crate::config::LoggingConfig;

const CRATE_TARGET: &str = "sfu_endpoint";

fn default_filter(level: Level) -> EnvFilter {
    EnvFilter::new(format!(
        "warn,{CRATE_TARGET}={}",
        LevelFilter::from_level(level)
    ))
}

fn make_writer(config: &LoggingConfig) -> anyhow::Result<BoxMakeWriter> {
    match &config.file_path {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Ok(BoxMakeWriter::new(Arc::new(file)))
        }
        None => Ok(BoxMakeWriter::new(std::io::stdout)),
    }
}

/// Install a global subscriber from the `logging` section of
/// [`crate::EndpointConfig`]. Fails if one is already installed.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let level: Level = config
        .level
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid log level: {}", config.level))?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level));
    let writer = make_writer(config)?;

    let layer = match config.format.as_str() {
        "json" => fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(writer)
            .boxed(),
        "pretty" => fmt::layer()
            .pretty()
            .with_file(false)
            .with_writer(writer)
            .boxed(),
        "compact" => fmt::layer().compact().with_writer(writer).boxed(),
        other => anyhow::bail!("Unknown log format: {other}"),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()?;
    Ok(())
}
