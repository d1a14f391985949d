//! ST-061: Tracing subscriber setup.
//!
//! Logs go to stderr so command output on stdout stays clean. `STRATUS_LOG`
//! takes an `EnvFilter` directive and wins over `--log-level`.

use clap::ValueEnum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const LOG_ENV: &str = "STRATUS_LOG";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Filter from `STRATUS_LOG` when set, otherwise `level` for this crate only.
pub fn build_filter(level: &str) -> Result<EnvFilter, String> {
    match std::env::var(LOG_ENV) {
        Ok(directive) if !directive.trim().is_empty() => EnvFilter::try_new(&directive)
            .map_err(|e| format!("invalid {LOG_ENV} '{directive}': {e}")),
        _ => EnvFilter::try_new(format!("warn,stratus={level}"))
            .map_err(|e| format!("invalid log level '{level}': {e}")),
    }
}

/// Install the global subscriber. Call once, before any command runs.
pub fn init(level: &str, format: LogFormat) -> Result<(), String> {
    let filter = build_filter(level)?;
    let registry = tracing_subscriber::registry().with(filter);
    let installed = match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
    };
    installed.map_err(|e| format!("cannot install log subscriber: {e}"))
}
