//! Tracing subscriber setup.
//!
//! Human-readable output by default; JSON for automation hosts that ingest
//! structured logs.

use clap::ValueEnum;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{CliError, CliResult};

/// Default filter when neither `RUST_LOG` nor `--log-level` is set.
pub const DEFAULT_FILTER: &str = "info,tenantgov_entra=info";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` takes precedence over `filter`.
pub fn init_logging(filter: &str, format: LogFormat) -> CliResult<()> {
    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .map_err(|e| CliError::Config(format!("Invalid log filter '{filter}': {e}")))?;

    let registry = tracing_subscriber::registry().with(filter_layer);
    let result = match format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(false))
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .flatten_event(true),
            )
            .try_init(),
    };
    result.map_err(|e| CliError::Config(format!("Failed to initialize logging: {e}")))?;

    tracing::debug!(filter = %filter, "Logging initialized");
    Ok(())
}
