use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::cli::LogFormat;

const DEFAULT_FILTER: &str = "info";

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
pub fn init(format: LogFormat) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to init logging: {e}"))?,
        LogFormat::Text => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to init logging: {e}"))?,
    }

    Ok(())
}
