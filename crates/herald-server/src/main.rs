//! # Herald Server
//!
//! Realtime fan-out for presence, room messages, direct messages and
//! notifications.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! herald
//!
//! # Run with custom config
//! herald --config /path/to/herald.toml
//!
//! # Run with environment variables
//! HERALD_PORT=8080 HERALD_HOST=0.0.0.0 HERALD_BUS__BACKEND=redis herald
//! ```

use anyhow::{bail, Result};
use herald_server::{config::Config, metrics, run_server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "herald=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match config_path()? {
        Some(path) => Config::load_from(Some(&path))?,
        None => Config::load()?,
    };

    tracing::info!("Starting Herald server on {}:{}", config.host, config.port);

    metrics::init_metrics();

    run_server(config).await
}

/// Read `--config <path>` from the command line.
fn config_path() -> Result<Option<String>> {
    let mut args = std::env::args().skip(1);
    match (args.next().as_deref(), args.next()) {
        (None, _) => Ok(None),
        (Some("--config" | "-c"), Some(path)) => Ok(Some(path)),
        (Some(other), _) => bail!("Unexpected argument {other:?}; usage: herald [--config <path>]"),
    }
}
