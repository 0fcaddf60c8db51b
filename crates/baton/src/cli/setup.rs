//! Global setup for CLI invocations
//!
//! - Logging initialization with tracing
//! - Config loading plus the `--db` override
//! - Opening the shared store

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use baton_core::{load_config, Config, Store};
use clap::ArgMatches;

/// Everything a handler needs for one invocation
#[derive(Debug, Clone)]
pub struct Context {
    pub config: Config,
    pub store: Store,
    pub json: bool,
}

/// Initialize tracing subscriber for logging
///
/// Logs go to stderr so `--json` output on stdout stays parseable.
/// Defaults to WARN; raise it with `RUST_LOG`.
///
/// # Errors
/// Returns an error if a subscriber is already installed
pub fn init_tracing() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {e}"))
}

/// Resolve the database path: `--db` wins over the loaded config
pub fn resolve_db_path(matches: &ArgMatches, config: &Config) -> PathBuf {
    matches
        .get_one::<String>("db")
        .map_or_else(|| config.state_db.clone(), PathBuf::from)
}

/// Load config and open the store named by the invocation
///
/// # Errors
/// Returns an error if config loading fails or the database cannot be opened
pub async fn open_context(matches: &ArgMatches) -> Result<Context> {
    let config = load_config().await?;
    let path = resolve_db_path(matches, &config);

    tracing::debug!(path = %path.display(), "Opening state database");
    let store = Store::open(&path, &config.store)
        .await
        .with_context(|| format!("Cannot open state database {}", path.display()))?;

    Ok(Context {
        config,
        store,
        json: matches.get_flag("json"),
    })
}
