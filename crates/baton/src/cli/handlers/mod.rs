//! Command dispatch and output

mod build;
mod queue;

use std::process::ExitCode;

use anyhow::Result;
use clap::ArgMatches;
use serde::Serialize;

use super::setup::open_context;

/// Exit status for `build fix` when another agent holds the lease
pub const EXIT_WAIT: u8 = 3;

/// Run the parsed command line
///
/// Arguments are validated before the store is opened, so a rejected
/// invocation never creates a database file.
///
/// # Errors
///
/// Returns any error raised while loading config, opening the store, or
/// running the command.
pub async fn run_cli(matches: &ArgMatches) -> Result<ExitCode> {
    match matches.subcommand() {
        Some(("build", sub_m)) => {
            let action = build::parse_action(sub_m)?;
            build::handle(action, &open_context(matches).await?).await
        }
        Some(("queue", sub_m)) => {
            let action = queue::parse_action(sub_m)?;
            queue::handle(action, &open_context(matches).await?).await
        }
        _ => anyhow::bail!("Unknown command. Run 'baton --help' for usage."),
    }
}

/// Print a report as pretty JSON or as text
pub(crate) fn emit<T: Serialize>(
    json: bool,
    report: &T,
    text: impl FnOnce(&T) -> String,
) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!("{}", text(report));
    }
    Ok(())
}

/// Stable error code for an error chain
pub fn error_code(err: &anyhow::Error) -> &'static str {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<baton_core::Error>())
        .map_or("ERROR", baton_core::Error::code)
}

/// Render an error for stderr, respecting JSON mode
pub fn format_error(err: &anyhow::Error, json: bool) -> String {
    if json {
        serde_json::json!({
            "success": false,
            "error": { "code": error_code(err), "message": format!("{err:#}") },
        })
        .to_string()
    } else {
        format!("Error: {err:#}")
    }
}
