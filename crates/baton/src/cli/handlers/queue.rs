use std::process::ExitCode;

use anyhow::{Context as _, Result};
use baton_core::OperationQueue;
use clap::ArgMatches;

use super::emit;
use crate::{
    cli::setup::Context,
    commands::queue::{self, parse_payload, QueueAction},
};

pub async fn handle(action: QueueAction, ctx: &Context) -> Result<ExitCode> {
    let report = queue::run(action, &OperationQueue::new(ctx.store.clone())).await?;
    emit(ctx.json, &report, queue::render)?;
    Ok(ExitCode::SUCCESS)
}

pub fn parse_action(matches: &ArgMatches) -> Result<QueueAction> {
    match matches.subcommand() {
        Some(("push", sub_m)) => Ok(QueueAction::Push {
            operation: required(sub_m, "operation")?,
            payload: parse_payload(sub_m.get_one::<String>("payload").map(String::as_str))?,
        }),
        Some(("next", _)) => Ok(QueueAction::Next),
        Some(("done", sub_m)) => Ok(QueueAction::Done {
            id: required_id(sub_m)?,
        }),
        Some(("fail", sub_m)) => Ok(QueueAction::Fail {
            id: required_id(sub_m)?,
            message: required(sub_m, "message")?,
        }),
        Some(("pending", _)) => Ok(QueueAction::Pending),
        Some(("history", sub_m)) => Ok(QueueAction::History {
            limit: sub_m.get_one::<u32>("limit").copied().unwrap_or(20),
        }),
        Some(("stats", _)) => Ok(QueueAction::Stats),
        _ => anyhow::bail!("Unknown queue subcommand. Run 'baton queue --help' for usage."),
    }
}

fn required(matches: &ArgMatches, name: &str) -> Result<String> {
    matches
        .get_one::<String>(name)
        .cloned()
        .with_context(|| format!("<{name}> is required"))
}

fn required_id(matches: &ArgMatches) -> Result<i64> {
    matches.get_one::<i64>("id").copied().context("<id> is required")
}
