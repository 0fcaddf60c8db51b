use std::{process::ExitCode, time::Duration};

use anyhow::Result;
use baton_core::{AgentId, BuildCoordinator, HandleOptions};
use clap::ArgMatches;

use super::{emit, EXIT_WAIT};
use crate::{
    cli::setup::Context,
    commands::build::{self, BuildAction},
};

pub async fn handle(action: BuildAction, ctx: &Context) -> Result<ExitCode> {
    let coordinator = BuildCoordinator::new(ctx.store.clone()).with_config(ctx.config.build);
    let options = HandleOptions::from(ctx.config.build);

    let report = build::run(action, &coordinator, options).await?;
    emit(ctx.json, &report, build::render)?;

    if report.must_wait() {
        Ok(ExitCode::from(EXIT_WAIT))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

pub fn parse_action(matches: &ArgMatches) -> Result<BuildAction> {
    match matches.subcommand() {
        Some(("status", _)) => Ok(BuildAction::Status),
        Some(("broken", _)) => Ok(BuildAction::Broken),
        Some(("fixed", _)) => Ok(BuildAction::Fixed),
        Some(("fix", sub_m)) => {
            let agent = match sub_m.get_one::<String>("agent") {
                Some(id) => AgentId::new(id.as_str())?,
                None => AgentId::from_env()?,
            };
            Ok(BuildAction::Fix { agent })
        }
        Some(("cleanup", sub_m)) => Ok(BuildAction::Cleanup {
            stale: sub_m.get_one::<u64>("stale-ms").map(|ms| Duration::from_millis(*ms)),
        }),
        _ => anyhow::bail!("Unknown build subcommand. Run 'baton build --help' for usage."),
    }
}
