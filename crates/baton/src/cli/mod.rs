pub mod handlers;
pub mod setup;

use clap::{Arg, ArgAction, Command};

pub fn build_cli() -> Command {
    Command::new("baton")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Build-repair election and serialized VCS queue for cooperating agents")
        .subcommand_required(true)
        .arg(
            Arg::new("db")
                .long("db")
                .global(true)
                .value_name("PATH")
                .help("State database (overrides state_db from config)"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Print machine-readable JSON"),
        )
        .subcommand(cmd_build())
        .subcommand(cmd_queue())
}

fn agent_arg() -> Arg {
    Arg::new("agent")
        .long("agent")
        .value_name("ID")
        .help("Agent identity (defaults to $BATON_AGENT_ID)")
}

fn cmd_build() -> Command {
    Command::new("build")
        .about("Inspect and drive the build-repair election")
        .subcommand_required(true)
        .subcommand(Command::new("status").about("Show the shared build state"))
        .subcommand(Command::new("broken").about("Record that the build is failing"))
        .subcommand(
            Command::new("fix")
                .about("Ask to repair a broken build; exits 3 if another agent holds the lease")
                .arg(agent_arg()),
        )
        .subcommand(Command::new("fixed").about("Record that the build passes again"))
        .subcommand(
            Command::new("cleanup")
                .about("Release the lease of a fixer that went quiet")
                .arg(
                    Arg::new("stale-ms")
                        .long("stale-ms")
                        .value_name("MS")
                        .value_parser(clap::value_parser!(u64))
                        .help("Lease timeout in milliseconds (defaults to build.stale_ms)"),
                ),
        )
}

fn cmd_queue() -> Command {
    Command::new("queue")
        .about("Serialize version-control operations")
        .subcommand_required(true)
        .subcommand(
            Command::new("push")
                .about("Enqueue an operation")
                .arg(Arg::new("operation").required(true).value_name("OPERATION"))
                .arg(
                    Arg::new("payload")
                        .long("payload")
                        .value_name("JSON")
                        .help("Operation arguments as a JSON document (defaults to {})"),
                ),
        )
        .subcommand(Command::new("next").about("Claim the oldest pending operation"))
        .subcommand(
            Command::new("done")
                .about("Mark a claimed operation as succeeded")
                .arg(id_arg()),
        )
        .subcommand(
            Command::new("fail")
                .about("Mark a claimed operation as failed")
                .arg(id_arg())
                .arg(Arg::new("message").required(true).value_name("MESSAGE")),
        )
        .subcommand(Command::new("pending").about("List operations waiting to run"))
        .subcommand(
            Command::new("history")
                .about("List recent operations, newest first")
                .arg(
                    Arg::new("limit")
                        .long("limit")
                        .value_name("N")
                        .default_value("20")
                        .value_parser(clap::value_parser!(u32)),
                ),
        )
        .subcommand(Command::new("stats").about("Count operations by status"))
}

fn id_arg() -> Arg {
    Arg::new("id")
        .required(true)
        .value_name("ID")
        .value_parser(clap::value_parser!(i64))
}
