use std::process::ExitCode;

use baton::cli::{
    build_cli,
    handlers::{format_error, run_cli},
    setup::init_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let matches = build_cli().get_matches();
    let json = matches.get_flag("json");

    if let Err(e) = init_tracing() {
        eprintln!("Warning: {e}");
    }

    match run_cli(&matches).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{}", format_error(&err, json));
            ExitCode::FAILURE
        }
    }
}
