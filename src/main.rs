//! `gwmon` binary entry point.

use std::process::ExitCode;

use clap::Parser;
use gateway_monitor::cli_app::{Cli, run};
use gateway_monitor::logger::init_logging;

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = init_logging(cli.verbose, cli.log_json) {
        eprintln!("gwmon: {err}");
        return ExitCode::from(2);
    }
    match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(code = err.code(), retryable = err.is_retryable(), "{err}");
            eprintln!("gwmon: {err}");
            ExitCode::FAILURE
        }
    }
}
