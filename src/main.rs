//! `digenv`: page through the environment, optionally filtered.
//!
//! Usage:
//!   digenv                 # printenv | sort | $PAGER
//!   digenv PATTERN [ARGS]  # printenv | grep PATTERN [ARGS] | sort | $PAGER
//!   digenv -i path         # flags, `--help` and `--` included, go to grep too

use std::io::IsTerminal;
use std::process::ExitCode;

use anyhow::{Context, Result};
use argh::{EarlyExit, FromArgs};
use digenv::Pipeline;
use digenv::env::Environment;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(FromArgs)]
/// Show environment variables through a pager, optionally filtered by grep.
struct Args {
    #[argh(positional, greedy)]
    /// pattern and flags handed verbatim to grep; without any, nothing is filtered.
    filter: Vec<String>,
}

fn main() -> ExitCode {
    // Diagnostics go to stderr; stdout belongs to the pipeline.
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(std::io::stderr().is_terminal()),
        )
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let argv: Vec<String> = std::env::args().collect();
    let args = match parse_args(&argv) {
        Ok(args) => args,
        Err(EarlyExit { output, .. }) => {
            eprintln!("{output}");
            return ExitCode::FAILURE;
        }
    };
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Parse the command line without interpreting any of it as a `digenv` option.
///
/// Every argument after the program name belongs to the filter, so the list is
/// handed to `argh` behind a `--` of our own.
fn parse_args(argv: &[String]) -> Result<Args, EarlyExit> {
    let (command, rest) = match argv.split_first() {
        Some((command, rest)) => (command.as_str(), rest),
        None => ("digenv", argv),
    };
    let forwarded: Vec<&str> = std::iter::once("--")
        .chain(rest.iter().map(String::as_str))
        .collect();
    Args::from_args(&[command], &forwarded)
}

fn run(args: Args) -> Result<()> {
    let pipeline = Pipeline::new(&args.filter, Environment::new());
    let stages = pipeline.topology().len();
    pipeline
        .run()
        .with_context(|| format!("{stages}-stage pipeline failed"))?;
    info!("all {stages} stages exited cleanly");
    Ok(())
}
