//! fwbankctl - dual-bank firmware update tooling
//!
//! Decodes raw version tokens, compares structured versions, and runs
//! simulated multi-round update campaigns against in-memory devices.

#![deny(unused_must_use)]
#![deny(clippy::unwrap_used)]

mod commands;
mod error;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::CliError;

#[derive(Parser)]
#[command(name = "fwbankctl")]
#[command(about = "Dual-bank firmware update tooling - decode, compare and simulate")]
#[command(version)]
#[command(long_about = "
fwbankctl works with firmware versions reported by dual-bank devices such as
power supplies, management controllers and expanders.

Raw version tokens can be decoded into their canonical form, canonical versions
can be compared, and whole update campaigns can be rehearsed against simulated
devices described in a YAML or JSON scenario file.

Use --json for machine-readable output suitable for scripting.
")]
struct Cli {
    /// Output format (human-readable or JSON)
    #[arg(
        long,
        global = true,
        help = "Output in JSON format for machine parsing"
    )]
    json: bool,

    /// Verbose logging
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode raw hex version tokens with the PSU layout
    Decode {
        /// Hex byte tokens, e.g. 30 31 30 32 03 0A 00 FF
        #[arg(required = true)]
        tokens: Vec<String>,
    },

    /// Compare two canonical versions
    Compare {
        /// Version being judged, e.g. 1.2.0x030A00FF
        a: String,
        /// Version it is compared against
        b: String,
    },

    /// Run update campaigns from a scenario file against simulated devices
    Simulate {
        /// Scenario file (.yaml, .yml or .json)
        scenario: PathBuf,
        /// Override the number of rounds in the scenario plan
        #[arg(short, long)]
        rounds: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("fwbankctl={log_level},fwbank_update={log_level}").into()
            }),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match execute_command(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if cli.json {
                output::print_error_json(&e);
            } else {
                output::print_error_human(&e);
            }
            ExitCode::from(exit_code(&e))
        }
    }
}

fn exit_code(error: &anyhow::Error) -> u8 {
    match error.downcast_ref::<CliError>() {
        Some(CliError::NotVerified { .. }) => 2,
        Some(CliError::InvalidVersion(_))
        | Some(CliError::InvalidScenario(_))
        | Some(CliError::JsonError(_))
        | Some(CliError::YamlError(_)) => 4,
        _ => 1,
    }
}

async fn execute_command(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Decode { tokens } => commands::decode::execute(tokens, cli.json),
        Commands::Compare { a, b } => commands::compare::execute(a, b, cli.json),
        Commands::Simulate { scenario, rounds } => {
            commands::simulate::execute(scenario, *rounds, cli.json).await
        }
    }
}
