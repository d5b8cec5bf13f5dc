//! goalert-infra CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Invalid arguments or configuration
//! - 3: Validation failure
//! - 5: Stack construction error

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use goalert_stack::{ConfigError, StackError};

mod commands;

use commands::validate::ValidationFailed;
use commands::{Cli, Commands};

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
    pub const VALIDATION_FAILURE: u8 = 3;
    pub const STACK_ERROR: u8 = 5;
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        "goalert=debug"
    } else if cli.quiet {
        "goalert=warn"
    } else {
        "goalert=info"
    };
    let mut filter = EnvFilter::from_default_env();
    for directive in [level, "warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    // Logging may already be initialized; carry on either way.
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();

    let result = match cli.command {
        Commands::Synth(args) => commands::synth::execute(&cli.config, args),
        Commands::Validate(args) => commands::validate::execute(&cli.config, args),
        Commands::Graph(args) => commands::graph::execute(&cli.config, args),
    };

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            let exit_code = categorize_error(&e);
            eprintln!("❌ Error: {:#}", e);
            ExitCode::from(exit_code)
        }
    }
}

/// Categorize error to determine exit code
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if cause.downcast_ref::<ValidationFailed>().is_some() {
            return ExitCodes::VALIDATION_FAILURE;
        }
        if cause.downcast_ref::<ConfigError>().is_some() {
            return ExitCodes::INVALID_ARGS;
        }
        if cause.downcast_ref::<StackError>().is_some() {
            return ExitCodes::STACK_ERROR;
        }
    }
    ExitCodes::GENERAL_ERROR
}
