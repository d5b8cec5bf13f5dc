//! CLI command definitions.
//!
//! Every subcommand builds the same stack from the same configuration and
//! differs only in what it does with the result.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use goalert_stack::{DatabaseCredentials, GeneratedValues, Stack, StackBuilder, StackConfig};

pub mod graph;
pub mod synth;
pub mod validate;

/// goalert-infra - GoAlert on AWS Fargate
#[derive(Parser)]
#[command(name = "goalert-infra")]
#[command(version, about = "Synthesize and validate the GoAlert AWS stack")]
#[command(long_about = r#"
Builds the GoAlert stack (network, database, user provisioning, Fargate
service, DNS) and emits it as a CloudFormation template.

COMMANDS:
  synth     → Write the template and manifest to a cloud assembly directory
  validate  → Run structural checks over the stack
  graph     → Print resources in deployment order

The database password is read from the environment variable named by
database.password_env (default GOALERT_DB_PASSWORD).

EXIT CODES:
  0 - Success
  1 - General error
  2 - Invalid arguments or configuration
  3 - Validation failure
  5 - Stack construction error
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Stack configuration file
    #[arg(short, long, global = true, env = "GOALERT_CONFIG", default_value = "goalert.toml")]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Synthesize the stack into a cloud assembly
    Synth(synth::SynthArgs),

    /// Validate the synthesized stack
    Validate(validate::ValidateArgs),

    /// Print resources in deployment order
    Graph(graph::GraphArgs),
}

/// Load configuration, resolve the password and build the stack.
pub fn build_stack(config_path: &Path) -> Result<Stack> {
    let config = StackConfig::load(config_path)
        .with_context(|| format!("Failed to load config: {}", config_path.display()))?;
    let credentials = DatabaseCredentials::from_env(&config.database)
        .context("Failed to resolve database credentials")?;

    let generated = GeneratedValues::generate(&config);

    info!("Building stack {} for {}", config.stack_name, config.fqdn());
    StackBuilder::new(config, credentials, generated)
        .build()
        .context("Failed to build stack")
}
