//! Synth command - Write the stack as a cloud assembly.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use goalert_stack::{CloudAssembly, TemplateFormat};

use super::build_stack;

#[derive(Args)]
pub struct SynthArgs {
    /// Output directory
    #[arg(short, long, default_value = "cdk.out")]
    out: PathBuf,

    /// Template format (json, yaml)
    #[arg(short, long, default_value = "json")]
    format: TemplateFormat,

    /// Print the template instead of writing files
    #[arg(long)]
    stdout: bool,
}

pub fn execute(config: &Path, args: SynthArgs) -> Result<()> {
    let stack = build_stack(config)?;

    if args.stdout {
        let rendered = args.format.render(&stack).context("Failed to render template")?;
        println!("{}", rendered);
        return Ok(());
    }

    let assembly = CloudAssembly::write(&args.out, &stack, args.format)
        .with_context(|| format!("Failed to write assembly to {}", args.out.display()))?;
    info!("Synthesized {} resources", stack.template.resources.len());

    println!("✅ Synthesized {}", stack.name);
    println!("   Template: {}", assembly.template_path.display());
    println!("   Manifest: {}", assembly.manifest_path.display());
    for export in &assembly.manifest.exports {
        println!("   Export:   {}", export);
    }

    Ok(())
}
