//! Validate command - Run structural checks over the stack.

use std::path::Path;

use anyhow::Result;
use clap::Args;
use thiserror::Error;

use goalert_stack::{StackValidator, ValidationReport};

use super::build_stack;

#[derive(Args)]
pub struct ValidateArgs {
    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

/// Raised when at least one check fails.
#[derive(Debug, Error)]
#[error("Stack validation failed: {failed} check(s) did not pass")]
pub struct ValidationFailed {
    pub failed: usize,
}

pub fn execute(config: &Path, args: ValidateArgs) -> Result<()> {
    let stack = build_stack(config)?;
    let report = StackValidator::validate(&stack);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report_json(&report))?);
    } else {
        println!("📋 Validating {}...", stack.name);
        for check in &report.checks {
            let mark = if check.passed { "✅" } else { "❌" };
            println!("   {} {}: {}", mark, check.name, check.message);
        }
        println!();
    }

    if report.passed {
        if !args.json {
            println!("✅ All checks passed!");
        }
        Ok(())
    } else {
        let failed = report.checks.iter().filter(|c| !c.passed).count();
        Err(ValidationFailed { failed }.into())
    }
}

fn report_json(report: &ValidationReport) -> serde_json::Value {
    serde_json::json!({
        "passed": report.passed,
        "checks": report
            .checks
            .iter()
            .map(|c| serde_json::json!({
                "name": c.name,
                "passed": c.passed,
                "message": c.message,
            }))
            .collect::<Vec<_>>(),
    })
}
