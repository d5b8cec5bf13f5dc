//! Graph command - Print resources in deployment order.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use goalert_stack::DependencyGraph;

use super::build_stack;

#[derive(Args)]
pub struct GraphArgs {
    /// Also list each resource's direct dependencies
    #[arg(long)]
    dependencies: bool,
}

pub fn execute(config: &Path, args: GraphArgs) -> Result<()> {
    let stack = build_stack(config)?;
    let graph = DependencyGraph::from_template(&stack.template);
    let order = graph
        .topological_order()
        .context("Failed to order stack resources")?;

    for (i, id) in order.iter().enumerate() {
        let resource_type = stack
            .template
            .resource(id)
            .map(|r| r.resource_type.as_str())
            .unwrap_or_default();
        println!("{:>3}. {} ({})", i + 1, id, resource_type);

        if args.dependencies {
            if let Some(deps) = graph.dependencies(id).filter(|d| !d.is_empty()) {
                let deps: Vec<&str> = deps.iter().map(String::as_str).collect();
                println!("       ← {}", deps.join(", "));
            }
        }
    }

    Ok(())
}
