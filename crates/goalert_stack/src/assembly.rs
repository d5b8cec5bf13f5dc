//! Cloud assembly output: the synthesized template plus a manifest that
//! names the target environment.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::builder::Stack;
use crate::error::StackResult;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const MANIFEST_VERSION: &str = "1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateFormat {
    #[default]
    Json,
    Yaml,
}

impl TemplateFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            TemplateFormat::Json => "json",
            TemplateFormat::Yaml => "yaml",
        }
    }

    /// Render the stack's template in this format.
    pub fn render(&self, stack: &Stack) -> StackResult<String> {
        match self {
            TemplateFormat::Json => stack.template.to_json_pretty(),
            TemplateFormat::Yaml => stack.template.to_yaml(),
        }
    }
}

impl fmt::Display for TemplateFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for TemplateFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(TemplateFormat::Json),
            "yaml" | "yml" => Ok(TemplateFormat::Yaml),
            other => Err(format!("unknown template format: {other}")),
        }
    }
}

/// Describes what was written and where it deploys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssemblyManifest {
    pub version: String,
    pub stack_name: String,
    pub environment: String,
    pub account: String,
    pub region: String,
    pub template_file: String,
    pub tags: BTreeMap<String, String>,
    pub exports: Vec<String>,
}

impl AssemblyManifest {
    pub fn for_stack(stack: &Stack, format: TemplateFormat) -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
            stack_name: stack.name.clone(),
            environment: stack.environment(),
            account: stack.account_id.clone(),
            region: stack.region.clone(),
            template_file: template_file_name(&stack.name, format),
            tags: stack.tags.clone(),
            exports: stack
                .template
                .export_names()
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

pub fn template_file_name(stack_name: &str, format: TemplateFormat) -> String {
    format!("{}.template.{}", stack_name, format.extension())
}

/// Files written by [`CloudAssembly::write`].
#[derive(Debug, Clone)]
pub struct CloudAssembly {
    pub directory: PathBuf,
    pub template_path: PathBuf,
    pub manifest_path: PathBuf,
    pub manifest: AssemblyManifest,
}

impl CloudAssembly {
    /// Write the template and manifest into `dir`, creating it if needed.
    pub fn write(dir: &Path, stack: &Stack, format: TemplateFormat) -> StackResult<Self> {
        fs::create_dir_all(dir)?;

        let manifest = AssemblyManifest::for_stack(stack, format);
        let template_path = dir.join(&manifest.template_file);
        fs::write(&template_path, format.render(stack)?)?;

        let manifest_path = dir.join(MANIFEST_FILE);
        fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)?;

        info!(
            "Wrote {} to {}",
            manifest.template_file,
            dir.display()
        );

        Ok(Self {
            directory: dir.to_path_buf(),
            template_path,
            manifest_path,
            manifest,
        })
    }
}
