//! Error types for stack construction.

use thiserror::Error;

/// Result type alias for stack operations.
pub type StackResult<T> = Result<T, StackError>;

/// Result type alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur while building or synthesizing the stack.
#[derive(Error, Debug)]
pub enum StackError {
    #[error("Section '{section}' requires the {requires} section to be built first")]
    MissingDependency {
        section: &'static str,
        requires: &'static str,
    },

    #[error("Section '{0}' has already been built")]
    AlreadyBuilt(&'static str),

    #[error("Duplicate logical id: {0}")]
    DuplicateLogicalId(String),

    #[error("Invalid network layout: {0}")]
    InvalidNetwork(String),

    #[error("Dependency cycle between resources: {0}")]
    DependencyCycle(String),

    #[error("Provisioning script too large: {size} bytes (limit {limit})")]
    ScriptTooLarge { size: usize, limit: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors that can occur while loading stack parameters.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid config value for '{field}': {message}")]
    Invalid { field: &'static str, message: String },

    #[error("Secret not set: environment variable {0} is missing or empty")]
    MissingSecret(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            message: message.into(),
        }
    }
}
