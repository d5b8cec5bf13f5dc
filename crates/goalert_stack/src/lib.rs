//! # goalert_stack
//!
//! CloudFormation stack definition for running GoAlert on AWS.
//!
//! The stack is assembled in five sections, each reading handles from the
//! ones before it: network, database, user-provisioning automation, the
//! Fargate service behind an HTTPS load balancer, and DNS records in an
//! existing hosted zone.
//!
//! ## Features
//!
//! - VPC with public and private subnets across availability zones
//! - Aurora PostgreSQL Serverless cluster
//! - Lambda function that bootstraps the GoAlert admin user on EC2
//! - ECS Fargate service with ACM certificate and ALB
//! - Route 53 alias and Mailgun mail records
//! - Structural validation and deterministic template output
//!
//! ## Example
//!
//! ```rust,no_run
//! use goalert_stack::{
//!     CloudAssembly, DatabaseCredentials, GeneratedValues, StackBuilder, StackConfig,
//!     TemplateFormat,
//! };
//! use std::path::Path;
//!
//! let config = StackConfig::load(Path::new("goalert.toml")).unwrap();
//! let credentials = DatabaseCredentials::from_env(&config.database).unwrap();
//! let generated = GeneratedValues::generate(&config);
//!
//! let stack = StackBuilder::new(config, credentials, generated)
//!     .build()
//!     .unwrap();
//!
//! CloudAssembly::write(Path::new("cdk.out"), &stack, TemplateFormat::Json).unwrap();
//! ```

pub mod assembly;
pub mod automation;
pub mod builder;
pub mod compute;
pub mod config;
pub mod database;
pub mod dns;
pub mod error;
pub mod graph;
pub mod network;
pub mod script;
pub mod template;
pub mod validator;

#[cfg(test)]
mod testing;

pub use assembly::{AssemblyManifest, CloudAssembly, TemplateFormat};
pub use automation::ProvisioningFunction;
pub use builder::{Stack, StackBuilder};
pub use compute::ComputeService;
pub use config::{DatabaseCredentials, GeneratedValues, StackConfig};
pub use database::DatabaseCluster;
pub use dns::{DnsRecords, HostedZone, RecordSet, RecordType};
pub use error::{ConfigError, ConfigResult, StackError, StackResult};
pub use graph::DependencyGraph;
pub use network::{Network, Subnet};
pub use script::{ProvisioningScript, RetryPolicy};
pub use template::{Output, Resource, Template};
pub use validator::{StackValidator, ValidationCheck, ValidationReport};
