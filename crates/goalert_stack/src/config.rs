//! Stack parameters.
//!
//! Everything the stack needs is injected through [`StackConfig`], loaded once
//! from a TOML file. The database password never lives in the file: it is
//! resolved from the environment into [`DatabaseCredentials`]. The GoAlert
//! data encryption key and the singleton function id live in
//! [`GeneratedValues`].

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use ipnetwork::Ipv4Network;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{ConfigError, ConfigResult};

/// Default environment variable holding the database master password.
pub const DEFAULT_PASSWORD_ENV: &str = "GOALERT_DB_PASSWORD";

/// Default VPC range.
pub const DEFAULT_CIDR: &str = "10.0.0.0/16";

/// Characters that would break the `postgres://` URL or the VM's shell.
pub const PASSWORD_FORBIDDEN: [char; 7] = ['/', '@', '"', ' ', '#', '?', '%'];

static STACK_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9-]{0,127}$").expect("stack name pattern"));
static ACCOUNT_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{12}$").expect("account id pattern"));
static REGION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z]{2}(-gov)?-[a-z]+-\d$").expect("region pattern"));
static AMI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ami-([0-9a-f]{8}|[0-9a-f]{17})$").expect("ami pattern"));
static INSTANCE_TYPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9-]*\.[a-z0-9]+$").expect("instance type pattern"));
static DNS_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)[a-z0-9_]([a-z0-9-]{0,61}[a-z0-9])?$").expect("dns label pattern")
});

/// Immutable parameter bundle for one stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StackConfig {
    #[serde(default = "default_stack_name")]
    pub stack_name: String,
    pub account_id: String,
    pub region: String,
    pub subdomain: String,
    pub domain: String,
    /// Route 53 zone id; when absent the zone is looked up by `domain`.
    #[serde(default)]
    pub hosted_zone_id: Option<String>,
    #[serde(default = "default_tags")]
    pub tags: BTreeMap<String, String>,
    pub instance: InstanceConfig,
    pub mail: MailConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub application: ApplicationConfig,
    #[serde(default)]
    pub provisioning: ProvisioningConfig,
}

/// VM used by the user-provisioning function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceConfig {
    pub ami: String,
    #[serde(default = "default_instance_type")]
    pub instance_type: String,
}

/// Mail provider (Mailgun) settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MailConfig {
    #[serde(default = "default_dkim_selector")]
    pub dkim_selector: String,
    /// DKIM public key record, e.g. `k=rsa; p=MIGf...`.
    pub dkim_value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub username: String,
    pub name: String,
    pub port: u16,
    pub password_env: String,
    pub min_capacity: u32,
    pub max_capacity: u32,
    pub seconds_until_auto_pause: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            username: "postgres".to_string(),
            name: "goalert".to_string(),
            port: 5432,
            password_env: DEFAULT_PASSWORD_ENV.to_string(),
            min_capacity: 2,
            max_capacity: 2,
            seconds_until_auto_pause: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    pub cidr: Ipv4Network,
    pub max_azs: u8,
    pub nat_gateways: u8,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            cidr: DEFAULT_CIDR.parse().expect("default CIDR"),
            max_azs: 2,
            nat_gateways: 1,
        }
    }
}

/// The GoAlert container as run on Fargate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApplicationConfig {
    pub image: String,
    pub container_port: u16,
    pub desired_count: u32,
    pub cpu: u32,
    pub memory_mib: u32,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            image: "goalert/goalert".to_string(),
            container_port: 80,
            desired_count: 1,
            cpu: 256,
            memory_mib: 512,
        }
    }
}

/// Retry budget for the admin-user command on the provisioning VM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProvisioningConfig {
    pub retry_budget_secs: u64,
    pub retry_interval_secs: u64,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            retry_budget_secs: 120,
            retry_interval_secs: 5,
        }
    }
}

fn default_stack_name() -> String {
    "GoAlert-CDK".to_string()
}

fn default_instance_type() -> String {
    "t2.nano".to_string()
}

fn default_dkim_selector() -> String {
    "krs".to_string()
}

fn default_tags() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("project".to_string(), "goalert".to_string()),
        ("group".to_string(), "operations".to_string()),
        ("environment".to_string(), "production".to_string()),
    ])
}

impl StackConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        debug!("Loading stack config from {:?}", path);
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate config from TOML text.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: StackConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Fully qualified name the application is served under.
    pub fn fqdn(&self) -> String {
        format!("{}.{}", self.subdomain, self.domain)
    }

    /// DKIM record value with any surrounding quotes removed.
    pub fn dkim_value(&self) -> &str {
        self.mail.dkim_value.trim().trim_matches('"')
    }

    /// Check every field the stack relies on.
    pub fn validate(&self) -> ConfigResult<()> {
        if !STACK_NAME.is_match(&self.stack_name) {
            return Err(ConfigError::invalid(
                "stack_name",
                format!("'{}' is not a valid stack name", self.stack_name),
            ));
        }
        if !ACCOUNT_ID.is_match(&self.account_id) {
            return Err(ConfigError::invalid("account_id", "expected 12 digits"));
        }
        if !REGION.is_match(&self.region) {
            return Err(ConfigError::invalid(
                "region",
                format!("'{}' is not an AWS region", self.region),
            ));
        }
        if !is_dns_name(&self.subdomain) {
            return Err(ConfigError::invalid(
                "subdomain",
                format!("'{}' is not a valid DNS name", self.subdomain),
            ));
        }
        if !is_dns_name(&self.domain) || !self.domain.contains('.') {
            return Err(ConfigError::invalid(
                "domain",
                format!("'{}' is not a valid domain", self.domain),
            ));
        }
        if !AMI.is_match(&self.instance.ami) {
            return Err(ConfigError::invalid(
                "instance.ami",
                format!("'{}' is not an AMI id", self.instance.ami),
            ));
        }
        if !INSTANCE_TYPE.is_match(&self.instance.instance_type) {
            return Err(ConfigError::invalid(
                "instance.instance_type",
                format!("'{}' is not an instance type", self.instance.instance_type),
            ));
        }
        if !is_dns_name(&self.mail.dkim_selector) {
            return Err(ConfigError::invalid("mail.dkim_selector", "not a DNS label"));
        }
        if self.dkim_value().is_empty() {
            return Err(ConfigError::invalid("mail.dkim_value", "must not be empty"));
        }
        if self.database.username.is_empty() || self.database.name.is_empty() {
            return Err(ConfigError::invalid(
                "database",
                "username and name must not be empty",
            ));
        }
        if self.database.min_capacity > self.database.max_capacity {
            return Err(ConfigError::invalid(
                "database.min_capacity",
                "must not exceed max_capacity",
            ));
        }
        let cidr = self.network.cidr;
        if !(16..=28).contains(&cidr.prefix()) {
            return Err(ConfigError::invalid(
                "network.cidr",
                format!("prefix /{} is outside /16../28", cidr.prefix()),
            ));
        }
        if cidr.ip() != cidr.network() {
            return Err(ConfigError::invalid(
                "network.cidr",
                format!("'{}' has host bits set; use {}/{}", cidr, cidr.network(), cidr.prefix()),
            ));
        }
        if self.network.max_azs == 0 {
            return Err(ConfigError::invalid("network.max_azs", "must be at least 1"));
        }
        if self.network.nat_gateways == 0 || self.network.nat_gateways > self.network.max_azs {
            return Err(ConfigError::invalid(
                "network.nat_gateways",
                "must be between 1 and max_azs",
            ));
        }
        if self.application.image.is_empty() {
            return Err(ConfigError::invalid("application.image", "must not be empty"));
        }
        if self.provisioning.retry_interval_secs == 0
            || self.provisioning.retry_interval_secs > self.provisioning.retry_budget_secs
        {
            return Err(ConfigError::invalid(
                "provisioning.retry_interval_secs",
                "must be positive and within retry_budget_secs",
            ));
        }
        Ok(())
    }
}

fn is_dns_name(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 253
        && value
            .split('.')
            .all(|label| DNS_LABEL.is_match(label))
}

/// Master credentials for the database cluster.
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for DatabaseCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl DatabaseCredentials {
    /// Resolve the password from the process environment.
    pub fn from_env(config: &DatabaseConfig) -> ConfigResult<Self> {
        Self::resolve(config, |key| std::env::var(key).ok())
    }

    /// Resolve the password through an arbitrary lookup.
    pub fn resolve(
        config: &DatabaseConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> ConfigResult<Self> {
        let password = lookup(&config.password_env)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ConfigError::MissingSecret(config.password_env.clone()))?;
        if let Some(c) = password.chars().find(|c| PASSWORD_FORBIDDEN.contains(c)) {
            return Err(ConfigError::invalid(
                "database.password",
                format!("must not contain {c:?}"),
            ));
        }
        Ok(Self {
            username: config.username.clone(),
            password,
        })
    }
}

/// Values generated once per synthesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedValues {
    /// GoAlert `--data-encryption-key`.
    pub encryption_key: String,
    /// Identity of the singleton provisioning function.
    pub function_uuid: Uuid,
}

impl GeneratedValues {
    /// Fresh encryption key; the function uuid is derived from the stack's
    /// identity so redeploys keep the same singleton function.
    pub fn generate(config: &StackConfig) -> Self {
        Self {
            encryption_key: Uuid::new_v4().to_string(),
            function_uuid: Self::function_uuid(config),
        }
    }

    /// Name-based uuid over account, region and stack name.
    pub fn function_uuid(config: &StackConfig) -> Uuid {
        let name = format!(
            "goalert-user-create/{}/{}/{}",
            config.account_id, config.region, config.stack_name
        );
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
    }

    pub fn new(encryption_key: impl Into<String>, function_uuid: Uuid) -> Self {
        Self {
            encryption_key: encryption_key.into(),
            function_uuid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SAMPLE;

    #[test]
    fn test_defaults_applied() {
        let config = StackConfig::from_toml_str(SAMPLE).unwrap();

        assert_eq!(config.stack_name, "GoAlert-CDK");
        assert_eq!(config.instance.instance_type, "t2.nano");
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.database.seconds_until_auto_pause, 300);
        assert_eq!(config.network.cidr.to_string(), "10.0.0.0/16");
        assert_eq!(config.application.image, "goalert/goalert");
        assert_eq!(config.tags.get("project").map(String::as_str), Some("goalert"));
        assert_eq!(config.fqdn(), "goalert.silboapp.com");
    }

    #[test]
    fn test_dkim_value_unquoted() {
        let config = StackConfig::from_toml_str(SAMPLE).unwrap();
        assert!(config.dkim_value().starts_with("k=rsa;"));
        assert!(!config.dkim_value().ends_with('"'));
    }

    #[test]
    fn test_rejects_bad_account() {
        let content = SAMPLE.replace("700164244043", "7001");
        let err = StackConfig::from_toml_str(&content).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "account_id", .. }));
    }

    #[test]
    fn test_rejects_bad_domain() {
        let content = SAMPLE.replace("silboapp.com", "silbo_app..com");
        assert!(StackConfig::from_toml_str(&content).is_err());
    }

    #[test]
    fn test_rejects_too_many_nat_gateways() {
        let content = format!("{SAMPLE}\n[network]\nnat_gateways = 3\n");
        let err = StackConfig::from_toml_str(&content).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "network.nat_gateways", .. }));
    }

    #[test]
    fn test_rejects_unknown_field() {
        let content = format!("password = \"hunter2\"\n{SAMPLE}");
        assert!(matches!(
            StackConfig::from_toml_str(&content),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_password_from_lookup() {
        let config = DatabaseConfig::default();
        let creds = DatabaseCredentials::resolve(&config, |key| {
            (key == DEFAULT_PASSWORD_ENV).then(|| "s3cret".to_string())
        })
        .unwrap();

        assert_eq!(creds.username, "postgres");
        assert_eq!(creds.password, "s3cret");
        assert!(!format!("{:?}", creds).contains("s3cret"));
    }

    #[test]
    fn test_missing_password_is_error() {
        let config = DatabaseConfig::default();
        let err = DatabaseCredentials::resolve(&config, |_| Some(String::new())).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSecret(name) if name == DEFAULT_PASSWORD_ENV));
    }

    #[test]
    fn test_rejects_cidr_outside_prefix_range() {
        for cidr in ["10.0.0.0/8", "10.0.0.0/29"] {
            let content = format!("{SAMPLE}\n[network]\ncidr = \"{cidr}\"\n");
            let err = StackConfig::from_toml_str(&content).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { field: "network.cidr", .. }), "{cidr}");
        }
        let content = format!("{SAMPLE}\n[network]\ncidr = \"10.1.0.0/28\"\n");
        assert!(StackConfig::from_toml_str(&content).is_ok());
    }

    #[test]
    fn test_rejects_cidr_with_host_bits() {
        let content = format!("{SAMPLE}\n[network]\ncidr = \"10.0.5.0/16\"\n");
        let err = StackConfig::from_toml_str(&content).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "network.cidr", .. }));
        assert!(err.to_string().contains("10.0.0.0/16"));
    }

    #[test]
    fn test_default_cidr() {
        assert_eq!(NetworkConfig::default().cidr.to_string(), DEFAULT_CIDR);
    }

    #[test]
    fn test_rejects_password_breaking_connection_url() {
        let config = DatabaseConfig::default();
        for password in ["a/b", "user@host", "say\"hi", "two words", "a#b", "a?b", "100%"] {
            let err = DatabaseCredentials::resolve(&config, |_| Some(password.to_string()))
                .unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { field: "database.password", .. }),
                "{password}"
            );
            assert!(!err.to_string().contains(password));
        }
        assert!(DatabaseCredentials::resolve(&config, |_| Some("s3cret!-_.~".to_string())).is_ok());
    }

    #[test]
    fn test_example_config_parses() {
        let mut example =
            StackConfig::from_toml_str(include_str!("../../../goalert.example.toml")).unwrap();
        let sample = StackConfig::from_toml_str(SAMPLE).unwrap();

        assert_eq!(example.dkim_value(), sample.dkim_value());
        assert!(example.dkim_value().ends_with("IDAQAB"));
        example.mail.dkim_value = sample.mail.dkim_value.clone();
        assert_eq!(example, sample);
    }

    #[test]
    fn test_load_from_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("goalert.toml");
        assert!(matches!(StackConfig::load(&path), Err(ConfigError::NotFound(_))));

        fs::write(&path, SAMPLE).unwrap();
        assert_eq!(StackConfig::load(&path).unwrap().region, "us-east-1");
    }

    #[test]
    fn test_generated_values_differ() {
        let config = StackConfig::from_toml_str(SAMPLE).unwrap();
        let a = GeneratedValues::generate(&config);
        let b = GeneratedValues::generate(&config);
        assert_ne!(a.encryption_key, b.encryption_key);
        assert_eq!(a.function_uuid, b.function_uuid);
    }

    #[test]
    fn test_function_uuid_follows_stack_identity() {
        let config = StackConfig::from_toml_str(SAMPLE).unwrap();
        let other = StackConfig::from_toml_str(&SAMPLE.replace("us-east-1", "eu-west-1")).unwrap();
        assert_ne!(
            GeneratedValues::function_uuid(&config),
            GeneratedValues::function_uuid(&other)
        );
    }
}
