//! Integration tests for the GoAlert stack.

use std::fs;

use goalert_stack::dns::{MAILGUN_MX_HOSTS, MAILGUN_MX_PRIORITY};
use goalert_stack::{
    AssemblyManifest, CloudAssembly, DatabaseCredentials, GeneratedValues, RecordType, Stack,
    StackBuilder, StackConfig, StackError, StackValidator, TemplateFormat,
};
use serde_json::Value;
use tempfile::tempdir;
use uuid::Uuid;

const CONFIG: &str = r#"
stack_name = "GoAlert-CDK"
account_id = "700164244043"
region = "us-east-1"
subdomain = "goalert"
domain = "silboapp.com"

[tags]
project = "goalert"
group = "operations"
environment = "production"

[instance]
ami = "ami-0a57edc25c5a0837f"
instance_type = "t2.nano"

[mail]
dkim_selector = "krs"
dkim_value = "k=rsa; p=MIGfMA0GCSqGSIb3DQEBAQUAA4GNADCBiQKBgQDpb+xyVNTeCQeQMDK9HFC9SyEOhFzBEBTDhCCBBfyhhQYsyeZtAe9nkfAPdH6rvUrxunFmiCVnEeHrp053P/xWVRqXoXqnYAXC3SgP0X7nH9Gc6v7kDfEhte0anqsPUf8eXSpmh6ceYbm34W0aqi8169TTQFSFSPQnPQymfSjwfQIDAQAB"

[database]
password_env = "GOALERT_TEST_DB_PASSWORD"
"#;

fn config() -> StackConfig {
    StackConfig::from_toml_str(CONFIG).unwrap()
}

fn credentials(config: &StackConfig) -> DatabaseCredentials {
    DatabaseCredentials::resolve(&config.database, |key| {
        (key == "GOALERT_TEST_DB_PASSWORD").then(|| "hunter2".to_string())
    })
    .unwrap()
}

fn generated(seed: u128) -> GeneratedValues {
    GeneratedValues::new(format!("data-key-{seed:04}"), Uuid::from_u128(seed))
}

fn build(generated: GeneratedValues) -> Stack {
    let config = config();
    let credentials = credentials(&config);
    StackBuilder::new(config, credentials, generated).build().unwrap()
}

#[test]
fn test_same_inputs_same_template() {
    let first = build(generated(1)).template.to_json_pretty().unwrap();
    let second = build(generated(1)).template.to_json_pretty().unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_redeploy_keeps_function_logical_id() {
    let first = build(GeneratedValues::generate(&config()));
    let second = build(GeneratedValues::generate(&config()));

    assert_eq!(first.automation.logical_id, second.automation.logical_id);
    assert!(second.template.resource(&first.automation.logical_id).is_some());
    assert_ne!(
        first.automation.environment["GOALERT_ENCRYPTION_KEY"],
        second.automation.environment["GOALERT_ENCRYPTION_KEY"]
    );
}

#[test]
fn test_generated_values_are_the_only_difference() {
    let (a, b) = (generated(1), generated(2));
    let first = build(a.clone()).template.to_json_pretty().unwrap();
    let second = build(b.clone()).template.to_json_pretty().unwrap();
    assert_ne!(first, second);

    let rewritten = first
        .replace(&a.encryption_key, &b.encryption_key)
        .replace(
            &a.function_uuid.simple().to_string(),
            &b.function_uuid.simple().to_string(),
        );
    let rewritten: Value = serde_json::from_str(&rewritten).unwrap();
    let second: Value = serde_json::from_str(&second).unwrap();
    assert_eq!(rewritten, second);
}

#[test]
fn test_dns_records() {
    let stack = build(generated(1));

    assert_eq!(stack.dns.of_type(RecordType::A).count(), 1);
    assert_eq!(stack.dns.of_type(RecordType::Cname).count(), 1);
    assert_eq!(stack.dns.of_type(RecordType::Txt).count(), 2);

    let mx: Vec<&String> = stack.dns.of_type(RecordType::Mx).flat_map(|r| &r.values).collect();
    assert_eq!(mx.len(), 2);
    for host in MAILGUN_MX_HOSTS {
        assert!(mx.contains(&&format!("{MAILGUN_MX_PRIORITY} {host}")));
    }

    let names: Vec<&str> = stack.dns.records.iter().map(|r| r.name.as_str()).collect();
    assert!(names.contains(&"goalert.silboapp.com."));
    assert!(names.contains(&"email.goalert.silboapp.com."));
    assert!(names.contains(&"krs._domainkey.goalert.silboapp.com."));
}

#[test]
fn test_database_url_uses_cluster_endpoint() {
    let stack = build(generated(1));
    let url = serde_json::to_string(&stack.database.connection_url()).unwrap();

    assert!(url.contains("postgres://postgres:hunter2@"));
    assert!(url.contains("GoAlertDatabaseCluster"));
    assert!(url.contains("Endpoint.Address"));
    assert!(url.contains("/goalert"));
}

#[test]
fn test_compute_before_database_rejected() {
    let config = config();
    let credentials = credentials(&config);
    let mut builder = StackBuilder::new(config, credentials, generated(1));
    builder.add_network().unwrap();

    let err = builder.add_compute().unwrap_err();
    assert!(matches!(err, StackError::MissingDependency { requires: "database", .. }));
}

#[test]
fn test_built_stack_validates() {
    let report = StackValidator::validate(&build(generated(1)));
    assert!(report.passed, "{:?}", report.checks);
}

#[test]
fn test_missing_password_rejected() {
    let config = config();
    assert!(DatabaseCredentials::resolve(&config.database, |_| None).is_err());
}

#[test]
fn test_assembly_written() {
    let dir = tempdir().unwrap();
    let stack = build(generated(1));

    let assembly = CloudAssembly::write(dir.path(), &stack, TemplateFormat::Json).unwrap();
    assert!(dir.path().join("GoAlert-CDK.template.json").exists());

    let manifest: AssemblyManifest =
        serde_json::from_str(&fs::read_to_string(&assembly.manifest_path).unwrap()).unwrap();
    assert_eq!(manifest.stack_name, "GoAlert-CDK");
    assert!(manifest.exports.contains(&"GoAlert-A-RecordSet".to_string()));
    assert!(manifest
        .exports
        .contains(&"GoAlert-Lambda-User-Create-Fnc-Name".to_string()));
}
