//! Structural checks over a built stack.

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::{info, warn};

use crate::automation::ENVIRONMENT_KEYS;
use crate::builder::Stack;
use crate::dns::{MAILGUN_MX_HOSTS, MAILGUN_MX_PRIORITY, RecordType, TTL_SECS};
use crate::graph::DependencyGraph;
use crate::script::INLINE_CODE_LIMIT;
use crate::template::Resource;

/// Runs every check against a stack and collects the results.
pub struct StackValidator;

impl StackValidator {
    pub fn validate(stack: &Stack) -> ValidationReport {
        info!("Validating stack {}", stack.name);
        let mut report = ValidationReport::new();

        check_references(stack, &mut report);
        check_acyclic(stack, &mut report);
        check_database_ingress(stack, &mut report);
        check_automation_environment(stack, &mut report);
        check_database_url(stack, &mut report);
        check_iam_actions(stack, &mut report);
        check_inline_code(stack, &mut report);
        check_dns_records(stack, &mut report);
        check_exports(stack, &mut report);

        for check in report.checks.iter().filter(|c| !c.passed) {
            warn!("Check {} failed: {}", check.name, check.message);
        }
        report
    }
}

fn check_references(stack: &Stack, report: &mut ValidationReport) {
    let graph = DependencyGraph::from_template(&stack.template);
    let dangling = graph.dangling();
    if dangling.is_empty() {
        report.add_check("references", true, "All references resolve");
    } else {
        let list: Vec<String> = dangling.iter().map(|(from, to)| format!("{from} -> {to}")).collect();
        report.add_check("references", false, &format!("Unresolved: {}", list.join(", ")));
    }
}

fn check_acyclic(stack: &Stack, report: &mut ValidationReport) {
    match stack.deployment_order() {
        Ok(order) => report.add_check(
            "acyclic",
            true,
            &format!("{} resources in dependency order", order.len()),
        ),
        Err(e) => report.add_check("acyclic", false, &e.to_string()),
    }
}

fn check_database_ingress(stack: &Stack, report: &mut ValidationReport) {
    let port = i64::from(stack.database.port);
    let rules = stack
        .template
        .resource(&stack.database.security_group)
        .and_then(|sg| sg.get("SecurityGroupIngress"))
        .and_then(Value::as_array);

    let covers = |key: &str, cidr: &str| {
        rules.is_some_and(|rules| {
            rules.iter().any(|r| {
                r.get(key).and_then(Value::as_str) == Some(cidr)
                    && r.get("FromPort").and_then(Value::as_i64).is_some_and(|p| p <= port)
                    && r.get("ToPort").and_then(Value::as_i64).is_some_and(|p| p >= port)
            })
        })
    };

    let ipv4 = covers("CidrIp", "0.0.0.0/0");
    let ipv6 = covers("CidrIpv6", "::/0");
    report.add_check(
        "database-ingress",
        ipv4 && ipv6,
        &format!("port {port}: ipv4={ipv4} ipv6={ipv6}"),
    );
}

fn check_automation_environment(stack: &Stack, report: &mut ValidationReport) {
    let declared = stack
        .template
        .resource(&stack.automation.logical_id)
        .and_then(|f| f.get("Environment"))
        .and_then(|e| e.get("Variables"))
        .and_then(Value::as_object);

    let Some(variables) = declared else {
        report.add_check("automation-environment", false, "Function has no environment");
        return;
    };

    let keys: BTreeSet<&str> = variables.keys().map(String::as_str).collect();
    let expected: BTreeSet<&str> = ENVIRONMENT_KEYS.into_iter().collect();
    let empty: Vec<&str> = variables
        .iter()
        .filter(|(_, v)| v.is_null() || v.as_str() == Some(""))
        .map(|(k, _)| k.as_str())
        .collect();

    if keys != expected {
        let missing: Vec<_> = expected.difference(&keys).collect();
        let extra: Vec<_> = keys.difference(&expected).collect();
        report.add_check(
            "automation-environment",
            false,
            &format!("missing {:?}, unexpected {:?}", missing, extra),
        );
    } else if !empty.is_empty() {
        report.add_check(
            "automation-environment",
            false,
            &format!("empty values: {}", empty.join(", ")),
        );
    } else {
        report.add_check("automation-environment", true, "All 10 variables set");
    }
}

fn check_database_url(stack: &Stack, report: &mut ValidationReport) {
    let expected = stack.database.connection_url();
    let declared = stack
        .template
        .resource(&stack.compute.task_definition)
        .and_then(|td| td.get("ContainerDefinitions"))
        .and_then(|defs| defs.get(0))
        .and_then(|c| c.get("Environment"))
        .and_then(Value::as_array)
        .and_then(|env| {
            env.iter()
                .find(|e| e.get("Name").and_then(Value::as_str) == Some("GOALERT_DB_URL"))
        })
        .and_then(|e| e.get("Value"));

    report.add_check(
        "database-url",
        declared == Some(&expected),
        "GOALERT_DB_URL is postgres://<user>:<password>@<endpoint>/<dbname>",
    );
}

fn check_iam_actions(stack: &Stack, report: &mut ValidationReport) {
    let mut wildcards = Vec::new();
    for (id, role) in stack.template.resources_of_type("AWS::IAM::Role") {
        let Some(policies) = role.get("Policies").and_then(Value::as_array) else {
            continue;
        };
        for statement in policies
            .iter()
            .filter_map(|p| p.pointer("/PolicyDocument/Statement"))
            .filter_map(Value::as_array)
            .flatten()
        {
            let actions: Vec<&str> = match statement.get("Action") {
                Some(Value::String(a)) => vec![a.as_str()],
                Some(Value::Array(list)) => list.iter().filter_map(Value::as_str).collect(),
                _ => Vec::new(),
            };
            for action in actions {
                if action == "*" || action.ends_with(":*") {
                    wildcards.push(format!("{id}: {action}"));
                }
            }
        }
    }

    if wildcards.is_empty() {
        report.add_check("iam-least-privilege", true, "No wildcard actions");
    } else {
        report.add_check(
            "iam-least-privilege",
            false,
            &format!("Wildcard actions: {}", wildcards.join(", ")),
        );
    }
}

fn check_inline_code(stack: &Stack, report: &mut ValidationReport) {
    let mut oversized = Vec::new();
    for (id, function) in stack.template.resources_of_type("AWS::Lambda::Function") {
        if let Some(code) = function.get("Code").and_then(|c| c.get("ZipFile")).and_then(Value::as_str) {
            if code.len() > INLINE_CODE_LIMIT {
                oversized.push(format!("{id} ({} bytes)", code.len()));
            }
        }
    }
    report.add_check(
        "inline-code-size",
        oversized.is_empty(),
        &if oversized.is_empty() {
            format!("Inline code within {INLINE_CODE_LIMIT} bytes")
        } else {
            format!("Oversized: {}", oversized.join(", "))
        },
    );
}

fn check_dns_records(stack: &Stack, report: &mut ValidationReport) {
    let records: Vec<(&String, &Resource)> =
        stack.template.resources_of_type("AWS::Route53::RecordSet").collect();
    let record_type = |r: &Resource| r.get("Type").and_then(Value::as_str).unwrap_or_default().to_string();
    let mut problems = Vec::new();

    for (t, expected) in [(RecordType::A, 1), (RecordType::Mx, 1), (RecordType::Cname, 1), (RecordType::Txt, 2)] {
        let found = records.iter().filter(|(_, r)| record_type(r) == t.as_str()).count();
        if found != expected {
            problems.push(format!("{found} {t} records"));
        }
    }

    let fqdn = records
        .iter()
        .find(|(_, r)| record_type(r) == RecordType::A.as_str())
        .and_then(|(_, r)| r.get("Name").and_then(Value::as_str))
        .unwrap_or_default();

    for (id, record) in &records {
        if record.get("HostedZoneName").is_some() == record.get("HostedZoneId").is_some() {
            problems.push(format!("{id} needs exactly one of HostedZoneName/HostedZoneId"));
        }
        let alias = record.get("AliasTarget").is_some();
        let ttl = record.get("TTL").and_then(Value::as_str);
        let values = record
            .get("ResourceRecords")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        if alias && (ttl.is_some() || values > 0) {
            problems.push(format!("{id} is an alias with TTL or values"));
        }
        if !alias && (ttl != Some(TTL_SECS.to_string().as_str()) || values == 0) {
            problems.push(format!("{id} has TTL {ttl:?} and {values} values"));
        }
        let name = record.get("Name").and_then(Value::as_str).unwrap_or_default();
        if fqdn.is_empty() || (name != fqdn && !name.ends_with(&format!(".{fqdn}"))) {
            problems.push(format!("{name} outside {fqdn:?}"));
        }
    }

    let expected_mx: Vec<Value> = MAILGUN_MX_HOSTS
        .iter()
        .map(|host| Value::from(format!("{MAILGUN_MX_PRIORITY} {host}")))
        .collect();
    for (id, record) in records.iter().filter(|(_, r)| record_type(r) == RecordType::Mx.as_str()) {
        let values = record.get("ResourceRecords").and_then(Value::as_array);
        if values != Some(&expected_mx) {
            problems.push(format!("{id} MX values {values:?}"));
        }
    }

    if problems.is_empty() {
        report.add_check(
            "dns-records",
            true,
            &format!("{} record sets under {}", records.len(), fqdn),
        );
    } else {
        report.add_check("dns-records", false, &problems.join("; "));
    }
}

fn check_exports(stack: &Stack, report: &mut ValidationReport) {
    let names = stack.template.export_names();
    let unique: BTreeSet<&str> = names.iter().copied().collect();
    report.add_check(
        "unique-exports",
        unique.len() == names.len(),
        &format!("{} exports", names.len()),
    );
}

/// Validation report for a stack.
#[derive(Debug)]
pub struct ValidationReport {
    pub checks: Vec<ValidationCheck>,
    pub passed: bool,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            checks: Vec::new(),
            passed: true,
        }
    }

    pub fn add_check(&mut self, name: &str, passed: bool, message: &str) {
        if !passed {
            self.passed = false;
        }
        self.checks.push(ValidationCheck {
            name: name.to_string(),
            passed,
            message: message.to_string(),
        });
    }

    pub fn check(&self, name: &str) -> Option<&ValidationCheck> {
        self.checks.iter().find(|c| c.name == name)
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct ValidationCheck {
    pub name: String,
    pub passed: bool,
    pub message: String,
}
