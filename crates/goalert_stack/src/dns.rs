//! DNS section: the application's alias record and the Mailgun mail
//! records, all under the configured subdomain of an existing hosted zone.

use std::fmt;

use serde_json::{Value, json};

use crate::compute::ComputeService;
use crate::config::StackConfig;
use crate::error::StackResult;
use crate::template::intrinsic::reference;
use crate::template::{Output, Resource, Template};

pub const A_RECORD_ID: &str = "GoAlertARecord";
pub const MX_RECORD_ID: &str = "GoAlertMXRecordSet";
pub const SPF_RECORD_ID: &str = "GoAlertTXTRecordSet";
pub const TRACKING_CNAME_ID: &str = "GoAlertMailgunCNameRecordSet";
pub const DKIM_RECORD_ID: &str = "GoAlertMailgunKRSTXTRecordSet";
pub const OUTPUT_ID: &str = "GoAlertARecordSetOutput";
pub const EXPORT_NAME: &str = "GoAlert-A-RecordSet";

pub const TTL_SECS: u32 = 300;
pub const MAILGUN_MX_HOSTS: [&str; 2] = ["mxa.mailgun.org", "mxb.mailgun.org"];
pub const MAILGUN_MX_PRIORITY: u16 = 10;
pub const SPF_VALUE: &str = "v=spf1 include:mailgun.org ~all";
pub const TRACKING_TARGET: &str = "mailgun.org";

/// Longest character-string a TXT record may hold.
const TXT_CHUNK: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    A,
    Mx,
    Txt,
    Cname,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Mx => "MX",
            RecordType::Txt => "TXT",
            RecordType::Cname => "CNAME",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One declared record set.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSet {
    pub logical_id: String,
    pub record_type: RecordType,
    /// Fully qualified name with trailing dot.
    pub name: String,
    /// Resource record values; empty for alias records.
    pub values: Vec<String>,
    /// `None` for alias records, which take the target's TTL.
    pub ttl: Option<u32>,
}

/// Records declared by the DNS section.
#[derive(Debug, Clone, PartialEq)]
pub struct DnsRecords {
    pub zone: HostedZone,
    pub records: Vec<RecordSet>,
}

impl DnsRecords {
    pub fn of_type(&self, record_type: RecordType) -> impl Iterator<Item = &RecordSet> {
        self.records.iter().filter(move |r| r.record_type == record_type)
    }
}

/// Pre-existing zone the records go into. Never created by this stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostedZone {
    Name(String),
    Id(String),
}

impl HostedZone {
    pub fn from_config(config: &StackConfig) -> Self {
        match &config.hosted_zone_id {
            Some(id) => HostedZone::Id(id.clone()),
            None => HostedZone::Name(absolute(&config.domain)),
        }
    }

    fn apply(&self, resource: Resource) -> Resource {
        match self {
            HostedZone::Name(name) => resource.property("HostedZoneName", name.as_str()),
            HostedZone::Id(id) => resource.property("HostedZoneId", id.as_str()),
        }
    }
}

/// `name` with the trailing dot Route 53 expects.
fn absolute(name: &str) -> String {
    if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{name}.")
    }
}

/// Quote a TXT value, splitting it into 255-byte character-strings.
pub fn txt_value(value: &str) -> String {
    let value = value.trim().trim_matches('"');
    let mut chunks = Vec::new();
    let mut current = String::new();
    for ch in value.chars() {
        if current.len() + ch.len_utf8() > TXT_CHUNK {
            chunks.push(std::mem::take(&mut current));
        }
        current.push(ch);
    }
    if !current.is_empty() || chunks.is_empty() {
        chunks.push(current);
    }
    chunks
        .iter()
        .map(|chunk| format!("\"{}\"", chunk.replace('"', "\\\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Declare all records. The A record aliases the compute layer's load
/// balancer.
pub fn declare(
    template: &mut Template,
    config: &StackConfig,
    compute: &ComputeService,
) -> StackResult<DnsRecords> {
    let zone = HostedZone::from_config(config);
    let fqdn = absolute(&config.fqdn());
    let mut records = Vec::with_capacity(5);

    template.add_resource(
        A_RECORD_ID,
        zone.apply(Resource::new("AWS::Route53::RecordSet"))
            .property("Name", fqdn.as_str())
            .property("Type", RecordType::A.as_str())
            .property(
                "AliasTarget",
                json!({
                    "DNSName": compute.load_balancer_dns_name(),
                    "HostedZoneId": compute.load_balancer_hosted_zone_id()
                }),
            ),
    )?;
    records.push(RecordSet {
        logical_id: A_RECORD_ID.to_string(),
        record_type: RecordType::A,
        name: fqdn.clone(),
        values: Vec::new(),
        ttl: None,
    });

    let mx_values = MAILGUN_MX_HOSTS
        .iter()
        .map(|host| format!("{MAILGUN_MX_PRIORITY} {host}"))
        .collect();
    records.push(static_record(template, &zone, MX_RECORD_ID, RecordType::Mx, fqdn.clone(), mx_values)?);

    records.push(static_record(
        template,
        &zone,
        SPF_RECORD_ID,
        RecordType::Txt,
        fqdn.clone(),
        vec![txt_value(SPF_VALUE)],
    )?);

    records.push(static_record(
        template,
        &zone,
        TRACKING_CNAME_ID,
        RecordType::Cname,
        format!("email.{fqdn}"),
        vec![TRACKING_TARGET.to_string()],
    )?);

    records.push(static_record(
        template,
        &zone,
        DKIM_RECORD_ID,
        RecordType::Txt,
        format!("{}._domainkey.{fqdn}", config.mail.dkim_selector),
        vec![txt_value(config.dkim_value())],
    )?);

    template.add_output(
        OUTPUT_ID,
        Output::new(reference(A_RECORD_ID))
            .description("Domain name GoAlert is served under")
            .export(EXPORT_NAME),
    )?;

    Ok(DnsRecords { zone, records })
}

fn static_record(
    template: &mut Template,
    zone: &HostedZone,
    logical_id: &str,
    record_type: RecordType,
    name: String,
    values: Vec<String>,
) -> StackResult<RecordSet> {
    template.add_resource(
        logical_id,
        zone.apply(Resource::new("AWS::Route53::RecordSet"))
            .property("Name", name.as_str())
            .property("Type", record_type.as_str())
            .property("TTL", TTL_SECS.to_string())
            .property(
                "ResourceRecords",
                Value::Array(values.iter().map(|v| Value::from(v.as_str())).collect()),
            ),
    )?;
    Ok(RecordSet {
        logical_id: logical_id.to_string(),
        record_type,
        name,
        values,
        ttl: Some(TTL_SECS),
    })
}
