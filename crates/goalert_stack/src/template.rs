//! CloudFormation template model.
//!
//! Resources and outputs are keyed by logical id in sorted maps, so the same
//! declarations always serialize to the same document.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{StackError, StackResult};

pub const FORMAT_VERSION: &str = "2010-09-09";

/// Resource types that accept a `Tags` list of `{Key, Value}` pairs.
const TAGGABLE_TYPES: &[&str] = &[
    "AWS::CertificateManager::Certificate",
    "AWS::EC2::EIP",
    "AWS::EC2::InternetGateway",
    "AWS::EC2::NatGateway",
    "AWS::EC2::RouteTable",
    "AWS::EC2::SecurityGroup",
    "AWS::EC2::Subnet",
    "AWS::EC2::VPC",
    "AWS::ECS::Cluster",
    "AWS::ECS::Service",
    "AWS::ECS::TaskDefinition",
    "AWS::ElasticLoadBalancingV2::LoadBalancer",
    "AWS::ElasticLoadBalancingV2::TargetGroup",
    "AWS::IAM::Role",
    "AWS::Lambda::Function",
    "AWS::Logs::LogGroup",
    "AWS::RDS::DBCluster",
    "AWS::RDS::DBSubnetGroup",
];

/// A CloudFormation template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,
    pub description: String,
    pub resources: BTreeMap<String, Resource>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Output>,
}

impl Template {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            format_version: FORMAT_VERSION.to_string(),
            description: description.into(),
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Add a resource under a logical id that must not be taken yet.
    pub fn add_resource(&mut self, logical_id: impl Into<String>, resource: Resource) -> StackResult<()> {
        let logical_id = logical_id.into();
        if self.resources.contains_key(&logical_id) || self.outputs.contains_key(&logical_id) {
            return Err(StackError::DuplicateLogicalId(logical_id));
        }
        self.resources.insert(logical_id, resource);
        Ok(())
    }

    pub fn add_output(&mut self, logical_id: impl Into<String>, output: Output) -> StackResult<()> {
        let logical_id = logical_id.into();
        if self.resources.contains_key(&logical_id) || self.outputs.contains_key(&logical_id) {
            return Err(StackError::DuplicateLogicalId(logical_id));
        }
        self.outputs.insert(logical_id, output);
        Ok(())
    }

    pub fn resource(&self, logical_id: &str) -> Option<&Resource> {
        self.resources.get(logical_id)
    }

    /// All resources of one CloudFormation type, in logical id order.
    pub fn resources_of_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a Resource)> + 'a {
        self.resources
            .iter()
            .filter(move |(_, r)| r.resource_type == resource_type)
    }

    /// Apply stack tags to every taggable resource, keeping tags the
    /// resource already declares.
    pub fn apply_tags(&mut self, tags: &BTreeMap<String, String>) {
        if tags.is_empty() {
            return;
        }
        for resource in self.resources.values_mut() {
            if !TAGGABLE_TYPES.contains(&resource.resource_type.as_str()) {
                continue;
            }
            let mut merged: BTreeMap<String, Value> = tags
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            if let Some(Value::Array(existing)) = resource.properties.get("Tags") {
                for tag in existing {
                    if let (Some(Value::String(key)), Some(value)) = (tag.get("Key"), tag.get("Value")) {
                        merged.insert(key.clone(), value.clone());
                    }
                }
            }
            let list = merged
                .into_iter()
                .map(|(key, value)| json!({ "Key": key, "Value": value }))
                .collect();
            resource.properties.insert("Tags".to_string(), Value::Array(list));
        }
    }

    /// Export names declared by the outputs.
    pub fn export_names(&self) -> Vec<&str> {
        self.outputs
            .values()
            .filter_map(|o| o.export.as_ref().map(|e| e.name.as_str()))
            .collect()
    }

    pub fn to_json_pretty(&self) -> StackResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_yaml(&self) -> StackResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// A single resource declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "Type")]
    pub resource_type: String,
    #[serde(rename = "Properties", default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
    #[serde(rename = "DependsOn", default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            properties: Map::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn depends_on(mut self, logical_id: impl Into<String>) -> Self {
        let logical_id = logical_id.into();
        if !self.depends_on.contains(&logical_id) {
            self.depends_on.push(logical_id);
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Logical ids this resource points at through intrinsics or `DependsOn`.
    pub fn references(&self) -> BTreeSet<String> {
        let mut refs = BTreeSet::new();
        for value in self.properties.values() {
            collect_references(value, &mut refs);
        }
        refs.extend(self.depends_on.iter().cloned());
        refs
    }
}

/// A stack output, optionally exported for other stacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Output {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export: Option<Export>,
}

impl Output {
    pub fn new(value: Value) -> Self {
        Self {
            description: None,
            value,
            export: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn export(mut self, name: impl Into<String>) -> Self {
        self.export = Some(Export { name: name.into() });
        self
    }

    pub fn references(&self) -> BTreeSet<String> {
        let mut refs = BTreeSet::new();
        collect_references(&self.value, &mut refs);
        refs
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Export {
    pub name: String,
}

fn collect_references(value: &Value, refs: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(target)) = map.get("Ref") {
                if !target.starts_with("AWS::") {
                    refs.insert(target.clone());
                }
            }
            if let Some(Value::Array(parts)) = map.get("Fn::GetAtt") {
                if let Some(Value::String(target)) = parts.first() {
                    refs.insert(target.clone());
                }
            }
            for v in map.values() {
                collect_references(v, refs);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect_references(v, refs);
            }
        }
        _ => {}
    }
}

/// CloudFormation intrinsic function builders.
pub mod intrinsic {
    use serde_json::{Value, json};

    pub fn reference(logical_id: &str) -> Value {
        json!({ "Ref": logical_id })
    }

    pub fn get_att(logical_id: &str, attribute: &str) -> Value {
        json!({ "Fn::GetAtt": [logical_id, attribute] })
    }

    pub fn join(delimiter: &str, parts: Vec<Value>) -> Value {
        json!({ "Fn::Join": [delimiter, parts] })
    }

    pub fn select(index: usize, list: Value) -> Value {
        json!({ "Fn::Select": [index, list] })
    }

    /// Availability zones of the stack's region.
    pub fn get_azs() -> Value {
        json!({ "Fn::GetAZs": "" })
    }

    pub fn partition() -> Value {
        reference("AWS::Partition")
    }

    pub fn region() -> Value {
        reference("AWS::Region")
    }

    /// ARN of an AWS managed IAM policy in the current partition.
    pub fn managed_policy_arn(name: &str) -> Value {
        join(
            "",
            vec![
                Value::from("arn:"),
                partition(),
                Value::from(format!(":iam::aws:policy/{name}")),
            ],
        )
    }
}
