//! Stack Builder: composes the five sections in dependency order.
//!
//! Sections can be added one at a time; each refuses to run before the
//! sections it reads from. [`StackBuilder::build`] adds whatever is still
//! missing in the right order and checks the resulting graph.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::automation::{self, ProvisioningFunction};
use crate::compute::{self, ComputeService};
use crate::config::{DatabaseCredentials, GeneratedValues, StackConfig};
use crate::database::{self, DatabaseCluster};
use crate::dns::{self, DnsRecords};
use crate::error::{StackError, StackResult};
use crate::graph::DependencyGraph;
use crate::network::{self, Network};
use crate::template::Template;

pub struct StackBuilder {
    config: StackConfig,
    credentials: DatabaseCredentials,
    generated: GeneratedValues,
    template: Template,
    network: Option<Network>,
    database: Option<DatabaseCluster>,
    automation: Option<ProvisioningFunction>,
    compute: Option<ComputeService>,
    dns: Option<DnsRecords>,
}

impl StackBuilder {
    pub fn new(config: StackConfig, credentials: DatabaseCredentials, generated: GeneratedValues) -> Self {
        let template = Template::new(format!(
            "GoAlert on Fargate at {} ({})",
            config.fqdn(),
            config.stack_name
        ));
        Self {
            config,
            credentials,
            generated,
            template,
            network: None,
            database: None,
            automation: None,
            compute: None,
            dns: None,
        }
    }

    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn add_network(&mut self) -> StackResult<&Network> {
        if self.network.is_some() {
            return Err(StackError::AlreadyBuilt("network"));
        }
        let network = network::declare(&mut self.template, &self.config.network)?;
        debug!(
            "Network declared: {} public, {} private subnets",
            network.public_subnets.len(),
            network.private_subnets.len()
        );
        Ok(&*self.network.insert(network))
    }

    pub fn add_database(&mut self) -> StackResult<&DatabaseCluster> {
        if self.database.is_some() {
            return Err(StackError::AlreadyBuilt("database"));
        }
        let network = require(&self.network, "database", "network")?;
        let cluster = database::declare(
            &mut self.template,
            network,
            &self.config.database,
            &self.credentials,
        )?;
        debug!("Database cluster declared: {}", cluster.logical_id);
        Ok(&*self.database.insert(cluster))
    }

    pub fn add_automation(&mut self) -> StackResult<&ProvisioningFunction> {
        if self.automation.is_some() {
            return Err(StackError::AlreadyBuilt("automation"));
        }
        let network = require(&self.network, "automation", "network")?;
        let database = require(&self.database, "automation", "database")?;
        let function = automation::declare(
            &mut self.template,
            network,
            database,
            &self.config,
            &self.generated,
        )?;
        debug!("Provisioning function declared: {}", function.logical_id);
        Ok(&*self.automation.insert(function))
    }

    pub fn add_compute(&mut self) -> StackResult<&ComputeService> {
        if self.compute.is_some() {
            return Err(StackError::AlreadyBuilt("compute"));
        }
        let network = require(&self.network, "compute", "network")?;
        let database = require(&self.database, "compute", "database")?;
        let service = compute::declare(
            &mut self.template,
            network,
            database,
            &self.config,
            &self.generated,
        )?;
        debug!("Fargate service declared: {}", service.service);
        Ok(&*self.compute.insert(service))
    }

    pub fn add_dns(&mut self) -> StackResult<&DnsRecords> {
        if self.dns.is_some() {
            return Err(StackError::AlreadyBuilt("dns"));
        }
        let compute = require(&self.compute, "dns", "compute")?;
        let records = dns::declare(&mut self.template, &self.config, compute)?;
        debug!("DNS records declared: {}", records.records.len());
        Ok(&*self.dns.insert(records))
    }

    /// Add any missing sections, tag resources and check the graph.
    pub fn build(mut self) -> StackResult<Stack> {
        if self.network.is_none() {
            self.add_network()?;
        }
        if self.database.is_none() {
            self.add_database()?;
        }
        if self.automation.is_none() {
            self.add_automation()?;
        }
        if self.compute.is_none() {
            self.add_compute()?;
        }
        if self.dns.is_none() {
            self.add_dns()?;
        }

        self.template.apply_tags(&self.config.tags);

        let graph = DependencyGraph::from_template(&self.template);
        let order = graph.topological_order()?;
        info!(
            "Stack {} built: {} resources, {} outputs",
            self.config.stack_name,
            order.len(),
            self.template.outputs.len()
        );

        let (Some(network), Some(database), Some(automation), Some(compute), Some(dns)) =
            (self.network, self.database, self.automation, self.compute, self.dns)
        else {
            return Err(StackError::MissingDependency {
                section: "stack",
                requires: "all sections",
            });
        };

        Ok(Stack {
            name: self.config.stack_name.clone(),
            account_id: self.config.account_id.clone(),
            region: self.config.region.clone(),
            tags: self.config.tags.clone(),
            template: self.template,
            network,
            database,
            automation,
            compute,
            dns,
        })
    }
}

fn require<'a, T>(section: &'a Option<T>, name: &'static str, requires: &'static str) -> StackResult<&'a T> {
    section.as_ref().ok_or(StackError::MissingDependency {
        section: name,
        requires,
    })
}

/// A fully built stack: the template plus handles to every section.
#[derive(Debug, Clone)]
pub struct Stack {
    pub name: String,
    pub account_id: String,
    pub region: String,
    pub tags: BTreeMap<String, String>,
    pub template: Template,
    pub network: Network,
    pub database: DatabaseCluster,
    pub automation: ProvisioningFunction,
    pub compute: ComputeService,
    pub dns: DnsRecords,
}

impl Stack {
    /// `aws://<account>/<region>`
    pub fn environment(&self) -> String {
        format!("aws://{}/{}", self.account_id, self.region)
    }

    /// Resources in deployment order.
    pub fn deployment_order(&self) -> StackResult<Vec<String>> {
        DependencyGraph::from_template(&self.template).topological_order()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn builder() -> StackBuilder {
        StackBuilder::new(testing::config(), testing::credentials(), testing::generated())
    }

    #[test]
    fn test_compute_before_database_rejected() {
        let mut builder = builder();
        builder.add_network().unwrap();

        let err = builder.add_compute().unwrap_err();
        assert!(matches!(
            err,
            StackError::MissingDependency {
                section: "compute",
                requires: "database"
            }
        ));
        assert!(builder.template().resources_of_type("AWS::ECS::Service").next().is_none());
    }

    #[test]
    fn test_dns_before_compute_rejected() {
        let mut builder = builder();
        let err = builder.add_dns().unwrap_err();
        assert!(matches!(err, StackError::MissingDependency { requires: "compute", .. }));
    }

    #[test]
    fn test_database_before_network_rejected() {
        let mut builder = builder();
        assert!(matches!(
            builder.add_database(),
            Err(StackError::MissingDependency { requires: "network", .. })
        ));
    }

    #[test]
    fn test_section_added_twice_rejected() {
        let mut builder = builder();
        builder.add_network().unwrap();
        assert!(matches!(builder.add_network(), Err(StackError::AlreadyBuilt("network"))));
    }

    #[test]
    fn test_build_completes_partial_builder() {
        let mut builder = builder();
        builder.add_network().unwrap();
        builder.add_database().unwrap();

        let stack = builder.build().unwrap();
        assert_eq!(stack.environment(), "aws://700164244043/us-east-1");
        assert_eq!(stack.template.outputs.len(), 2);
    }

    #[test]
    fn test_deployment_order_respects_sections() {
        let stack = builder().build().unwrap();
        let order = stack.deployment_order().unwrap();
        let position = |id: &str| order.iter().position(|o| o == id).unwrap();

        assert!(position(network::VPC_ID) < position(database::CLUSTER_ID));
        assert!(position(database::CLUSTER_ID) < position(&stack.automation.logical_id));
        assert!(position(database::CLUSTER_ID) < position(compute::TASK_DEFINITION_ID));
        assert!(position(compute::LOAD_BALANCER_ID) < position(dns::A_RECORD_ID));
    }

    #[test]
    fn test_tags_applied() {
        let stack = builder().build().unwrap();
        let cluster = stack.template.resource(database::CLUSTER_ID).unwrap();
        let tags = cluster.properties["Tags"].as_array().unwrap();

        assert!(tags.iter().any(|t| t["Key"] == "project" && t["Value"] == "goalert"));
        assert!(tags.iter().any(|t| t["Key"] == "environment" && t["Value"] == "production"));
    }
}
