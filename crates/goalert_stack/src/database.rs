//! Database section: security group, subnet group and the serverless
//! Aurora PostgreSQL cluster.

use serde_json::{Value, json};

use crate::config::{DatabaseConfig, DatabaseCredentials};
use crate::error::StackResult;
use crate::network::Network;
use crate::template::intrinsic::{get_att, join, reference};
use crate::template::{Resource, Template};

pub const SECURITY_GROUP_ID: &str = "GoAlertDatabaseSecurityGroup";
pub const SUBNET_GROUP_ID: &str = "GoAlertDbSubnets";
pub const CLUSTER_ID: &str = "GoAlertDatabaseCluster";

const ENGINE: &str = "aurora-postgresql";
const ENGINE_MODE: &str = "serverless";

/// Handle to the database cluster, read by the automation and compute
/// sections.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseCluster {
    pub logical_id: String,
    pub security_group: String,
    pub subnet_group: String,
    pub username: String,
    pub password: String,
    pub database_name: String,
    pub port: u16,
}

impl DatabaseCluster {
    /// Hostname of the cluster endpoint.
    pub fn endpoint_address(&self) -> Value {
        get_att(&self.logical_id, "Endpoint.Address")
    }

    /// `postgres://<user>:<password>@<endpoint>/<dbname>`
    pub fn connection_url(&self) -> Value {
        join(
            "",
            vec![
                Value::from("postgres://"),
                Value::from(self.username.as_str()),
                Value::from(":"),
                Value::from(self.password.as_str()),
                Value::from("@"),
                self.endpoint_address(),
                Value::from("/"),
                Value::from(self.database_name.as_str()),
            ],
        )
    }
}

/// Declare the database resources inside `network`'s private subnets.
pub fn declare(
    template: &mut Template,
    network: &Network,
    config: &DatabaseConfig,
    credentials: &DatabaseCredentials,
) -> StackResult<DatabaseCluster> {
    template.add_resource(
        SECURITY_GROUP_ID,
        Resource::new("AWS::EC2::SecurityGroup")
            .property("GroupName", "goalert-database-security-group")
            .property("GroupDescription", "GoAlert database access")
            .property("VpcId", network.vpc_ref())
            .property("SecurityGroupIngress", ingress_rules(config.port))
            .property(
                "SecurityGroupEgress",
                json!([{
                    "CidrIp": "0.0.0.0/0",
                    "Description": "Allow all outbound traffic by default",
                    "IpProtocol": "-1"
                }]),
            ),
    )?;

    template.add_resource(
        SUBNET_GROUP_ID,
        Resource::new("AWS::RDS::DBSubnetGroup")
            .property("DBSubnetGroupName", "goalert-db-subnet-group")
            .property("DBSubnetGroupDescription", "GoAlert DB VPC Subnets")
            .property("SubnetIds", network.private_subnet_refs()),
    )?;

    template.add_resource(
        CLUSTER_ID,
        Resource::new("AWS::RDS::DBCluster")
            .property("Engine", ENGINE)
            .property("EngineMode", ENGINE_MODE)
            .property("DatabaseName", config.name.as_str())
            .property("MasterUsername", credentials.username.as_str())
            .property("MasterUserPassword", credentials.password.as_str())
            .property("Port", config.port)
            .property("VpcSecurityGroupIds", json!([get_att(SECURITY_GROUP_ID, "GroupId")]))
            .property("DBSubnetGroupName", reference(SUBNET_GROUP_ID))
            .property(
                "ScalingConfiguration",
                json!({
                    "AutoPause": true,
                    "MinCapacity": config.min_capacity,
                    "MaxCapacity": config.max_capacity,
                    "SecondsUntilAutoPause": config.seconds_until_auto_pause
                }),
            ),
    )?;

    Ok(DatabaseCluster {
        logical_id: CLUSTER_ID.to_string(),
        security_group: SECURITY_GROUP_ID.to_string(),
        subnet_group: SUBNET_GROUP_ID.to_string(),
        username: credentials.username.clone(),
        password: credentials.password.clone(),
        database_name: config.name.clone(),
        port: config.port,
    })
}

/// The database port from any IPv4 and any IPv6 address.
fn ingress_rules(port: u16) -> Value {
    json!([
        {
            "CidrIp": "0.0.0.0/0",
            "Description": format!("from 0.0.0.0/0:{port}"),
            "FromPort": port,
            "IpProtocol": "tcp",
            "ToPort": port
        },
        {
            "CidrIpv6": "::/0",
            "Description": format!("from ::/0:{port}"),
            "FromPort": port,
            "IpProtocol": "tcp",
            "ToPort": port
        }
    ])
}
