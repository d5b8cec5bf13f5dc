//! Compute/edge section: ECS cluster, TLS certificate and the load-balanced
//! Fargate service running GoAlert.

use std::collections::BTreeMap;

use serde_json::{Value, json};

use crate::config::{GeneratedValues, StackConfig};
use crate::database::DatabaseCluster;
use crate::error::StackResult;
use crate::network::Network;
use crate::template::intrinsic::{get_att, managed_policy_arn, reference, region};
use crate::template::{Resource, Template};

pub const CLUSTER_ID: &str = "GoAlertCluster";
pub const CERTIFICATE_ID: &str = "GoAlertCertificate";
pub const LOAD_BALANCER_ID: &str = "GoAlertFargateLB";
pub const LB_SECURITY_GROUP_ID: &str = "GoAlertFargateLBSecurityGroup";
pub const LISTENER_ID: &str = "GoAlertFargateLBPublicListener";
pub const TARGET_GROUP_ID: &str = "GoAlertFargateLBTargetGroup";
pub const EXECUTION_ROLE_ID: &str = "GoAlertFargateTaskExecutionRole";
pub const LOG_GROUP_ID: &str = "GoAlertFargateLogGroup";
pub const TASK_DEFINITION_ID: &str = "GoAlertFargateTaskDef";
pub const SERVICE_SECURITY_GROUP_ID: &str = "GoAlertFargateServiceSecurityGroup";
pub const SERVICE_ID: &str = "GoAlertFargateService";

pub const CLUSTER_NAME: &str = "GoAlert_Cluster";
pub const CONTAINER_NAME: &str = "GoAlert_Container";
pub const SERVICE_NAME: &str = "GoAlert_Service";

const HTTPS_PORT: u16 = 443;
const HEALTH_CHECK_PATH: &str = "/health";

/// Handle to the Fargate service and its load balancer.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputeService {
    pub cluster: String,
    pub certificate: String,
    pub load_balancer: String,
    pub listener: String,
    pub target_group: String,
    pub task_definition: String,
    pub service: String,
    pub container_name: String,
    pub container_port: u16,
    pub environment: BTreeMap<String, Value>,
}

impl ComputeService {
    pub fn load_balancer_dns_name(&self) -> Value {
        get_att(&self.load_balancer, "DNSName")
    }

    pub fn load_balancer_hosted_zone_id(&self) -> Value {
        get_att(&self.load_balancer, "CanonicalHostedZoneID")
    }
}

/// Declare the compute layer. Reads the database handle for the connection
/// string.
pub fn declare(
    template: &mut Template,
    network: &Network,
    database: &DatabaseCluster,
    config: &StackConfig,
    generated: &GeneratedValues,
) -> StackResult<ComputeService> {
    let app = &config.application;
    let port = app.container_port;

    let environment: BTreeMap<String, Value> = BTreeMap::from([
        ("GOALERT_DB_URL".to_string(), database.connection_url()),
        (
            "GOALERT_DATA_ENCRYPTION_KEY".to_string(),
            Value::from(generated.encryption_key.as_str()),
        ),
        ("GOALERT_LISTEN".to_string(), Value::from(format!(":{port}"))),
    ]);

    template.add_resource(
        CLUSTER_ID,
        Resource::new("AWS::ECS::Cluster").property("ClusterName", CLUSTER_NAME),
    )?;

    let fqdn = config.fqdn();
    let mut certificate = Resource::new("AWS::CertificateManager::Certificate")
        .property("DomainName", fqdn.as_str())
        .property("ValidationMethod", "DNS");
    if let Some(zone_id) = &config.hosted_zone_id {
        certificate = certificate.property(
            "DomainValidationOptions",
            json!([{ "DomainName": fqdn, "HostedZoneId": zone_id }]),
        );
    }
    template.add_resource(CERTIFICATE_ID, certificate)?;

    template.add_resource(
        LB_SECURITY_GROUP_ID,
        Resource::new("AWS::EC2::SecurityGroup")
            .property("GroupDescription", "GoAlert load balancer")
            .property("VpcId", network.vpc_ref())
            .property(
                "SecurityGroupIngress",
                json!([{
                    "CidrIp": "0.0.0.0/0",
                    "Description": format!("Allow from anyone on port {HTTPS_PORT}"),
                    "FromPort": HTTPS_PORT,
                    "IpProtocol": "tcp",
                    "ToPort": HTTPS_PORT
                }]),
            ),
    )?;

    let mut load_balancer = Resource::new("AWS::ElasticLoadBalancingV2::LoadBalancer")
        .property("Type", "application")
        .property("Scheme", "internet-facing")
        .property("Subnets", network.public_subnet_refs())
        .property("SecurityGroups", json!([get_att(LB_SECURITY_GROUP_ID, "GroupId")]));
    for route in &network.public_routes {
        load_balancer = load_balancer.depends_on(route.as_str());
    }
    template.add_resource(LOAD_BALANCER_ID, load_balancer)?;

    template.add_resource(
        TARGET_GROUP_ID,
        Resource::new("AWS::ElasticLoadBalancingV2::TargetGroup")
            .property("Port", port)
            .property("Protocol", "HTTP")
            .property("TargetType", "ip")
            .property("VpcId", network.vpc_ref())
            .property("HealthCheckPath", HEALTH_CHECK_PATH),
    )?;

    template.add_resource(
        LISTENER_ID,
        Resource::new("AWS::ElasticLoadBalancingV2::Listener")
            .property("LoadBalancerArn", reference(LOAD_BALANCER_ID))
            .property("Port", HTTPS_PORT)
            .property("Protocol", "HTTPS")
            .property("Certificates", json!([{ "CertificateArn": reference(CERTIFICATE_ID) }]))
            .property(
                "DefaultActions",
                json!([{ "Type": "forward", "TargetGroupArn": reference(TARGET_GROUP_ID) }]),
            ),
    )?;

    template.add_resource(
        EXECUTION_ROLE_ID,
        Resource::new("AWS::IAM::Role")
            .property(
                "AssumeRolePolicyDocument",
                json!({
                    "Version": "2012-10-17",
                    "Statement": [{
                        "Action": "sts:AssumeRole",
                        "Effect": "Allow",
                        "Principal": { "Service": "ecs-tasks.amazonaws.com" }
                    }]
                }),
            )
            .property(
                "ManagedPolicyArns",
                json!([managed_policy_arn(
                    "service-role/AmazonECSTaskExecutionRolePolicy"
                )]),
            ),
    )?;

    template.add_resource(
        LOG_GROUP_ID,
        Resource::new("AWS::Logs::LogGroup").property("RetentionInDays", 30),
    )?;

    let container_environment: Vec<Value> = environment
        .iter()
        .map(|(name, value)| json!({ "Name": name, "Value": value }))
        .collect();

    template.add_resource(
        TASK_DEFINITION_ID,
        Resource::new("AWS::ECS::TaskDefinition")
            .property("RequiresCompatibilities", json!(["FARGATE"]))
            .property("NetworkMode", "awsvpc")
            .property("Cpu", app.cpu.to_string())
            .property("Memory", app.memory_mib.to_string())
            .property("ExecutionRoleArn", get_att(EXECUTION_ROLE_ID, "Arn"))
            .property(
                "ContainerDefinitions",
                json!([{
                    "Name": CONTAINER_NAME,
                    "Image": app.image,
                    "Essential": true,
                    "PortMappings": [{ "ContainerPort": port, "Protocol": "tcp" }],
                    "Environment": container_environment,
                    "LogConfiguration": {
                        "LogDriver": "awslogs",
                        "Options": {
                            "awslogs-group": reference(LOG_GROUP_ID),
                            "awslogs-stream-prefix": "GoAlert",
                            "awslogs-region": region()
                        }
                    }
                }]),
            ),
    )?;

    template.add_resource(
        SERVICE_SECURITY_GROUP_ID,
        Resource::new("AWS::EC2::SecurityGroup")
            .property("GroupDescription", "GoAlert Fargate service")
            .property("VpcId", network.vpc_ref())
            .property(
                "SecurityGroupIngress",
                json!([{
                    "Description": "Load balancer to target",
                    "FromPort": port,
                    "IpProtocol": "tcp",
                    "SourceSecurityGroupId": get_att(LB_SECURITY_GROUP_ID, "GroupId"),
                    "ToPort": port
                }]),
            ),
    )?;

    template.add_resource(
        SERVICE_ID,
        Resource::new("AWS::ECS::Service")
            .property("ServiceName", SERVICE_NAME)
            .property("Cluster", reference(CLUSTER_ID))
            .property("LaunchType", "FARGATE")
            .property("DesiredCount", app.desired_count)
            .property("TaskDefinition", reference(TASK_DEFINITION_ID))
            .property("HealthCheckGracePeriodSeconds", 60)
            .property(
                "LoadBalancers",
                json!([{
                    "ContainerName": CONTAINER_NAME,
                    "ContainerPort": port,
                    "TargetGroupArn": reference(TARGET_GROUP_ID)
                }]),
            )
            .property(
                "NetworkConfiguration",
                json!({
                    "AwsvpcConfiguration": {
                        "AssignPublicIp": "DISABLED",
                        "SecurityGroups": [get_att(SERVICE_SECURITY_GROUP_ID, "GroupId")],
                        "Subnets": network.private_subnet_refs()
                    }
                }),
            )
            .depends_on(LISTENER_ID),
    )?;

    Ok(ComputeService {
        cluster: CLUSTER_ID.to_string(),
        certificate: CERTIFICATE_ID.to_string(),
        load_balancer: LOAD_BALANCER_ID.to_string(),
        listener: LISTENER_ID.to_string(),
        target_group: TARGET_GROUP_ID.to_string(),
        task_definition: TASK_DEFINITION_ID.to_string(),
        service: SERVICE_ID.to_string(),
        container_name: CONTAINER_NAME.to_string(),
        container_port: port,
        environment,
    })
}
