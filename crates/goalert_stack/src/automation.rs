//! User-provisioning automation section.
//!
//! Declares the Lambda function that bootstraps the first GoAlert admin user,
//! its execution role and security group, and exports the function name. The
//! function is invoked out of band after deployment.

use std::collections::BTreeMap;

use serde_json::{Value, json};
use tracing::debug;
use uuid::Uuid;

use crate::config::{GeneratedValues, StackConfig};
use crate::database::DatabaseCluster;
use crate::error::{StackError, StackResult};
use crate::network::Network;
use crate::script::{HANDLER, ProvisioningScript, RUNTIME, RetryPolicy};
use crate::template::intrinsic::{get_att, managed_policy_arn, reference};
use crate::template::{Output, Resource, Template};

pub const SECURITY_GROUP_ID: &str = "GoAlertLambdaUserSecurityGroup";
pub const ROLE_ID: &str = "GoAlertLambdaUserCreateRole";
pub const OUTPUT_ID: &str = "GoAlertLambdaUserCreateFncOutput";
pub const FUNCTION_NAME: &str = "GoAlert-Lambda-User-Create-Fnc";
pub const EXPORT_NAME: &str = "GoAlert-Lambda-User-Create-Fnc-Name";
pub const POLICY_NAME: &str = "goalert-user-create";

const TIMEOUT_SECS: u32 = 300;

/// Environment contract of the provisioning function.
pub const ENVIRONMENT_KEYS: [&str; 10] = [
    "DB_HOSTNAME",
    "DB_NAME",
    "DB_USERNAME",
    "DB_PASSWORD",
    "EC2_SUBNET_ID",
    "EC2_REGION",
    "EC2_AMI",
    "EC2_INSTANCE_TYPE",
    "GOALERT_ENCRYPTION_KEY",
    "GOALERT_DOCKER_IMAGE",
];

/// Actions granted to the function. Anything else is denied.
pub const ALLOWED_ACTIONS: [&str; 6] = [
    "logs:CreateLogGroup",
    "logs:CreateLogStream",
    "logs:PutLogEvents",
    "ec2:DescribeInstances",
    "ec2:RunInstances",
    "ec2:TerminateInstances",
];

/// Handle to the provisioning function.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisioningFunction {
    pub logical_id: String,
    pub role: String,
    pub security_group: String,
    pub environment: BTreeMap<String, Value>,
    pub retry: RetryPolicy,
}

impl ProvisioningFunction {
    /// Generated function name (`Ref` of a Lambda function).
    pub fn name_ref(&self) -> Value {
        reference(&self.logical_id)
    }
}

/// Logical id of a singleton function, derived from its uuid.
pub fn singleton_logical_id(uuid: &Uuid) -> String {
    format!("SingletonLambda{}", uuid.simple())
}

/// Declare the provisioning function. It needs the database endpoint and a
/// private subnet to launch the VM in.
pub fn declare(
    template: &mut Template,
    network: &Network,
    database: &DatabaseCluster,
    config: &StackConfig,
    generated: &GeneratedValues,
) -> StackResult<ProvisioningFunction> {
    let subnet = network.private_subnets.first().ok_or_else(|| {
        StackError::InvalidNetwork("provisioning needs at least one private subnet".to_string())
    })?;

    let environment: BTreeMap<String, Value> = [
        ("DB_HOSTNAME", database.endpoint_address()),
        ("DB_NAME", Value::from(database.database_name.as_str())),
        ("DB_USERNAME", Value::from(database.username.as_str())),
        ("DB_PASSWORD", Value::from(database.password.as_str())),
        ("EC2_SUBNET_ID", reference(&subnet.logical_id)),
        ("EC2_REGION", Value::from(config.region.as_str())),
        ("EC2_AMI", Value::from(config.instance.ami.as_str())),
        ("EC2_INSTANCE_TYPE", Value::from(config.instance.instance_type.as_str())),
        ("GOALERT_ENCRYPTION_KEY", Value::from(generated.encryption_key.as_str())),
        ("GOALERT_DOCKER_IMAGE", Value::from(config.application.image.as_str())),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    let retry = RetryPolicy::from(&config.provisioning);
    let code = ProvisioningScript::new(retry).render_checked()?;
    debug!(
        "Provisioning script rendered ({} bytes, up to {} add-user attempts)",
        code.len(),
        retry.max_attempts()
    );

    template.add_resource(
        SECURITY_GROUP_ID,
        Resource::new("AWS::EC2::SecurityGroup")
            .property("GroupName", "goalert-lambda-user-security-group")
            .property("GroupDescription", "GoAlert user provisioning function")
            .property("VpcId", network.vpc_ref())
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
        ROLE_ID,
        Resource::new("AWS::IAM::Role")
            .property(
                "AssumeRolePolicyDocument",
                json!({
                    "Version": "2012-10-17",
                    "Statement": [{
                        "Action": "sts:AssumeRole",
                        "Effect": "Allow",
                        "Principal": { "Service": "lambda.amazonaws.com" }
                    }]
                }),
            )
            .property(
                "ManagedPolicyArns",
                json!([managed_policy_arn(
                    "service-role/AWSLambdaVPCAccessExecutionRole"
                )]),
            )
            .property(
                "Policies",
                json!([{
                    "PolicyName": POLICY_NAME,
                    "PolicyDocument": {
                        "Version": "2012-10-17",
                        "Statement": [{
                            "Action": ALLOWED_ACTIONS,
                            "Effect": "Allow",
                            "Resource": "*"
                        }]
                    }
                }]),
            ),
    )?;

    let logical_id = singleton_logical_id(&generated.function_uuid);
    template.add_resource(
        &logical_id,
        Resource::new("AWS::Lambda::Function")
            .property("FunctionName", FUNCTION_NAME)
            .property("Description", "Lambda which creates users in GoAlert")
            .property("Code", json!({ "ZipFile": code }))
            .property("Handler", HANDLER)
            .property("Runtime", RUNTIME)
            .property("Timeout", TIMEOUT_SECS)
            .property("Role", get_att(ROLE_ID, "Arn"))
            .property("Environment", json!({ "Variables": &environment }))
            .property(
                "VpcConfig",
                json!({
                    "SecurityGroupIds": [get_att(SECURITY_GROUP_ID, "GroupId")],
                    "SubnetIds": network.private_subnet_refs()
                }),
            )
            .depends_on(ROLE_ID),
    )?;

    let function = ProvisioningFunction {
        logical_id,
        role: ROLE_ID.to_string(),
        security_group: SECURITY_GROUP_ID.to_string(),
        environment,
        retry,
    };

    template.add_output(
        OUTPUT_ID,
        Output::new(function.name_ref())
            .description("Name of the GoAlert user provisioning function")
            .export(EXPORT_NAME),
    )?;

    Ok(function)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database;
    use crate::network;
    use crate::testing;

    fn declared() -> (Template, ProvisioningFunction) {
        let config = testing::config();
        let generated = testing::generated();
        let mut template = Template::new("test");
        let network = network::declare(&mut template, &config.network).unwrap();
        let db = database::declare(&mut template, &network, &config.database, &testing::credentials())
            .unwrap();
        let function = declare(&mut template, &network, &db, &config, &generated).unwrap();
        (template, function)
    }

    #[test]
    fn test_environment_has_exactly_ten_keys() {
        let (_, function) = declared();
        let keys: Vec<&str> = function.environment.keys().map(String::as_str).collect();
        let mut expected = ENVIRONMENT_KEYS.to_vec();
        expected.sort();

        assert_eq!(keys, expected);
        for value in function.environment.values() {
            assert!(!value.is_null());
            assert_ne!(value.as_str(), Some(""));
        }
    }

    #[test]
    fn test_environment_wiring() {
        let (_, function) = declared();
        assert_eq!(
            function.environment["DB_HOSTNAME"],
            get_att(database::CLUSTER_ID, "Endpoint.Address")
        );
        assert_eq!(
            function.environment["EC2_SUBNET_ID"],
            reference("GoAlertVpcPrivateSubnet1")
        );
        assert_eq!(function.environment["EC2_AMI"], "ami-0a57edc25c5a0837f");
        assert_eq!(
            function.environment["GOALERT_ENCRYPTION_KEY"],
            testing::generated().encryption_key.as_str()
        );
    }

    #[test]
    fn test_policy_is_minimal() {
        let (template, _) = declared();
        let role = template.resource(ROLE_ID).unwrap();
        let actions = &role.properties["Policies"][0]["PolicyDocument"]["Statement"][0]["Action"];

        assert_eq!(actions, &json!(ALLOWED_ACTIONS));
        assert!(!actions.as_array().unwrap().iter().any(|a| a.as_str() == Some("ec2:*")));
    }

    #[test]
    fn test_singleton_logical_id_and_output() {
        let (template, function) = declared();
        assert_eq!(
            function.logical_id,
            "SingletonLambda6f1c2d3e4a5b4c6d8e7f9a0b1c2d3e4f"
        );
        let lambda = template.resource(&function.logical_id).unwrap();
        assert_eq!(lambda.properties["FunctionName"], FUNCTION_NAME);
        assert_eq!(lambda.properties["Handler"], "index.lambda_to_ec2");

        let output = &template.outputs[OUTPUT_ID];
        assert_eq!(output.value, function.name_ref());
        assert_eq!(function.name_ref(), reference(&function.logical_id));
        assert_eq!(output.export.as_ref().unwrap().name, EXPORT_NAME);
    }
}
