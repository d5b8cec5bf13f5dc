//! Inline code of the user-provisioning function.
//!
//! The function launches a throwaway VM whose user data installs Docker,
//! starts GoAlert against the stack's database and retries
//! `goalert add-user --admin` under a [`RetryPolicy`]. The VM writes the
//! outcome to its console (`goalert-admin-user status=created|timeout`)
//! before it shuts itself down.

use std::time::Duration;

use crate::config::ProvisioningConfig;
use crate::error::{StackError, StackResult};

/// CloudFormation limit for `Code.ZipFile`.
pub const INLINE_CODE_LIMIT: usize = 4096;

pub const HANDLER: &str = "index.lambda_to_ec2";
pub const RUNTIME: &str = "python3.12";

/// Event keys the handler requires.
pub const EVENT_FIELDS: [&str; 3] = ["userEmail", "userId", "password"];

/// Fixed wall-clock budget with a constant pause between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub budget: Duration,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            budget: Duration::from_secs(120),
            interval: Duration::from_secs(5),
        }
    }
}

impl From<&ProvisioningConfig> for RetryPolicy {
    fn from(config: &ProvisioningConfig) -> Self {
        Self {
            budget: Duration::from_secs(config.retry_budget_secs),
            interval: Duration::from_secs(config.retry_interval_secs),
        }
    }
}

impl RetryPolicy {
    /// Upper bound on attempts, ignoring the time the command itself takes.
    pub fn max_attempts(&self) -> u64 {
        let interval = self.interval.as_secs().max(1);
        self.budget.as_secs().div_ceil(interval).max(1)
    }

    /// Bash loop running `command` until it succeeds or the budget runs out.
    /// Leaves `status` and `attempts` set for the caller.
    pub fn render_bash(&self, command: &str) -> String {
        format!(
            "end=$((SECONDS+{budget}))\n\
             status=timeout\n\
             attempts=0\n\
             while [ $SECONDS -lt $end ]; do\n  \
             attempts=$((attempts+1))\n  \
             if {command}; then\n    \
             status=created\n    \
             break\n  \
             fi\n  \
             sleep {interval}\n\
             done\n",
            budget = self.budget.as_secs(),
            interval = self.interval.as_secs().max(1),
            command = command,
        )
    }
}

/// Renders the Python handler.
#[derive(Debug, Clone)]
pub struct ProvisioningScript {
    retry: RetryPolicy,
    container_name: String,
}

impl ProvisioningScript {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            retry,
            container_name: "goalert_container".to_string(),
        }
    }

    /// Render the handler source.
    ///
    /// Text in braces is filled in by Python's `str.format` at invocation
    /// time, each value passed through `shlex.quote` so the user data shell
    /// sees it as one literal word. The environment is read at import, so a
    /// missing key fails the function before any VM is launched.
    pub fn render(&self) -> String {
        let add_user = format!(
            "docker exec {name} goalert add-user --admin --email {{email}} --user {{user_id}} \
             --pass {{password}} --db-url {{db_url}} --data-encryption-key {{encryption_key}}",
            name = self.container_name
        );
        let retry_loop = self.retry.render_bash(&add_user);

        format!(
            r##"import os
import shlex
import boto3

DB_HOST = os.environ["DB_HOSTNAME"]
DB_NAME = os.environ["DB_NAME"]
DB_USER = os.environ["DB_USERNAME"]
DB_PASS = os.environ["DB_PASSWORD"]
SUBNET_ID = os.environ["EC2_SUBNET_ID"]
REGION = os.environ["EC2_REGION"]
AMI = os.environ["EC2_AMI"]
INSTANCE_TYPE = os.environ["EC2_INSTANCE_TYPE"]
ENCRYPTION_KEY = os.environ["GOALERT_ENCRYPTION_KEY"]
IMAGE = os.environ["GOALERT_DOCKER_IMAGE"]
EC2 = boto3.client("ec2", region_name=REGION)

INIT_SCRIPT = """#!/bin/bash
apt-get update
apt-get install -y apt-transport-https ca-certificates curl software-properties-common
curl -fsSL https://download.docker.com/linux/ubuntu/gpg | apt-key add -
add-apt-repository "deb [arch=amd64] https://download.docker.com/linux/ubuntu $(lsb_release -cs) stable"
apt-get update
apt-get install -y docker-ce
service docker start
docker run -d --name {name} -e GOALERT_DB_URL={{db_url}} -e GOALERT_DATA_ENCRYPTION_KEY={{encryption_key}} {{image}}
{retry_loop}echo "goalert-admin-user status=$status attempts=$attempts" | tee /dev/console
shutdown -h +1
"""


def lambda_to_ec2(event, context):
    missing = [k for k in ({fields}) if not event.get(k)]
    if missing:
        raise ValueError("missing event fields: " + ", ".join(missing))
    db_url = "postgres://{{0}}:{{1}}@{{2}}/{{3}}".format(DB_USER, DB_PASS, DB_HOST, DB_NAME)
    values = {{
        "db_url": db_url,
        "encryption_key": ENCRYPTION_KEY,
        "image": IMAGE,
        "email": event["userEmail"],
        "user_id": event["userId"],
        "password": event["password"],
    }}
    user_data = INIT_SCRIPT.format(**{{k: shlex.quote(str(v)) for k, v in values.items()}})
    response = EC2.run_instances(
        ImageId=AMI,
        InstanceType=INSTANCE_TYPE,
        SubnetId=SUBNET_ID,
        MinCount=1,
        MaxCount=1,
        InstanceInitiatedShutdownBehavior="terminate",
        UserData=user_data,
    )
    instance_id = response["Instances"][0]["InstanceId"]
    print("launched provisioning instance " + instance_id)
    return {{"instanceId": instance_id, "status": "launched", "retryBudgetSeconds": {budget}}}
"##,
            name = self.container_name,
            retry_loop = retry_loop,
            fields = EVENT_FIELDS
                .iter()
                .map(|f| format!("\"{f}\""))
                .collect::<Vec<_>>()
                .join(", "),
            budget = self.retry.budget.as_secs(),
        )
    }

    /// Render and enforce the inline code limit.
    pub fn render_checked(&self) -> StackResult<String> {
        let code = self.render();
        if code.len() > INLINE_CODE_LIMIT {
            return Err(StackError::ScriptTooLarge {
                size: code.len(),
                limit: INLINE_CODE_LIMIT,
            });
        }
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_attempts() {
        assert_eq!(RetryPolicy::default().max_attempts(), 24);
        let policy = RetryPolicy {
            budget: Duration::from_secs(7),
            interval: Duration::from_secs(5),
        };
        assert_eq!(policy.max_attempts(), 2);
    }

    #[test]
    fn test_bash_loop_stops_on_success() {
        let bash = RetryPolicy::default().render_bash("true");
        assert!(bash.starts_with("end=$((SECONDS+120))\n"));
        assert!(bash.contains("if true; then"));
        assert!(bash.contains("status=created\n    break"));
        assert!(bash.contains("sleep 5\n"));
    }

    #[test]
    fn test_render_reads_all_environment_keys() {
        let code = ProvisioningScript::new(RetryPolicy::default()).render();
        for key in crate::automation::ENVIRONMENT_KEYS {
            assert!(code.contains(&format!("os.environ[\"{key}\"]")), "missing {key}");
        }
    }

    #[test]
    fn test_render_reports_outcome() {
        let code = ProvisioningScript::new(RetryPolicy::default()).render();
        assert!(code.contains("goalert-admin-user status=$status attempts=$attempts"));
        assert!(code.contains("\"retryBudgetSeconds\": 120"));
        assert!(code.contains("InstanceInitiatedShutdownBehavior=\"terminate\""));
        assert!(code.contains("(\"userEmail\", \"userId\", \"password\")"));
        assert!(code.contains("--email {email}"));
        assert!(code.contains("-e GOALERT_DB_URL={db_url}"));
    }

    #[test]
    fn test_user_data_values_are_shell_quoted() {
        let code = ProvisioningScript::new(RetryPolicy::default()).render();
        assert!(code.contains("import shlex\n"));
        assert!(code.contains("INIT_SCRIPT.format(**{k: shlex.quote(str(v)) for k, v in values.items()})"));

        let start = code.find("INIT_SCRIPT = \"\"\"").unwrap();
        let end = start + code[start..].find("\"\"\"\n\n").unwrap();
        let init_script = &code[start..end];
        for key in ["email", "user_id", "password", "db_url", "encryption_key", "image"] {
            let placeholder = format!("{{{key}}}");
            assert!(init_script.contains(&placeholder), "missing {key}");
            assert!(!init_script.contains(&format!("\"{placeholder}\"")), "{key} double-quoted");
            assert!(code.contains(&format!("\"{key}\": ")), "{key} not in quoted values");
        }
    }

    #[test]
    fn test_fits_inline_limit() {
        let code = ProvisioningScript::new(RetryPolicy::default())
            .render_checked()
            .unwrap();
        assert!(code.len() <= INLINE_CODE_LIMIT);
    }
}
