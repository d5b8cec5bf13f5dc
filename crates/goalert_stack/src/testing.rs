//! Shared fixtures for unit tests.

use uuid::Uuid;

use crate::config::{DatabaseCredentials, GeneratedValues, StackConfig};

pub(crate) const SAMPLE: &str = r#"
account_id = "700164244043"
region = "us-east-1"
subdomain = "goalert"
domain = "silboapp.com"

[instance]
ami = "ami-0a57edc25c5a0837f"

[mail]
dkim_value = '"k=rsa; p=MIGfMA0GCSqGSIb3DQEBAQUAA4GNADCBiQKBgQDpb+xyVNTeCQeQMDK9HFC9SyEOhFzBEBTDhCCBBfyhhQYsyeZtAe9nkfAPdH6rvUrxunFmiCVnEeHrp053P/xWVRqXoXqnYAXC3SgP0X7nH9Gc6v7kDfEhte0anqsPUf8eXSpmh6ceYbm34W0aqi8169TTQFSFSPQnPQymfSjwfQIDAQAB"'
"#;

pub(crate) fn config() -> StackConfig {
    StackConfig::from_toml_str(SAMPLE).unwrap()
}

pub(crate) fn credentials() -> DatabaseCredentials {
    DatabaseCredentials {
        username: "postgres".to_string(),
        password: "s3cret".to_string(),
    }
}

pub(crate) fn generated() -> GeneratedValues {
    GeneratedValues::new(
        "0b8e6c1a-2f3d-4c5e-9a7b-1d2e3f4a5b6c",
        Uuid::from_u128(0x6f1c_2d3e_4a5b_4c6d_8e7f_9a0b1c2d3e4f),
    )
}
