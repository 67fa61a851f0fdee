//! Spec layer: stack config schema + validated in-memory structures.
//!
//! This module is intentionally separate from declaration and rendering.
//! It owns:
//! - locators for the secret and parameter stores
//! - the network context
//! - service parameters and their defaults
//! - config file loading with context overrides

pub mod config;
pub mod network;
pub mod params;
pub mod refs;

pub use config::{ContextOverride, load_stack_spec, parse_stack_spec};
pub use network::{NetworkContext, NetworkSpec, NetworkValue};
pub use params::{ContextSpec, ExtraParameter, ServiceParams};
pub use refs::{ParameterRef, SecretArn};

use crate::error::StackError;
use crate::stack::env::credential_env_names;

use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

static STACK_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9-]{0,127}$").expect("stack name pattern is valid")
});

/// Raw stack config as it appears on disk.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StackSpec {
    pub stack_name: String,

    #[serde(default)]
    pub description: Option<String>,

    pub network: NetworkSpec,

    pub db_secret_arn: String,

    #[serde(default)]
    pub context: ContextSpec,
}

/// Everything `ComputeStack::declare` needs, validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeStackProps {
    pub stack_name: String,
    pub description: Option<String>,
    pub network: NetworkContext,
    pub db_secret: SecretArn,
    pub params: ServiceParams,
}

impl StackSpec {
    /// Validate names, references and parameters. Nothing is declared
    /// unless this succeeds.
    pub fn validate_and_build(&self) -> Result<ComputeStackProps, StackError> {
        if !STACK_NAME_RE.is_match(&self.stack_name) {
            return Err(StackError::validation(
                "stackName",
                "must start with a letter and contain only letters, digits and '-' (max 128)",
            ));
        }

        let network = self.network.validate_and_build()?;
        let db_secret = SecretArn::parse("dbSecretArn", &self.db_secret_arn)?;
        let params = self.context.validate_and_build(&credential_env_names())?;

        Ok(ComputeStackProps {
            stack_name: self.stack_name.clone(),
            description: self.description.clone(),
            network,
            db_secret,
            params,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(v: serde_json::Value) -> StackSpec {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn builds_props() {
        let props = spec(json!({
            "stackName": "FargateStack",
            "network": { "vpcId": "VPC-A", "publicSubnetIds": ["a", "b"] },
            "dbSecretArn": "arn:secret/pg-creds",
            "context": { "containerImage": "org/app", "containerPort": 4000 },
        }))
        .validate_and_build()
        .unwrap();

        assert_eq!(props.stack_name, "FargateStack");
        assert_eq!(props.db_secret.as_str(), "arn:secret/pg-creds");
        assert_eq!(props.params.container_port, 4000);
    }

    #[test]
    fn rejects_bad_stack_name_and_secret() {
        let err = spec(json!({
            "stackName": "1stack",
            "network": { "vpcId": "VPC-A", "publicSubnetIds": ["a", "b"] },
            "dbSecretArn": "arn:secret/pg-creds",
        }))
        .validate_and_build()
        .unwrap_err();
        assert!(matches!(err, StackError::Validation { ref field, .. } if field == "stackName"));

        let err = spec(json!({
            "stackName": "FargateStack",
            "network": { "vpcId": "VPC-A", "publicSubnetIds": ["a", "b"] },
            "dbSecretArn": "pg-creds",
            "context": { "containerImage": "org/app", "containerPort": 4000 },
        }))
        .validate_and_build()
        .unwrap_err();
        assert!(matches!(err, StackError::Reference { ref field, .. } if field == "dbSecretArn"));
    }
}
