//! Network context supplied by the stack that owns the VPC.
//!
//! Each id is either a literal (`"vpc-0abc"`) or a cross-stack import
//! (`{"import": "NetworkStack:VpcId"}`); imports become `Fn::ImportValue`.

use crate::error::StackError;
use crate::model::intrinsic::import_value;

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum NetworkValue {
    Id(String),
    Import { import: String },
}

impl NetworkValue {
    pub fn to_value(&self) -> Value {
        match self {
            Self::Id(id) => Value::String(id.clone()),
            Self::Import { import } => import_value(import),
        }
    }

    fn check(&self, field: &str) -> Result<(), StackError> {
        let raw = match self {
            Self::Id(id) => id,
            Self::Import { import } => import,
        };
        if raw.trim().is_empty() {
            return Err(StackError::reference(field, raw.as_str(), "network id is empty"));
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(StackError::reference(
                field,
                raw.as_str(),
                "network id contains whitespace",
            ));
        }
        Ok(())
    }
}

/// Raw network section of the stack config.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NetworkSpec {
    pub vpc_id: NetworkValue,

    #[serde(default)]
    pub public_subnet_ids: Vec<NetworkValue>,

    #[serde(default)]
    pub private_subnet_ids: Vec<NetworkValue>,
}

/// Validated network the compute stack is placed into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkContext {
    pub vpc_id: NetworkValue,
    pub public_subnets: Vec<NetworkValue>,
    pub private_subnets: Vec<NetworkValue>,
}

impl NetworkSpec {
    pub fn validate_and_build(&self) -> Result<NetworkContext, StackError> {
        self.vpc_id.check("network.vpcId")?;

        for (field, subnets) in [
            ("network.publicSubnetIds", &self.public_subnet_ids),
            ("network.privateSubnetIds", &self.private_subnet_ids),
        ] {
            for (i, s) in subnets.iter().enumerate() {
                s.check(&format!("{}[{}]", field, i))?;
            }
            if let Some(dup) = first_duplicate(subnets) {
                return Err(StackError::validation(
                    field,
                    format!("subnet listed twice: {:?}", dup),
                ));
            }
        }

        if self.public_subnet_ids.is_empty() && self.private_subnet_ids.is_empty() {
            return Err(StackError::validation(
                "network",
                "at least one of publicSubnetIds or privateSubnetIds is required",
            ));
        }

        Ok(NetworkContext {
            vpc_id: self.vpc_id.clone(),
            public_subnets: self.public_subnet_ids.clone(),
            private_subnets: self.private_subnet_ids.clone(),
        })
    }
}

impl NetworkContext {
    /// Subnets for the load balancer: public when internet-facing.
    pub fn load_balancer_subnets(&self, public: bool) -> &[NetworkValue] {
        if self.load_balancer_is_public_side(public) {
            &self.public_subnets
        } else {
            &self.private_subnets
        }
    }

    /// Config key of the subnet list `load_balancer_subnets` picks.
    pub fn load_balancer_subnet_field(&self, public: bool) -> &'static str {
        if self.load_balancer_is_public_side(public) {
            "network.publicSubnetIds"
        } else {
            "network.privateSubnetIds"
        }
    }

    fn load_balancer_is_public_side(&self, public: bool) -> bool {
        public || self.private_subnets.is_empty()
    }

    /// Subnets for tasks, and whether tasks need a public IP to pull images.
    pub fn task_subnets(&self) -> (&[NetworkValue], bool) {
        if self.private_subnets.is_empty() {
            (&self.public_subnets, true)
        } else {
            (&self.private_subnets, false)
        }
    }
}

fn first_duplicate(values: &[NetworkValue]) -> Option<&NetworkValue> {
    values
        .iter()
        .enumerate()
        .find(|(i, v)| values[..*i].contains(v))
        .map(|(_, v)| v)
}
