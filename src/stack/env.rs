//! Secret-backed environment for the service container.
//!
//! Every entry becomes an item of the container definition's `Secrets` list
//! (`Name` + `ValueFrom`). The container agent resolves `ValueFrom` when
//! the task starts; no value is ever present in the template.

use crate::error::StackError;
use crate::spec::{ExtraParameter, ParameterRef, SecretArn};

use serde_json::{Value, json};

/// One credential field: env var name and JSON key inside the secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialField {
    pub env: &'static str,
    pub json_key: &'static str,
}

/// The structured database secret, as written by RDS-managed credentials.
pub const CREDENTIAL_FIELDS: [CredentialField; 5] = [
    CredentialField {
        env: "POSTGRES_USER",
        json_key: "username",
    },
    CredentialField {
        env: "POSTGRES_PASS",
        json_key: "password",
    },
    CredentialField {
        env: "POSTGRES_HOST",
        json_key: "host",
    },
    CredentialField {
        env: "POSTGRES_PORT",
        json_key: "port",
    },
    CredentialField {
        env: "POSTGRES_NAME",
        json_key: "dbname",
    },
];

pub fn credential_env_names() -> Vec<&'static str> {
    CREDENTIAL_FIELDS.iter().map(|f| f.env).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretSource {
    SecretField { secret: SecretArn, json_key: String },
    Parameter(ParameterRef),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretEnv {
    pub name: String,
    pub source: SecretSource,
}

impl SecretEnv {
    pub fn value_from(&self) -> Value {
        match &self.source {
            SecretSource::SecretField { secret, json_key } => {
                Value::String(secret.value_from_key(json_key))
            }
            SecretSource::Parameter(p) => p.arn(),
        }
    }

    /// Container definition `Secrets` item.
    pub fn to_container_secret(&self) -> Value {
        json!({ "Name": self.name, "ValueFrom": self.value_from() })
    }
}

/// Build the env mapping: five credential fields, plus the extra parameter
/// when configured. Names are unique.
pub fn secret_environment(
    db_secret: &SecretArn,
    extra: Option<&ExtraParameter>,
) -> Result<Vec<SecretEnv>, StackError> {
    let mut out: Vec<SecretEnv> = CREDENTIAL_FIELDS
        .iter()
        .map(|f| SecretEnv {
            name: f.env.to_string(),
            source: SecretSource::SecretField {
                secret: db_secret.clone(),
                json_key: f.json_key.to_string(),
            },
        })
        .collect();

    if let Some(extra) = extra {
        if out.iter().any(|e| e.name == extra.env_name) {
            return Err(StackError::validation(
                "context.extraParameterEnv",
                format!("{} is already used by a credential field", extra.env_name),
            ));
        }
        out.push(SecretEnv {
            name: extra.env_name.clone(),
            source: SecretSource::Parameter(extra.reference.clone()),
        });
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn secret() -> SecretArn {
        SecretArn::parse("dbSecretArn", "arn:secret/pg-creds").unwrap()
    }

    #[test]
    fn five_credential_entries_by_default() {
        let env = secret_environment(&secret(), None).unwrap();
        let names: Vec<&str> = env.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "POSTGRES_USER",
                "POSTGRES_PASS",
                "POSTGRES_HOST",
                "POSTGRES_PORT",
                "POSTGRES_NAME"
            ]
        );
        assert_eq!(
            env[4].to_container_secret(),
            json!({ "Name": "POSTGRES_NAME", "ValueFrom": "arn:secret/pg-creds:dbname::" })
        );
    }

    #[test]
    fn extra_parameter_adds_exactly_one_entry() {
        let extra = ExtraParameter {
            reference: ParameterRef::parse("p", "ssm:/DEMO_PARAMETER").unwrap(),
            env_name: "DEMO_PARAMETER".to_string(),
        };
        let env = secret_environment(&secret(), Some(&extra)).unwrap();
        assert_eq!(env.len(), 6);
        assert_eq!(env[5].name, "DEMO_PARAMETER");
        assert_eq!(env[5].source, SecretSource::Parameter(extra.reference.clone()));
    }

    #[test]
    fn extra_parameter_name_collision() {
        let extra = ExtraParameter {
            reference: ParameterRef::parse("p", "ssm:/x").unwrap(),
            env_name: "POSTGRES_HOST".to_string(),
        };
        assert!(secret_environment(&secret(), Some(&extra)).is_err());
    }
}
