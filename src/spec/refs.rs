//! Locators for the secret store and the parameter store.
//!
//! Both are opaque: nothing here reads a secret or parameter value. A locator
//! only turns into the `ValueFrom` string the container agent resolves at
//! task start, and into the IAM resource the execution role may read.
//!
//! Accepted secret form: any `arn:` string. When it looks like a full
//! Secrets Manager ARN (`arn:<partition>:secretsmanager:<region>:<account>:secret:<name>`)
//! the service and resource type are checked too.
//!
//! Accepted parameter forms:
//!   ssm:/DEMO_PARAMETER      ssm:DEMO_PARAMETER
//!   /DEMO_PARAMETER          DEMO_PARAMETER
//!   arn:aws:ssm:eu-west-1:123456789012:parameter/DEMO_PARAMETER

use crate::error::StackError;
use crate::model::intrinsic::sub;

use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::sync::LazyLock;

static PARAM_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/?[A-Za-z0-9_.\-]+(?:/[A-Za-z0-9_.\-]+)*$")
        .expect("parameter name pattern is valid")
});

/// Complete ARN of a Secrets Manager secret holding JSON credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretArn(String);

impl SecretArn {
    pub fn parse(field: &str, raw: &str) -> Result<Self, StackError> {
        let s = raw.trim();
        if s.is_empty() {
            return Err(StackError::reference(field, raw, "secret locator is empty"));
        }
        if !s.starts_with("arn:") {
            return Err(StackError::reference(field, raw, "secret locator must be an ARN"));
        }
        if s.chars().any(char::is_whitespace) {
            return Err(StackError::reference(field, raw, "secret ARN contains whitespace"));
        }
        if s.ends_with(':') {
            return Err(StackError::reference(field, raw, "secret ARN has a trailing ':'"));
        }

        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() >= 6 {
            if parts[2] != "secretsmanager" {
                return Err(StackError::reference(
                    field,
                    raw,
                    format!("ARN names service '{}', expected 'secretsmanager'", parts[2]),
                ));
            }
            if parts.get(5) != Some(&"secret") {
                return Err(StackError::reference(field, raw, "ARN does not name a secret"));
            }
            if parts.get(6).is_none_or(|name| name.is_empty()) {
                return Err(StackError::reference(field, raw, "secret ARN has no secret name"));
            }
            // Field selectors are appended per credential; the locator must be bare.
            if parts.len() > 7 {
                return Err(StackError::reference(
                    field,
                    raw,
                    "ARN already carries a JSON key selector",
                ));
            }
        }

        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `ValueFrom` selecting one JSON key of the secret (latest version).
    pub fn value_from_key(&self, json_key: &str) -> String {
        format!("{}:{}::", self.0, json_key)
    }
}

impl fmt::Display for SecretArn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Locator of a (SecureString) parameter in SSM Parameter Store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterRef {
    /// Parameter in the deploying account and region, by name.
    Name(String),
    /// Fully qualified parameter ARN.
    Arn(String),
}

impl ParameterRef {
    pub fn parse(field: &str, raw: &str) -> Result<Self, StackError> {
        let s = raw.trim();
        if s.is_empty() {
            return Err(StackError::reference(field, raw, "parameter locator is empty"));
        }

        if s.starts_with("arn:") {
            let parts: Vec<&str> = s.splitn(6, ':').collect();
            let resource = parts.get(5).copied().unwrap_or_default();
            if parts.len() != 6 || parts[2] != "ssm" || !resource.starts_with("parameter/") {
                return Err(StackError::reference(
                    field,
                    raw,
                    "parameter ARN must look like arn:<partition>:ssm:<region>:<account>:parameter/<name>",
                ));
            }
            let name = &resource["parameter".len()..];
            if !PARAM_NAME_RE.is_match(name) {
                return Err(StackError::reference(field, raw, "parameter ARN has an invalid name"));
            }
            return Ok(Self::Arn(s.to_string()));
        }

        let name = s.strip_prefix("ssm:").unwrap_or(s);
        if name.is_empty() || !PARAM_NAME_RE.is_match(name) {
            return Err(StackError::reference(
                field,
                raw,
                "parameter name may only contain letters, digits, '_', '.', '-' and '/' separators",
            ));
        }
        if name.len() > 2048 {
            return Err(StackError::reference(field, raw, "parameter name is too long"));
        }
        Ok(Self::Name(name.to_string()))
    }

    /// Parameter name as stored (leading '/' preserved when hierarchical).
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) => name,
            Self::Arn(arn) => arn
                .split_once(":parameter")
                .map(|(_, n)| n)
                .unwrap_or(arn),
        }
    }

    /// ARN of the parameter; a `Fn::Sub` over pseudo parameters for bare names.
    pub fn arn(&self) -> Value {
        match self {
            Self::Arn(arn) => Value::String(arn.clone()),
            Self::Name(name) => {
                let path = if name.starts_with('/') {
                    name.clone()
                } else {
                    format!("/{}", name)
                };
                let prefix = "arn:${AWS::Partition}:ssm:${AWS::Region}:${AWS::AccountId}:parameter";
                sub(format!("{}{}", prefix, path))
            }
        }
    }

    /// Environment variable name derived from the last path segment,
    /// e.g. `/app/db-url` -> `DB_URL`.
    pub fn default_env_name(&self) -> String {
        let last = self
            .name()
            .rsplit('/')
            .find(|seg| !seg.is_empty())
            .unwrap_or_default();
        let mut env: String = last
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        if env.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            env.insert(0, '_');
        }
        env
    }
}

impl fmt::Display for ParameterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "ssm:{}", name),
            Self::Arn(arn) => f.write_str(arn),
        }
    }
}
