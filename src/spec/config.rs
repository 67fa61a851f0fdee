//! Stack config loading.
//!
//! The config file is JSON or YAML (picked by extension). `-c key=value`
//! overrides land in the `context` object before deserialization, so a
//! key set on the command line wins over the file, like CDK context.

use crate::Result;
use crate::spec::{ContextSpec, StackSpec};

use anyhow::{Context, bail};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

/// Context keys whose values are taken verbatim, never parsed as JSON.
const STRING_KEYS: &[&str] = &[
    "containerImage",
    "clusterName",
    "serviceName",
    "extraParameterRef",
    "extraParameterEnv",
    "healthCheckPath",
    "serviceConstructId",
];

/// One `key=value` context override.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextOverride {
    pub key: String,
    pub value: Value,
}

impl ContextOverride {
    /// Parse `key=value`. String-typed keys keep the raw text; other values
    /// are JSON when they parse as JSON (`4000`, `true`), otherwise a string.
    pub fn parse(raw: &str) -> Result<Self> {
        let Some((key, value)) = raw.split_once('=') else {
            bail!("context override must be key=value: {:?}", raw);
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("context override has an empty key: {:?}", raw);
        }
        let value = if STRING_KEYS.contains(&key) {
            Value::String(value.to_string())
        } else {
            serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()))
        };
        Ok(Self {
            key: key.to_string(),
            value,
        })
    }
}

/// Read a stack config file and apply overrides.
pub fn load_stack_spec(path: &Path, overrides: &[ContextOverride]) -> Result<StackSpec> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("read stack config {}", path.display()))?;

    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    let doc: Value = if is_yaml {
        serde_yaml::from_str(&text).with_context(|| format!("parse YAML {}", path.display()))?
    } else {
        serde_json::from_str(&text).with_context(|| format!("parse JSON {}", path.display()))?
    };

    parse_stack_spec(doc, overrides)
        .with_context(|| format!("invalid stack config {}", path.display()))
}

/// Apply overrides to an already-parsed document and deserialize it.
pub fn parse_stack_spec(mut doc: Value, overrides: &[ContextOverride]) -> Result<StackSpec> {
    let Some(root) = doc.as_object_mut() else {
        bail!("stack config must be an object");
    };

    if !overrides.is_empty() {
        let context = root
            .entry("context")
            .or_insert_with(|| Value::Object(Map::new()));
        let Some(context) = context.as_object_mut() else {
            bail!("stack config 'context' must be an object");
        };
        for o in overrides {
            check_override(o)?;
            tracing::debug!(key = %o.key, "context override");
            context.insert(o.key.clone(), o.value.clone());
        }
    }

    Ok(serde_json::from_value(doc)?)
}

/// Deserialize one override on its own so a bad key or type names the key.
fn check_override(o: &ContextOverride) -> Result<()> {
    let single = Value::Object(Map::from_iter([(o.key.clone(), o.value.clone())]));
    serde_json::from_value::<ContextSpec>(single)
        .with_context(|| format!("context override {}", o.key))?;
    Ok(())
}
