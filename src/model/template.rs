//! CloudFormation template document.
//!
//! Resources and outputs are kept in BTreeMaps so the rendered template is
//! stable across runs: identical inputs produce byte-identical output.

use crate::Result;

use anyhow::bail;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::LazyLock;

pub const FORMAT_VERSION: &str = "2010-09-09";

static LOGICAL_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9]{1,255}$").expect("logical id pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub resources: BTreeMap<String, Resource>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Output>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Resource {
    #[serde(rename = "Type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,

    /// Explicit ordering edges beyond what Ref/GetAtt already imply.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Output {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub value: Value,
}

impl Resource {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            properties: Map::new(),
            depends_on: Vec::new(),
        }
    }

    /// Set a property, skipping `null` so optional settings stay absent.
    pub fn prop(mut self, key: &str, value: Value) -> Self {
        if !value.is_null() {
            self.properties.insert(key.to_string(), value);
        }
        self
    }

    pub fn depends_on(mut self, logical_id: impl Into<String>) -> Self {
        self.depends_on.push(logical_id.into());
        self
    }
}

impl Template {
    pub fn new(description: Option<String>) -> Self {
        Self {
            format_version: FORMAT_VERSION.to_string(),
            description,
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Add a resource under `logical_id`.
    ///
    /// Logical ids must be alphanumeric and unique within the template.
    pub fn add(&mut self, logical_id: &str, resource: Resource) -> Result<()> {
        validate_logical_id(logical_id)?;
        if self.resources.contains_key(logical_id) {
            bail!("duplicate logical id in template: {}", logical_id);
        }
        tracing::debug!(logical_id, kind = %resource.kind, "declared resource");
        self.resources.insert(logical_id.to_string(), resource);
        Ok(())
    }

    pub fn add_output(&mut self, key: &str, output: Output) -> Result<()> {
        validate_logical_id(key)?;
        if self.outputs.insert(key.to_string(), output).is_some() {
            bail!("duplicate output key in template: {}", key);
        }
        Ok(())
    }

    /// Logical ids of all resources of the given type, sorted.
    pub fn ids_of_type(&self, kind: &str) -> Vec<&str> {
        self.resources
            .iter()
            .filter(|(_, r)| r.kind == kind)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn count_of_type(&self, kind: &str) -> usize {
        self.ids_of_type(kind).len()
    }
}

fn validate_logical_id(id: &str) -> Result<()> {
    if !LOGICAL_ID_RE.is_match(id) {
        bail!(
            "logical id must be 1-255 alphanumeric characters: {:?}",
            id
        );
    }
    Ok(())
}
