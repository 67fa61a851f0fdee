//! Template rendering for the provisioning engine.

use crate::Result;
use crate::model::Template;

use anyhow::Context;
use clap::ValueEnum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Format {
    #[default]
    Json,
    Yaml,
}

impl Format {
    pub fn extension(self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Yaml => "yaml",
        }
    }
}

/// Render a template document. Output ends with a newline.
pub fn render_template(template: &Template, format: Format) -> Result<String> {
    let mut out = match format {
        Format::Json => serde_json::to_string_pretty(template).context("render template as JSON")?,
        Format::Yaml => serde_yaml::to_string(template).context("render template as YAML")?,
    };
    if !out.ends_with('\n') {
        out.push('\n');
    }
    Ok(out)
}
