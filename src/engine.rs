//! Pass-through to the provisioning engine (CloudFormation via the `aws` CLI).
//!
//! The engine owns change sets, ordering, rollback and idempotent re-apply.
//! This module only hands it a rendered template, reports its failures
//! verbatim, and reads back the stack outputs.

use crate::Result;
use crate::error::StackError;
use crate::render::{Format, render_template};
use crate::stack::Declared;

use anyhow::Context;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::process::Command;

pub trait Provisioner {
    /// Create or update `stack_name` from a template file; returns once the
    /// engine reports a terminal state.
    fn deploy(&self, stack_name: &str, template_file: &Path) -> Result<()>;

    /// Output key -> value of a deployed stack.
    fn stack_outputs(&self, stack_name: &str) -> Result<BTreeMap<String, String>>;

    /// Delete the stack and wait for completion.
    fn destroy(&self, stack_name: &str) -> Result<()>;
}

/// `aws cloudformation ...` invocations.
#[derive(Debug, Clone)]
pub struct AwsCli {
    program: String,
    region: Option<String>,
    profile: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StackOutput {
    output_key: String,
    #[serde(default)]
    output_value: String,
}

impl AwsCli {
    pub fn new(region: Option<String>, profile: Option<String>) -> Self {
        Self {
            program: "aws".to_string(),
            region,
            profile,
        }
    }

    /// Use a different executable (e.g. a wrapper script).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn run(&self, stack_name: &str, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new(&self.program);
        if let Some(region) = &self.region {
            cmd.args(["--region", region]);
        }
        if let Some(profile) = &self.profile {
            cmd.args(["--profile", profile]);
        }
        cmd.args(args);

        tracing::debug!(program = %self.program, ?args, "invoking engine");
        let output = cmd
            .output()
            .with_context(|| format!("run {} (is the AWS CLI installed?)", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("engine exited with {}", output.status)
            } else {
                stderr
            };
            return Err(StackError::Provisioning {
                stack: stack_name.to_string(),
                message,
            }
            .into());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Provisioner for AwsCli {
    fn deploy(&self, stack_name: &str, template_file: &Path) -> Result<()> {
        let file = template_file.to_string_lossy();
        self.run(
            stack_name,
            &[
                "cloudformation",
                "deploy",
                "--stack-name",
                stack_name,
                "--template-file",
                &file,
                "--capabilities",
                "CAPABILITY_IAM",
                "--no-fail-on-empty-changeset",
            ],
        )?;
        Ok(())
    }

    fn stack_outputs(&self, stack_name: &str) -> Result<BTreeMap<String, String>> {
        let stdout = self.run(
            stack_name,
            &[
                "cloudformation",
                "describe-stacks",
                "--stack-name",
                stack_name,
                "--query",
                "Stacks[0].Outputs",
                "--output",
                "json",
            ],
        )?;
        parse_outputs(&stdout)
    }

    fn destroy(&self, stack_name: &str) -> Result<()> {
        self.run(
            stack_name,
            &["cloudformation", "delete-stack", "--stack-name", stack_name],
        )?;
        self.run(
            stack_name,
            &[
                "cloudformation",
                "wait",
                "stack-delete-complete",
                "--stack-name",
                stack_name,
            ],
        )?;
        Ok(())
    }
}

fn parse_outputs(stdout: &str) -> Result<BTreeMap<String, String>> {
    let trimmed = stdout.trim();
    // A stack without outputs prints `null`.
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(BTreeMap::new());
    }
    let outputs: Vec<StackOutput> =
        serde_json::from_str(trimmed).context("parse describe-stacks outputs")?;
    Ok(outputs
        .into_iter()
        .map(|o| (o.output_key, o.output_value))
        .collect())
}

/// Deploy a declared stack and return the load balancer address.
///
/// The address is only returned when the engine reports success and the
/// output is non-empty.
pub fn deploy(
    provisioner: &dyn Provisioner,
    stack_name: &str,
    declared: &Declared,
) -> Result<String> {
    let body = render_template(&declared.template, Format::Json)?;

    let mut file = tempfile::Builder::new()
        .prefix(stack_name)
        .suffix(&format!(".{}", Format::Json.extension()))
        .tempfile()
        .context("create template file")?;
    file.write_all(body.as_bytes()).context("write template file")?;
    file.flush()?;

    tracing::info!(stack = stack_name, "deploying");
    provisioner.deploy(stack_name, file.path())?;

    let outputs = provisioner.stack_outputs(stack_name)?;
    let address = declared
        .endpoint
        .resolve(&outputs)
        .ok_or_else(|| StackError::Provisioning {
            stack: stack_name.to_string(),
            message: format!("stack has no {} output", declared.endpoint.output_key),
        })?;
    tracing::info!(stack = stack_name, address, "deployed");
    Ok(address.to_string())
}
