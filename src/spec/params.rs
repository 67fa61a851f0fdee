//! Service parameters: the `context` section of the stack config.
//!
//! JSON shape (keys match the CDK context keys the stacks were driven by):
//! {
//!   "containerImage": "org/app",       // required
//!   "containerPort": 4000,             // required
//!   "desiredCount": 1,
//!   "publicLoadBalancer": true,
//!   "clusterName": "fargateClusterDemo",
//!   "serviceName": "fargateServiceDemo",
//!   "extraParameterRef": "ssm:/DEMO_PARAMETER",
//!   "extraParameterEnv": "DEMO_PARAMETER",
//!   "cpu": 256,
//!   "memoryLimitMiB": 512,
//!   "listenerPort": 80,
//!   "healthCheckPath": "/",
//!   "logRetentionDays": 14,
//!   "serviceConstructId": "FargateService"
//! }

use crate::error::StackError;
use crate::spec::refs::ParameterRef;

use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

pub const DEFAULT_CONSTRUCT_ID: &str = "FargateService";
pub const MAX_DESIRED_COUNT: u32 = 1000;

static ENV_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("env name pattern is valid"));
static RESOURCE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,255}$").expect("name pattern is valid"));
static CONSTRUCT_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9]{0,63}$").expect("construct id pattern is valid")
});

/// CloudWatch Logs retention values the service accepts.
const LOG_RETENTION_DAYS: &[u32] = &[
    1, 3, 5, 7, 14, 30, 60, 90, 120, 150, 180, 365, 400, 545, 731, 1096, 1827, 2192, 2557, 2922,
    3288, 3653,
];

/// Raw `context` section; every key optional so missing values become
/// validation errors naming the key instead of serde errors.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContextSpec {
    #[serde(default)]
    pub container_image: Option<String>,
    #[serde(default)]
    pub container_port: Option<i64>,
    #[serde(default)]
    pub desired_count: Option<i64>,
    #[serde(default)]
    pub public_load_balancer: Option<bool>,
    #[serde(default)]
    pub cluster_name: Option<String>,
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default)]
    pub extra_parameter_ref: Option<String>,
    #[serde(default)]
    pub extra_parameter_env: Option<String>,
    #[serde(default)]
    pub cpu: Option<u32>,
    #[serde(default, rename = "memoryLimitMiB")]
    pub memory_limit_mib: Option<u32>,
    #[serde(default)]
    pub listener_port: Option<i64>,
    #[serde(default)]
    pub health_check_path: Option<String>,
    #[serde(default)]
    pub log_retention_days: Option<u32>,
    #[serde(default)]
    pub service_construct_id: Option<String>,
}

/// Extra SSM parameter injected next to the credential fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraParameter {
    pub reference: ParameterRef,
    pub env_name: String,
}

/// Validated service parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceParams {
    pub container_image: String,
    pub container_port: u16,
    pub desired_count: u32,
    pub public_load_balancer: bool,
    pub cluster_name: Option<String>,
    pub service_name: Option<String>,
    pub extra_parameter: Option<ExtraParameter>,
    pub cpu: u32,
    pub memory_mib: u32,
    pub listener_port: u16,
    pub health_check_path: String,
    pub log_retention_days: Option<u32>,
    pub construct_id: String,
}

impl ServiceParams {
    /// Parameters with the pattern defaults: one replica, public load
    /// balancer on port 80, 0.25 vCPU / 512 MiB.
    pub fn new(container_image: impl Into<String>, container_port: u16) -> Self {
        Self {
            container_image: container_image.into(),
            container_port,
            desired_count: 1,
            public_load_balancer: true,
            cluster_name: None,
            service_name: None,
            extra_parameter: None,
            cpu: 256,
            memory_mib: 512,
            listener_port: 80,
            health_check_path: "/".to_string(),
            log_retention_days: None,
            construct_id: DEFAULT_CONSTRUCT_ID.to_string(),
        }
    }

    /// Inject `reference` under its derived environment name.
    pub fn with_extra_parameter(mut self, reference: ParameterRef) -> Self {
        let env_name = reference.default_env_name();
        self.extra_parameter = Some(ExtraParameter {
            reference,
            env_name,
        });
        self
    }

    /// Check every value the engine would otherwise reject mid-deployment.
    ///
    /// `reserved_env` holds env names already taken by credential entries.
    pub fn validate(&self, reserved_env: &[&str]) -> Result<(), StackError> {
        let image = self.container_image.trim();
        if image.is_empty() {
            return Err(StackError::validation("context.containerImage", "is required"));
        }
        if image.len() != self.container_image.len() || image.chars().any(char::is_whitespace) {
            return Err(StackError::validation(
                "context.containerImage",
                "must not contain whitespace",
            ));
        }
        if self.container_port == 0 {
            return Err(StackError::validation("context.containerPort", "must be 1-65535"));
        }
        if self.listener_port == 0 {
            return Err(StackError::validation("context.listenerPort", "must be 1-65535"));
        }
        if self.desired_count > MAX_DESIRED_COUNT {
            return Err(StackError::validation(
                "context.desiredCount",
                format!("must be at most {}", MAX_DESIRED_COUNT),
            ));
        }

        for (field, name) in [
            ("context.clusterName", &self.cluster_name),
            ("context.serviceName", &self.service_name),
        ] {
            if let Some(name) = name {
                if !RESOURCE_NAME_RE.is_match(name) {
                    return Err(StackError::validation(
                        field,
                        "must be 1-255 letters, digits, '-' or '_'",
                    ));
                }
            }
        }

        if !CONSTRUCT_ID_RE.is_match(&self.construct_id) {
            return Err(StackError::validation(
                "context.serviceConstructId",
                "must start with a letter and be at most 64 alphanumeric characters",
            ));
        }

        if !fargate_size_supported(self.cpu, self.memory_mib) {
            return Err(StackError::validation(
                "context.memoryLimitMiB",
                format!(
                    "{} MiB is not a valid Fargate memory size for {} cpu units",
                    self.memory_mib, self.cpu
                ),
            ));
        }

        if !self.health_check_path.starts_with('/') {
            return Err(StackError::validation(
                "context.healthCheckPath",
                "must start with '/'",
            ));
        }

        if let Some(days) = self.log_retention_days {
            if !LOG_RETENTION_DAYS.contains(&days) {
                return Err(StackError::validation(
                    "context.logRetentionDays",
                    format!("{} is not an allowed retention period", days),
                ));
            }
        }

        if let Some(extra) = &self.extra_parameter {
            if !ENV_NAME_RE.is_match(&extra.env_name) {
                return Err(StackError::validation(
                    "context.extraParameterEnv",
                    format!("{:?} is not a valid environment variable name", extra.env_name),
                ));
            }
            if reserved_env.contains(&extra.env_name.as_str()) {
                return Err(StackError::validation(
                    "context.extraParameterEnv",
                    format!("{} is already used by a credential field", extra.env_name),
                ));
            }
        }

        Ok(())
    }
}

impl ContextSpec {
    /// Apply defaults, convert numeric ranges, and validate.
    pub fn validate_and_build(&self, reserved_env: &[&str]) -> Result<ServiceParams, StackError> {
        let image = self
            .container_image
            .clone()
            .ok_or_else(|| StackError::validation("context.containerImage", "is required"))?;
        let port = self
            .container_port
            .ok_or_else(|| StackError::validation("context.containerPort", "is required"))?;
        let port = to_port("context.containerPort", port)?;

        let mut params = ServiceParams::new(image, port);

        if let Some(count) = self.desired_count {
            params.desired_count = u32::try_from(count).map_err(|_| {
                StackError::validation("context.desiredCount", "must not be negative")
            })?;
        }
        if let Some(public) = self.public_load_balancer {
            params.public_load_balancer = public;
        }
        params.cluster_name = self.cluster_name.clone();
        params.service_name = self.service_name.clone();

        if let Some(raw) = &self.extra_parameter_ref {
            let reference = ParameterRef::parse("context.extraParameterRef", raw)?;
            params = params.with_extra_parameter(reference);
            if let (Some(extra), Some(env)) =
                (params.extra_parameter.as_mut(), &self.extra_parameter_env)
            {
                extra.env_name = env.clone();
            }
        } else if self.extra_parameter_env.is_some() {
            return Err(StackError::validation(
                "context.extraParameterEnv",
                "set without context.extraParameterRef",
            ));
        }

        if let Some(cpu) = self.cpu {
            params.cpu = cpu;
        }
        if let Some(mem) = self.memory_limit_mib {
            params.memory_mib = mem;
        }
        if let Some(port) = self.listener_port {
            params.listener_port = to_port("context.listenerPort", port)?;
        }
        if let Some(path) = &self.health_check_path {
            params.health_check_path = path.clone();
        }
        params.log_retention_days = self.log_retention_days;
        if let Some(id) = &self.service_construct_id {
            params.construct_id = id.clone();
        }

        params.validate(reserved_env)?;
        Ok(params)
    }
}

fn to_port(field: &str, value: i64) -> Result<u16, StackError> {
    match u16::try_from(value) {
        Ok(p) if p > 0 => Ok(p),
        _ => Err(StackError::validation(field, "must be 1-65535")),
    }
}

/// Fargate task size table (cpu units -> allowed memory in MiB).
fn fargate_size_supported(cpu: u32, memory_mib: u32) -> bool {
    let (min, max, step) = match cpu {
        256 => return matches!(memory_mib, 512 | 1024 | 2048),
        512 => (1024, 4096, 1024),
        1024 => (2048, 8192, 1024),
        2048 => (4096, 16384, 1024),
        4096 => (8192, 30720, 1024),
        8192 => (16384, 61440, 4096),
        16384 => (32768, 122880, 8192),
        _ => return false,
    };
    (min..=max).contains(&memory_mib) && (memory_mib - min) % step == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const RESERVED: &[&str] = &["POSTGRES_USER", "POSTGRES_PASS"];

    fn build(v: serde_json::Value) -> Result<ServiceParams, StackError> {
        let spec: ContextSpec = serde_json::from_value(v).unwrap();
        spec.validate_and_build(RESERVED)
    }

    fn field_of(err: StackError) -> String {
        match err {
            StackError::Validation { field, .. } | StackError::Reference { field, .. } => field,
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn defaults_follow_the_pattern() {
        let p = build(json!({ "containerImage": "org/app", "containerPort": 4000 })).unwrap();
        assert_eq!(p, ServiceParams::new("org/app", 4000));
        assert_eq!(p.desired_count, 1);
        assert!(p.public_load_balancer);
        assert_eq!((p.cpu, p.memory_mib), (256, 512));
        assert_eq!(p.construct_id, "FargateService");
    }

    #[test]
    fn extra_parameter_env_defaults_to_parameter_name() {
        let p = build(json!({
            "containerImage": "org/app",
            "containerPort": 4000,
            "extraParameterRef": "ssm:/DEMO_PARAMETER",
        }))
        .unwrap();
        let extra = p.extra_parameter.unwrap();
        assert_eq!(extra.env_name, "DEMO_PARAMETER");
        assert_eq!(extra.reference, ParameterRef::Name("/DEMO_PARAMETER".into()));

        let p = build(json!({
            "containerImage": "org/app",
            "containerPort": 4000,
            "extraParameterRef": "ssm:/DEMO_PARAMETER",
            "extraParameterEnv": "FEATURE_FLAG",
        }))
        .unwrap();
        assert_eq!(p.extra_parameter.unwrap().env_name, "FEATURE_FLAG");
    }

    #[test]
    fn missing_required_values() {
        assert_eq!(
            field_of(build(json!({ "containerPort": 4000 })).unwrap_err()),
            "context.containerImage"
        );
        assert_eq!(
            field_of(build(json!({ "containerImage": "org/app" })).unwrap_err()),
            "context.containerPort"
        );
        assert_eq!(
            field_of(build(json!({ "containerImage": "  ", "containerPort": 4000 })).unwrap_err()),
            "context.containerImage"
        );
    }

    #[test]
    fn out_of_range_values() {
        for (patch, field) in [
            (json!({ "containerPort": 0 }), "context.containerPort"),
            (json!({ "containerPort": 70000 }), "context.containerPort"),
            (json!({ "desiredCount": -1 }), "context.desiredCount"),
            (json!({ "desiredCount": 1001 }), "context.desiredCount"),
            (json!({ "listenerPort": -80 }), "context.listenerPort"),
            (json!({ "cpu": 256, "memoryLimitMiB": 4096 }), "context.memoryLimitMiB"),
            (json!({ "cpu": 300 }), "context.memoryLimitMiB"),
            (json!({ "logRetentionDays": 10 }), "context.logRetentionDays"),
            (json!({ "healthCheckPath": "health" }), "context.healthCheckPath"),
            (json!({ "clusterName": "bad name" }), "context.clusterName"),
            (json!({ "serviceName": "" }), "context.serviceName"),
            (json!({ "serviceConstructId": "9lives" }), "context.serviceConstructId"),
        ] {
            let mut v = json!({ "containerImage": "org/app", "containerPort": 4000 });
            for (k, val) in patch.as_object().unwrap() {
                v[k] = val.clone();
            }
            let err = build(v).unwrap_err();
            assert_eq!(field_of(err), field, "patch {patch}");
        }
    }

    #[test]
    fn extra_parameter_cannot_shadow_credentials() {
        let err = build(json!({
            "containerImage": "org/app",
            "containerPort": 4000,
            "extraParameterRef": "ssm:/x",
            "extraParameterEnv": "POSTGRES_USER",
        }))
        .unwrap_err();
        assert!(err.to_string().contains("already used by a credential field"));

        let err = build(json!({
            "containerImage": "org/app",
            "containerPort": 4000,
            "extraParameterEnv": "ORPHAN",
        }))
        .unwrap_err();
        assert_eq!(field_of(err), "context.extraParameterEnv");
    }

    #[test]
    fn unknown_context_keys_are_rejected() {
        let res: Result<ContextSpec, _> =
            serde_json::from_value(json!({ "containerImage": "x", "containerPrt": 1 }));
        assert!(res.is_err());
    }

    #[test]
    fn fargate_sizes() {
        assert!(fargate_size_supported(256, 2048));
        assert!(fargate_size_supported(1024, 3072));
        assert!(!fargate_size_supported(1024, 1024));
        assert!(fargate_size_supported(8192, 20480));
        assert!(!fargate_size_supported(8192, 18432));
        assert!(!fargate_size_supported(128, 512));
    }
}
