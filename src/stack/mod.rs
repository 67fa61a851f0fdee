//! Compute stack: one ECS cluster plus one load-balanced Fargate service
//! with database credentials (and optionally one SSM parameter) injected as
//! secrets.
//!
//! `declare` only builds the resource graph. Creating, ordering and rolling
//! back resources is the engine's job; the graph returned here is checked
//! to be complete and acyclic so the engine can do it.

pub mod env;
pub mod fargate;

use crate::Result;
use crate::error::StackError;
use crate::model::intrinsic::{get_att, join};
use crate::model::{DependencyGraph, Output, Resource, Template};
use crate::spec::{ComputeStackProps, NetworkContext, SecretArn, ServiceParams};
use crate::stack::env::{credential_env_names, secret_environment};
use crate::stack::fargate::{FargateServiceDecl, ServiceIds};

use serde_json::{Value, json};
use std::collections::BTreeMap;

pub const CLUSTER_ID: &str = "Cluster";
pub const DNS_OUTPUT: &str = "LoadBalancerDNS";
pub const URL_OUTPUT: &str = "ServiceURL";

/// Minimum subnets an application load balancer accepts.
const MIN_LB_SUBNETS: usize = 2;

/// Public address of the service's load balancer.
///
/// Before deployment this is only an output expression; the address itself
/// exists once the engine reports the stack outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalancerEndpoint {
    pub output_key: String,
    pub load_balancer_id: String,
}

impl LoadBalancerEndpoint {
    pub fn expression(&self) -> Value {
        get_att(&self.load_balancer_id, "DNSName")
    }

    /// Address from deployed stack outputs; `None` unless non-empty.
    pub fn resolve<'a>(&self, outputs: &'a BTreeMap<String, String>) -> Option<&'a str> {
        outputs
            .get(&self.output_key)
            .map(String::as_str)
            .filter(|s| !s.trim().is_empty())
    }
}

/// Result of a successful declaration.
#[derive(Debug, Clone)]
pub struct Declared {
    pub template: Template,
    pub endpoint: LoadBalancerEndpoint,
    pub ids: ServiceIds,
    /// Injected environment variable names, in container order.
    pub secret_env: Vec<String>,
    /// Resource creation order the dependency graph implies.
    pub creation_order: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ComputeStack {
    description: Option<String>,
}

impl ComputeStack {
    pub fn new(description: Option<String>) -> Self {
        Self { description }
    }

    /// Declare from validated config props.
    pub fn from_props(props: &ComputeStackProps) -> Result<Declared> {
        Self::new(props.description.clone()).declare(
            &props.network,
            &props.db_secret,
            &props.params,
        )
    }

    /// Declare cluster, service, secret injection and the public endpoint.
    ///
    /// Fails before building anything when parameters or network placement
    /// are invalid.
    pub fn declare(
        &self,
        network: &NetworkContext,
        db_secret: &SecretArn,
        params: &ServiceParams,
    ) -> Result<Declared> {
        let _span = tracing::info_span!(
            "declare",
            construct = %params.construct_id,
            image = %params.container_image,
            secret = %db_secret
        )
        .entered();

        // 0) Validate before touching the template.
        params.validate(&credential_env_names())?;
        let lb_subnets = network.load_balancer_subnets(params.public_load_balancer);
        if lb_subnets.len() < MIN_LB_SUBNETS {
            return Err(StackError::validation(
                network.load_balancer_subnet_field(params.public_load_balancer),
                format!(
                    "load balancer needs at least {} subnets, got {}",
                    MIN_LB_SUBNETS,
                    lb_subnets.len()
                ),
            )
            .into());
        }
        if network.task_subnets().0.is_empty() {
            return Err(StackError::validation("network", "no subnets for tasks").into());
        }

        let mut template = Template::new(self.description.clone());

        // 1) Cluster.
        template.add(
            CLUSTER_ID,
            Resource::new("AWS::ECS::Cluster").prop(
                "ClusterName",
                params.cluster_name.clone().map(Value::from).unwrap_or(Value::Null),
            ),
        )?;

        // 2) Secret-backed environment.
        let secrets = secret_environment(db_secret, params.extra_parameter.as_ref())?;
        let secret_env: Vec<String> = secrets.iter().map(|s| s.name.clone()).collect();
        tracing::info!(env = ?secret_env, "injecting secret-backed environment");
        if let Some(extra) = &params.extra_parameter {
            tracing::debug!(
                parameter = %extra.reference,
                env = %extra.env_name,
                "extra parameter"
            );
        }

        // 3) Service, logging and load balancer.
        let ids = FargateServiceDecl {
            cluster_id: CLUSTER_ID,
            network,
            params,
            secrets: &secrets,
        }
        .declare(&mut template)?;

        // 4) Endpoint outputs.
        let endpoint = LoadBalancerEndpoint {
            output_key: DNS_OUTPUT.to_string(),
            load_balancer_id: ids.load_balancer.clone(),
        };
        template.add_output(
            DNS_OUTPUT,
            Output {
                description: Some("Public DNS name of the service load balancer".to_string()),
                value: endpoint.expression(),
            },
        )?;
        template.add_output(
            URL_OUTPUT,
            Output {
                description: Some("Service URL".to_string()),
                value: service_url(&endpoint, params.listener_port),
            },
        )?;

        // 5) The engine orders by references; make sure they hold.
        let graph = DependencyGraph::build(&template)?;
        tracing::info!(
            resources = template.resources.len(),
            load_balancer = %ids.load_balancer,
            "stack declared"
        );

        Ok(Declared {
            template,
            endpoint,
            ids,
            secret_env,
            creation_order: graph.order,
        })
    }
}

fn service_url(endpoint: &LoadBalancerEndpoint, listener_port: u16) -> Value {
    let mut parts = vec![json!("http://"), endpoint.expression()];
    if listener_port != 80 {
        parts.push(json!(format!(":{}", listener_port)));
    }
    join("", parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{NetworkSpec, ParameterRef};
    use pretty_assertions::assert_eq;

    const SECRET: &str = "arn:secret/pg-creds";

    fn vpc_a() -> NetworkContext {
        let spec: NetworkSpec = serde_json::from_value(json!({
            "vpcId": "VPC-A",
            "publicSubnetIds": ["subnet-pub-a", "subnet-pub-b"],
            "privateSubnetIds": ["subnet-priv-a", "subnet-priv-b"],
        }))
        .unwrap();
        spec.validate_and_build().unwrap()
    }

    fn secret() -> SecretArn {
        SecretArn::parse("dbSecretArn", SECRET).unwrap()
    }

    fn declare(params: &ServiceParams) -> Result<Declared> {
        ComputeStack::default().declare(&vpc_a(), &secret(), params)
    }

    fn container(d: &Declared) -> &Value {
        &d.template.resources[&d.ids.task_definition].properties["ContainerDefinitions"][0]
    }

    fn secret_names(d: &Declared) -> Vec<String> {
        container(d)["Secrets"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["Name"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn basic_scenario() {
        let d = declare(&ServiceParams::new("org/app", 4000)).unwrap();
        let t = &d.template;

        assert_eq!(t.count_of_type("AWS::ECS::Cluster"), 1);
        assert_eq!(t.count_of_type("AWS::ECS::Service"), 1);

        let service = &t.resources[&d.ids.service].properties;
        assert_eq!(service["DesiredCount"], json!(1));
        assert_eq!(service["LoadBalancers"][0]["ContainerPort"], json!(4000));
        assert_eq!(service["Cluster"], json!({ "Ref": "Cluster" }));

        let lb = &t.resources[&d.ids.load_balancer].properties;
        assert_eq!(lb["Scheme"], json!("internet-facing"));
        assert_eq!(lb["Subnets"], json!(["subnet-pub-a", "subnet-pub-b"]));

        assert_eq!(container(&d)["Image"], json!("org/app"));
        assert_eq!(
            secret_names(&d),
            vec![
                "POSTGRES_USER",
                "POSTGRES_PASS",
                "POSTGRES_HOST",
                "POSTGRES_PORT",
                "POSTGRES_NAME"
            ]
        );
        assert_eq!(d.secret_env, secret_names(&d));

        assert_eq!(
            t.outputs[DNS_OUTPUT].value,
            json!({ "Fn::GetAtt": ["FargateServiceLB", "DNSName"] })
        );
        assert_eq!(d.endpoint.expression(), t.outputs[DNS_OUTPUT].value);
    }

    #[test]
    fn extra_parameter_scenario() {
        let params = ServiceParams::new("org/app", 4000)
            .with_extra_parameter(ParameterRef::parse("p", "ssm:/DEMO_PARAMETER").unwrap());
        let d = declare(&params).unwrap();

        let names = secret_names(&d);
        assert_eq!(names.len(), 6);
        assert_eq!(names[5], "DEMO_PARAMETER");
        assert_eq!(
            container(&d)["Secrets"][5]["ValueFrom"],
            json!({
                "Fn::Sub":
                    "arn:${AWS::Partition}:ssm:${AWS::Region}:${AWS::AccountId}:parameter/DEMO_PARAMETER"
            })
        );

        let statements = &d.template.resources[&d.ids.execution_role_policy].properties
            ["PolicyDocument"]["Statement"];
        assert_eq!(statements.as_array().unwrap().len(), 3);
        assert_eq!(statements[1]["Resource"], json!([SECRET]));
        assert_eq!(statements[2]["Action"][1], json!("ssm:GetParameters"));
    }

    #[test]
    fn credentials_never_appear_as_plaintext_environment() {
        let d = declare(&ServiceParams::new("org/app", 4000)).unwrap();
        assert!(container(&d).get("Environment").is_none());

        let rendered = serde_json::to_string(&d.template).unwrap();
        for f in env::CREDENTIAL_FIELDS {
            assert!(rendered.contains(&format!("{}:{}::", SECRET, f.json_key)));
        }
    }

    #[test]
    fn identical_inputs_produce_identical_templates() {
        let params = ServiceParams::new("org/app", 4000);
        let a = declare(&params).unwrap();
        let b = declare(&params).unwrap();
        assert_eq!(a.template, b.template);
        assert_eq!(
            serde_json::to_string(&a.template).unwrap(),
            serde_json::to_string(&b.template).unwrap()
        );
    }

    #[test]
    fn names_are_engine_generated_unless_given() {
        let d = declare(&ServiceParams::new("org/app", 4000)).unwrap();
        assert!(d.template.resources[CLUSTER_ID].properties.get("ClusterName").is_none());
        assert!(d.template.resources[&d.ids.service].properties.get("ServiceName").is_none());

        let mut params = ServiceParams::new("org/app", 4000);
        params.cluster_name = Some("fargateClusterDemo".into());
        params.service_name = Some("fargateServiceDemo".into());
        let d = declare(&params).unwrap();
        assert_eq!(
            d.template.resources[CLUSTER_ID].properties["ClusterName"],
            json!("fargateClusterDemo")
        );
        assert_eq!(
            d.template.resources[&d.ids.service].properties["ServiceName"],
            json!("fargateServiceDemo")
        );
    }

    #[test]
    fn service_waits_for_listener_and_secret_access() {
        let d = declare(&ServiceParams::new("org/app", 4000)).unwrap();
        let pos = |id: &str| d.creation_order.iter().position(|x| x == id).unwrap();

        assert_eq!(d.creation_order.len(), d.template.resources.len());
        assert!(pos(CLUSTER_ID) < pos(&d.ids.service));
        assert!(pos(&d.ids.listener) < pos(&d.ids.service));
        assert!(pos(&d.ids.execution_role_policy) < pos(&d.ids.service));
        assert!(pos(&d.ids.log_group) < pos(&d.ids.task_definition));
    }

    #[test]
    fn internal_load_balancer_uses_private_subnets() {
        let mut params = ServiceParams::new("org/app", 4000);
        params.public_load_balancer = false;
        let d = declare(&params).unwrap();
        let lb = &d.template.resources[&d.ids.load_balancer].properties;
        assert_eq!(lb["Scheme"], json!("internal"));
        assert_eq!(lb["Subnets"], json!(["subnet-priv-a", "subnet-priv-b"]));
    }

    #[test]
    fn tasks_run_privately_when_private_subnets_exist() {
        let d = declare(&ServiceParams::new("org/app", 4000)).unwrap();
        let net = &d.template.resources[&d.ids.service].properties["NetworkConfiguration"]
            ["AwsvpcConfiguration"];
        assert_eq!(net["AssignPublicIp"], json!("DISABLED"));
        assert_eq!(net["Subnets"], json!(["subnet-priv-a", "subnet-priv-b"]));
    }

    #[test]
    fn invalid_params_fail_before_declaring() {
        let err = declare(&ServiceParams::new("", 4000)).unwrap_err();
        let err = err.downcast::<StackError>().unwrap();
        assert!(matches!(
            err,
            StackError::Validation { ref field, .. } if field == "context.containerImage"
        ));
    }

    #[test]
    fn load_balancer_needs_two_subnets() {
        let spec: NetworkSpec = serde_json::from_value(json!({
            "vpcId": "VPC-A",
            "publicSubnetIds": ["subnet-pub-a"],
        }))
        .unwrap();
        let network = spec.validate_and_build().unwrap();
        let err = ComputeStack::default()
            .declare(&network, &secret(), &ServiceParams::new("org/app", 4000))
            .unwrap_err();
        assert!(err.to_string().contains("at least 2 subnets"));
    }

    #[test]
    fn subnet_error_names_the_list_the_load_balancer_uses() {
        let spec: NetworkSpec = serde_json::from_value(json!({
            "vpcId": "VPC-A",
            "publicSubnetIds": ["subnet-pub-a"],
        }))
        .unwrap();
        let network = spec.validate_and_build().unwrap();
        let mut params = ServiceParams::new("org/app", 4000);
        params.public_load_balancer = false;

        let err = ComputeStack::default()
            .declare(&network, &secret(), &params)
            .unwrap_err();
        let err = err.downcast::<StackError>().unwrap();
        assert!(matches!(
            err,
            StackError::Validation { ref field, .. } if field == "network.publicSubnetIds"
        ));
    }

    #[test]
    fn endpoint_resolves_only_non_empty_outputs() {
        let d = declare(&ServiceParams::new("org/app", 4000)).unwrap();
        let mut outputs = BTreeMap::new();
        assert_eq!(d.endpoint.resolve(&outputs), None);

        outputs.insert(DNS_OUTPUT.to_string(), String::new());
        assert_eq!(d.endpoint.resolve(&outputs), None);

        outputs.insert(
            DNS_OUTPUT.to_string(),
            "Farga-Farga-1ABC.eu-west-1.elb.amazonaws.com".to_string(),
        );
        assert_eq!(
            d.endpoint.resolve(&outputs),
            Some("Farga-Farga-1ABC.eu-west-1.elb.amazonaws.com")
        );
    }

    #[test]
    fn service_url_includes_non_default_port() {
        let mut params = ServiceParams::new("org/app", 4000);
        params.listener_port = 8080;
        let d = declare(&params).unwrap();
        assert_eq!(
            d.template.outputs[URL_OUTPUT].value,
            json!({ "Fn::Join": ["", [
                "http://",
                { "Fn::GetAtt": ["FargateServiceLB", "DNSName"] },
                ":8080"
            ]] })
        );
    }

    #[test]
    fn log_retention_is_optional() {
        let d = declare(&ServiceParams::new("org/app", 4000)).unwrap();
        assert!(d.template.resources[&d.ids.log_group].properties.is_empty());

        let mut params = ServiceParams::new("org/app", 4000);
        params.log_retention_days = Some(14);
        let d = declare(&params).unwrap();
        assert_eq!(
            d.template.resources[&d.ids.log_group].properties["RetentionInDays"],
            json!(14)
        );
    }
}
