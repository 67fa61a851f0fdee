//! Load-balanced Fargate service resources.
//!
//! Expands one service declaration into the resources the engine needs:
//! log group, execution and task roles, task definition, security groups,
//! application load balancer with listener and target group, and the ECS
//! service itself.

use crate::Result;
use crate::model::intrinsic::{get_att, ref_};
use crate::model::{Resource, Template};
use crate::spec::{NetworkContext, NetworkValue, ServiceParams};
use crate::stack::env::{SecretEnv, SecretSource};

use serde_json::{Value, json};

pub const CONTAINER_NAME: &str = "web";

/// Logical ids of the resources one service declaration produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIds {
    pub log_group: String,
    pub execution_role: String,
    pub execution_role_policy: String,
    pub task_role: String,
    pub task_definition: String,
    pub lb_security_group: String,
    pub service_security_group: String,
    pub service_ingress: String,
    pub load_balancer: String,
    pub target_group: String,
    pub listener: String,
    pub service: String,
}

impl ServiceIds {
    pub fn new(construct_id: &str) -> Self {
        let id = |suffix: &str| format!("{}{}", construct_id, suffix);
        Self {
            log_group: id("LogGroup"),
            execution_role: id("ExecutionRole"),
            execution_role_policy: id("ExecutionRolePolicy"),
            task_role: id("TaskRole"),
            task_definition: id("TaskDefinition"),
            lb_security_group: id("LBSecurityGroup"),
            service_security_group: id("ServiceSecurityGroup"),
            service_ingress: id("ServiceSecurityGroupIngress"),
            load_balancer: id("LB"),
            target_group: id("TargetGroup"),
            listener: id("Listener"),
            service: id("Service"),
        }
    }
}

/// Everything needed to declare one service.
pub struct FargateServiceDecl<'a> {
    pub cluster_id: &'a str,
    pub network: &'a NetworkContext,
    pub params: &'a ServiceParams,
    pub secrets: &'a [SecretEnv],
}

impl FargateServiceDecl<'_> {
    pub fn declare(&self, template: &mut Template) -> Result<ServiceIds> {
        let ids = ServiceIds::new(&self.params.construct_id);

        self.declare_logging(template, &ids)?;
        self.declare_roles(template, &ids)?;
        self.declare_task_definition(template, &ids)?;
        self.declare_load_balancer(template, &ids)?;
        self.declare_service(template, &ids)?;

        Ok(ids)
    }

    fn declare_logging(&self, template: &mut Template, ids: &ServiceIds) -> Result<()> {
        let retention = self.params.log_retention_days.map(Value::from).unwrap_or(Value::Null);
        template.add(
            &ids.log_group,
            Resource::new("AWS::Logs::LogGroup").prop("RetentionInDays", retention),
        )
    }

    fn declare_roles(&self, template: &mut Template, ids: &ServiceIds) -> Result<()> {
        template.add(&ids.execution_role, ecs_tasks_role())?;
        template.add(&ids.task_role, ecs_tasks_role())?;

        let mut statements = vec![json!({
            "Effect": "Allow",
            "Action": ["logs:CreateLogStream", "logs:PutLogEvents"],
            "Resource": get_att(&ids.log_group, "Arn"),
        })];

        // Read access only to the exact secret and parameter injected.
        let mut secret_arns: Vec<Value> = Vec::new();
        let mut parameter_arns: Vec<Value> = Vec::new();
        for entry in self.secrets {
            match &entry.source {
                SecretSource::SecretField { secret, .. } => {
                    let arn = Value::String(secret.as_str().to_string());
                    if !secret_arns.contains(&arn) {
                        secret_arns.push(arn);
                    }
                }
                SecretSource::Parameter(p) => {
                    let arn = p.arn();
                    if !parameter_arns.contains(&arn) {
                        parameter_arns.push(arn);
                    }
                }
            }
        }
        if !secret_arns.is_empty() {
            statements.push(json!({
                "Effect": "Allow",
                "Action": ["secretsmanager:GetSecretValue", "secretsmanager:DescribeSecret"],
                "Resource": secret_arns,
            }));
        }
        if !parameter_arns.is_empty() {
            statements.push(json!({
                "Effect": "Allow",
                "Action": [
                    "ssm:DescribeParameters",
                    "ssm:GetParameters",
                    "ssm:GetParameter",
                    "ssm:GetParameterHistory"
                ],
                "Resource": parameter_arns,
            }));
        }

        template.add(
            &ids.execution_role_policy,
            Resource::new("AWS::IAM::Policy")
                .prop("PolicyName", json!(ids.execution_role_policy))
                .prop(
                    "PolicyDocument",
                    json!({ "Version": "2012-10-17", "Statement": statements }),
                )
                .prop("Roles", json!([ref_(&ids.execution_role)])),
        )
    }

    fn declare_task_definition(&self, template: &mut Template, ids: &ServiceIds) -> Result<()> {
        let p = self.params;
        let secrets: Vec<Value> = self.secrets.iter().map(SecretEnv::to_container_secret).collect();

        let container = json!({
            "Name": CONTAINER_NAME,
            "Image": p.container_image,
            "Essential": true,
            "PortMappings": [{ "ContainerPort": p.container_port, "Protocol": "tcp" }],
            "LogConfiguration": {
                "LogDriver": "awslogs",
                "Options": {
                    "awslogs-group": ref_(&ids.log_group),
                    "awslogs-stream-prefix": p.construct_id,
                    "awslogs-region": ref_("AWS::Region"),
                },
            },
            "Secrets": secrets,
        });

        template.add(
            &ids.task_definition,
            Resource::new("AWS::ECS::TaskDefinition")
                .prop("RequiresCompatibilities", json!(["FARGATE"]))
                .prop("NetworkMode", json!("awsvpc"))
                .prop("Cpu", json!(p.cpu.to_string()))
                .prop("Memory", json!(p.memory_mib.to_string()))
                .prop("ExecutionRoleArn", get_att(&ids.execution_role, "Arn"))
                .prop("TaskRoleArn", get_att(&ids.task_role, "Arn"))
                .prop("ContainerDefinitions", json!([container])),
        )
    }

    fn declare_load_balancer(&self, template: &mut Template, ids: &ServiceIds) -> Result<()> {
        let p = self.params;
        let vpc = self.network.vpc_id.to_value();

        template.add(
            &ids.lb_security_group,
            Resource::new("AWS::EC2::SecurityGroup")
                .prop(
                    "GroupDescription",
                    json!(format!("Load balancer for {}", p.construct_id)),
                )
                .prop("VpcId", vpc.clone())
                .prop(
                    "SecurityGroupIngress",
                    json!([{
                        "IpProtocol": "tcp",
                        "FromPort": p.listener_port,
                        "ToPort": p.listener_port,
                        "CidrIp": "0.0.0.0/0",
                        "Description": format!("Allow from anyone on port {}", p.listener_port),
                    }]),
                ),
        )?;

        template.add(
            &ids.service_security_group,
            Resource::new("AWS::EC2::SecurityGroup")
                .prop(
                    "GroupDescription",
                    json!(format!("Tasks of {}", p.construct_id)),
                )
                .prop("VpcId", vpc.clone()),
        )?;

        template.add(
            &ids.service_ingress,
            Resource::new("AWS::EC2::SecurityGroupIngress")
                .prop("GroupId", get_att(&ids.service_security_group, "GroupId"))
                .prop("SourceSecurityGroupId", get_att(&ids.lb_security_group, "GroupId"))
                .prop("IpProtocol", json!("tcp"))
                .prop("FromPort", json!(p.container_port))
                .prop("ToPort", json!(p.container_port))
                .prop("Description", json!("Load balancer to target")),
        )?;

        let scheme = if p.public_load_balancer {
            "internet-facing"
        } else {
            "internal"
        };
        template.add(
            &ids.load_balancer,
            Resource::new("AWS::ElasticLoadBalancingV2::LoadBalancer")
                .prop("Type", json!("application"))
                .prop("Scheme", json!(scheme))
                .prop(
                    "Subnets",
                    subnet_list(self.network.load_balancer_subnets(p.public_load_balancer)),
                )
                .prop(
                    "SecurityGroups",
                    json!([get_att(&ids.lb_security_group, "GroupId")]),
                )
                .prop(
                    "LoadBalancerAttributes",
                    json!([{ "Key": "deletion_protection.enabled", "Value": "false" }]),
                ),
        )?;

        template.add(
            &ids.target_group,
            Resource::new("AWS::ElasticLoadBalancingV2::TargetGroup")
                .prop("Port", json!(p.container_port))
                .prop("Protocol", json!("HTTP"))
                .prop("TargetType", json!("ip"))
                .prop("VpcId", vpc)
                .prop("HealthCheckPath", json!(p.health_check_path)),
        )?;

        template.add(
            &ids.listener,
            Resource::new("AWS::ElasticLoadBalancingV2::Listener")
                .prop("LoadBalancerArn", ref_(&ids.load_balancer))
                .prop("Port", json!(p.listener_port))
                .prop("Protocol", json!("HTTP"))
                .prop(
                    "DefaultActions",
                    json!([{ "Type": "forward", "TargetGroupArn": ref_(&ids.target_group) }]),
                ),
        )
    }

    fn declare_service(&self, template: &mut Template, ids: &ServiceIds) -> Result<()> {
        let p = self.params;
        let (task_subnets, assign_public_ip) = self.network.task_subnets();
        let assign_public_ip = if assign_public_ip { "ENABLED" } else { "DISABLED" };

        template.add(
            &ids.service,
            Resource::new("AWS::ECS::Service")
                .prop("Cluster", ref_(self.cluster_id))
                .prop("ServiceName", p.service_name.clone().map(Value::from).unwrap_or(Value::Null))
                .prop("LaunchType", json!("FARGATE"))
                .prop("DesiredCount", json!(p.desired_count))
                .prop("TaskDefinition", ref_(&ids.task_definition))
                .prop(
                    "DeploymentConfiguration",
                    json!({ "MaximumPercent": 200, "MinimumHealthyPercent": 50 }),
                )
                .prop("HealthCheckGracePeriodSeconds", json!(60))
                .prop("EnableECSManagedTags", json!(false))
                .prop(
                    "LoadBalancers",
                    json!([{
                        "ContainerName": CONTAINER_NAME,
                        "ContainerPort": p.container_port,
                        "TargetGroupArn": ref_(&ids.target_group),
                    }]),
                )
                .prop(
                    "NetworkConfiguration",
                    json!({
                        "AwsvpcConfiguration": {
                            "AssignPublicIp": assign_public_ip,
                            "SecurityGroups": [get_att(&ids.service_security_group, "GroupId")],
                            "Subnets": subnet_list(task_subnets),
                        }
                    }),
                )
                // Target group must be attached to a listener, and the
                // execution role must be able to read secrets, before tasks start.
                .depends_on(ids.listener.clone())
                .depends_on(ids.execution_role_policy.clone()),
        )
    }
}

fn ecs_tasks_role() -> Resource {
    Resource::new("AWS::IAM::Role").prop(
        "AssumeRolePolicyDocument",
        json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Principal": { "Service": "ecs-tasks.amazonaws.com" },
                "Action": "sts:AssumeRole",
            }],
        }),
    )
}

fn subnet_list(subnets: &[NetworkValue]) -> Value {
    Value::Array(subnets.iter().map(NetworkValue::to_value).collect())
}
