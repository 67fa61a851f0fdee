//! Declarative Fargate compute stack.
//!
//! Turns a stack config (network, database secret, service parameters) into a
//! CloudFormation template describing one ECS cluster and one load-balanced
//! Fargate service whose credentials are injected from Secrets Manager and
//! SSM Parameter Store at container start.
//!
//! Layers:
//! - `spec`: raw config (serde) + validation into typed props
//! - `model`: resource graph, intrinsics, dependency checks
//! - `stack`: the compute stack declaration itself
//! - `render`: template serialization
//! - `engine`: pass-through to the provisioning engine

pub mod engine;
pub mod error;
pub mod model;
pub mod render;
pub mod spec;
pub mod stack;

pub use error::StackError;
pub use stack::{ComputeStack, Declared, LoadBalancerEndpoint};

pub type Result<T> = anyhow::Result<T>;
