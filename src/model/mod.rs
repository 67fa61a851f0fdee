//! Resource graph model: template document, intrinsic functions, and the
//! dependency graph the engine orders deployment by.

pub mod graph;
pub mod intrinsic;
pub mod template;

pub use graph::DependencyGraph;
pub use template::{Output, Resource, Template};
