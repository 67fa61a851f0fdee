//! Dependency graph over template resources.
//!
//! Edges come from intrinsic references in properties plus explicit
//! `DependsOn`. The engine orders creation by these edges, so a template is
//! only deployable when every edge lands on a declared resource and the
//! graph is acyclic.

use crate::Result;
use crate::model::Template;
use crate::model::intrinsic::references;

use anyhow::{Context, bail};
use std::collections::BTreeMap;

/// Validated dependency graph: resource -> resources it depends on.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    pub depends_on: BTreeMap<String, Vec<String>>,
    /// Creation order: every resource appears after its dependencies.
    pub order: Vec<String>,
}

impl DependencyGraph {
    /// Build and validate the graph:
    /// - every Ref/GetAtt/Sub/DependsOn target is declared
    /// - outputs only reference declared resources
    /// - no cycles
    pub fn build(template: &Template) -> Result<Self> {
        // 1) Collect edges.
        let mut depends_on = BTreeMap::<String, Vec<String>>::new();
        for (id, resource) in &template.resources {
            let mut deps = references(&serde_json::Value::Object(resource.properties.clone()));
            deps.extend(resource.depends_on.iter().cloned());
            deps.remove(id.as_str());

            for dep in &deps {
                if !template.resources.contains_key(dep) {
                    bail!("resource {} references undeclared resource {}", id, dep);
                }
            }
            depends_on.insert(id.clone(), deps.into_iter().collect());
        }

        for (key, output) in &template.outputs {
            for dep in references(&output.value) {
                if !template.resources.contains_key(&dep) {
                    bail!("output {} references undeclared resource {}", key, dep);
                }
            }
        }

        // 2) Cycle detection (DFS coloring), emitting post-order as creation order.
        #[derive(Copy, Clone, PartialEq, Eq)]
        enum Mark {
            Temp,
            Perm,
        }

        fn dfs(
            v: &str,
            depends_on: &BTreeMap<String, Vec<String>>,
            marks: &mut BTreeMap<String, Mark>,
            stack: &mut Vec<String>,
            order: &mut Vec<String>,
        ) -> Result<()> {
            if let Some(Mark::Perm) = marks.get(v) {
                return Ok(());
            }
            if let Some(Mark::Temp) = marks.get(v) {
                // v is in the current recursion stack => cycle
                stack.push(v.to_string());
                bail!("dependency cycle in template: {}", stack.join(" -> "));
            }

            marks.insert(v.to_string(), Mark::Temp);
            stack.push(v.to_string());

            if let Some(deps) = depends_on.get(v) {
                for d in deps {
                    dfs(d, depends_on, marks, stack, order)?;
                }
            }

            stack.pop();
            marks.insert(v.to_string(), Mark::Perm);
            order.push(v.to_string());
            Ok(())
        }

        let mut marks = BTreeMap::<String, Mark>::new();
        let mut stack = Vec::<String>::new();
        let mut order = Vec::<String>::new();
        for id in depends_on.keys() {
            stack.clear();
            dfs(id, &depends_on, &mut marks, &mut stack, &mut order)
                .with_context(|| format!("dependency check failed starting at {}", id))?;
        }

        Ok(Self { depends_on, order })
    }

    /// Position of `id` in creation order.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.order.iter().position(|x| x == id)
    }
}
