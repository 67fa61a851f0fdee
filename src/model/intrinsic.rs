//! Intrinsic function builders and reference extraction.
//!
//! References are what the engine orders deployment by, so `references`
//! must find every Ref, Fn::GetAtt and Fn::Sub variable that names another
//! resource. Pseudo parameters (`AWS::Region`, ...) are not resources.

use regex::Regex;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::sync::LazyLock;

static SUB_VAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    // ${Name} or ${Name.Attr}; ${!Literal} is an escape and never matches.
    Regex::new(r"\$\{([A-Za-z0-9:]+)(?:\.[A-Za-z0-9.]+)?\}").expect("sub pattern is valid")
});

pub fn ref_(logical_id: &str) -> Value {
    json!({ "Ref": logical_id })
}

pub fn get_att(logical_id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [logical_id, attribute] })
}

pub fn sub(template: impl Into<String>) -> Value {
    json!({ "Fn::Sub": template.into() })
}

pub fn join(delimiter: &str, parts: Vec<Value>) -> Value {
    json!({ "Fn::Join": [delimiter, parts] })
}

pub fn import_value(export_name: &str) -> Value {
    json!({ "Fn::ImportValue": export_name })
}

/// Collect logical ids of resources referenced anywhere inside `value`.
pub fn references(value: &Value) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    collect(value, &mut out);
    out
}

fn collect(value: &Value, out: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(Value::String(target)) = map.get("Ref") {
                    push_target(target, out);
                    return;
                }
                if let Some(att) = map.get("Fn::GetAtt") {
                    match att {
                        Value::Array(parts) => {
                            if let Some(Value::String(target)) = parts.first() {
                                push_target(target, out);
                            }
                        }
                        Value::String(dotted) => {
                            if let Some((target, _)) = dotted.split_once('.') {
                                push_target(target, out);
                            }
                        }
                        _ => {}
                    }
                    return;
                }
                if let Some(body) = map.get("Fn::Sub") {
                    match body {
                        Value::String(s) => collect_sub(s, out),
                        // [template, { var: value }]: explicit vars shadow resources.
                        Value::Array(parts) => {
                            let locals: BTreeSet<&str> = parts
                                .get(1)
                                .and_then(Value::as_object)
                                .map(|m| m.keys().map(String::as_str).collect())
                                .unwrap_or_default();
                            if let Some(Value::String(s)) = parts.first() {
                                let mut found = BTreeSet::new();
                                collect_sub(s, &mut found);
                                out.extend(
                                    found.into_iter().filter(|v| !locals.contains(v.as_str())),
                                );
                            }
                            if let Some(vars) = parts.get(1) {
                                collect(vars, out);
                            }
                        }
                        _ => {}
                    }
                    return;
                }
            }
            for v in map.values() {
                collect(v, out);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect(v, out);
            }
        }
        _ => {}
    }
}

fn collect_sub(s: &str, out: &mut BTreeSet<String>) {
    for caps in SUB_VAR_RE.captures_iter(s) {
        if let Some(name) = caps.get(1) {
            push_target(name.as_str(), out);
        }
    }
}

fn push_target(target: &str, out: &mut BTreeSet<String>) {
    if !target.starts_with("AWS::") {
        out.insert(target.to_string());
    }
}
