//! Template references inside prompt text.
//!
//! `{{nodes.<id>}}` and `{{steps.<id>}}`, optionally followed by `.<path>`,
//! reference another node's output. Dependency inference only needs the id;
//! path resolution here is what conditions and the rendering helpers use.
//! `{{loop.iteration}}` and `{{loop.pass}}` expose the innermost loop counters.

use std::{collections::BTreeMap, sync::LazyLock};

use regex::Regex;
use serde_json::Value;

use crate::{Result, StepflowError, runtime::NodeOutput, workflow::node::NodeId};

/// Format: `{{nodes.id}}`, `{{steps.id.path.to.value}}`, `{{loop.iteration}}`
const TEMPLATE_PATTERN: &str = r"\{\{\s*(?:(?:nodes|steps)\.([A-Za-z0-9_-]+)(?:\.([^{}\s]+))?|loop\.(iteration|pass))\s*\}\}";

static TEMPLATE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(TEMPLATE_PATTERN).expect("template pattern is a valid regex"));

/// Loop counters visible to templates evaluated inside a loop region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopVars {
    pub iteration: u32,
    pub pass: u32,
}

/// Values a template can see: prior node outputs plus loop counters.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    outputs: &'a BTreeMap<NodeId, NodeOutput>,
    loop_vars: Option<LoopVars>,
}

impl<'a> Scope<'a> {
    pub fn new(outputs: &'a BTreeMap<NodeId, NodeOutput>) -> Self {
        Self {
            outputs,
            loop_vars: None,
        }
    }

    pub fn with_loop(
        mut self,
        loop_vars: Option<LoopVars>,
    ) -> Self {
        self.loop_vars = loop_vars;
        self
    }
}

/// Node ids referenced by `text`, deduplicated, in order of first appearance.
pub fn references(text: &str) -> Vec<NodeId> {
    let mut ids: Vec<NodeId> = Vec::new();
    for caps in TEMPLATE_RE.captures_iter(text) {
        if let Some(id) = caps.get(1) {
            if !ids.iter().any(|seen| seen == id.as_str()) {
                ids.push(id.as_str().to_string());
            }
        }
    }
    ids
}

/// Resolves a selector to a JSON value.
///
/// A selector that is exactly one template expression yields that value
/// unchanged; text mixing templates and literals is rendered to a string;
/// plain text is returned as a string. `None` when a referenced value is
/// missing.
pub fn resolve_value(
    scope: &Scope<'_>,
    selector: &str,
) -> Option<Value> {
    let trimmed = selector.trim();
    if let Some(caps) = TEMPLATE_RE.captures(trimmed) {
        if caps.get(0).map(|m| m.as_str().len()) == Some(trimmed.len()) {
            return lookup(scope, &caps);
        }
    }
    resolve_template(scope, selector).ok().map(Value::String)
}

/// Resolve every template expression in `template`.
/// Returns error if any expression cannot be resolved.
pub fn resolve_template(
    scope: &Scope<'_>,
    template: &str,
) -> Result<String> {
    let mut errors: Vec<String> = Vec::new();
    let result = TEMPLATE_RE.replace_all(template, |caps: &regex::Captures<'_>| match lookup(scope, caps) {
        Some(value) => stringify(&value),
        None => {
            errors.push(format!("variable '{}' not found", &caps[0]));
            String::new()
        }
    });

    if !errors.is_empty() {
        return Err(StepflowError::Run(errors.join(", ")));
    }

    Ok(result.into_owned())
}

/// Like [`resolve_template`], but unresolved expressions render as empty text.
pub fn render_lenient(
    scope: &Scope<'_>,
    template: &str,
) -> String {
    TEMPLATE_RE.replace_all(template, |caps: &regex::Captures<'_>| lookup(scope, caps).map(|v| stringify(&v)).unwrap_or_default()).into_owned()
}

fn lookup(
    scope: &Scope<'_>,
    caps: &regex::Captures<'_>,
) -> Option<Value> {
    if let Some(counter) = caps.get(3) {
        let vars = scope.loop_vars?;
        let n = if counter.as_str() == "iteration" { vars.iteration } else { vars.pass };
        return Some(Value::from(n));
    }

    let output = scope.outputs.get(caps.get(1)?.as_str())?;
    match caps.get(2) {
        None => output.json.clone().or_else(|| output.text.clone().map(Value::String)),
        Some(path) => lookup_path(output, path.as_str()),
    }
}

fn lookup_path(
    output: &NodeOutput,
    path: &str,
) -> Option<Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let root = match first {
        "output" | "text" => return output.text.clone().map(Value::String),
        "artifact" => return output.artifact_id.clone().map(Value::String),
        "json" => output.json.clone()?,
        key => navigate(output.json.as_ref()?, key)?,
    };

    let mut current = root;
    for key in segments {
        current = navigate(&current, key)?;
    }
    Some(current)
}

fn navigate(
    value: &Value,
    key: &str,
) -> Option<Value> {
    match value {
        Value::Object(map) => map.get(key).cloned(),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i).cloned()),
        _ => None,
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        // For objects/arrays, use JSON string
        v => v.to_string(),
    }
}
