//! Shared execution context with dotted-path access and template substitution.
//!
//! The context carries two layers: `data` (shared between nodes, including the
//! executor-reserved `nodes.<id>.output` subtree) and `variables` (template
//! scope). Lookups consult `data` first and fall back to `variables`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// `{{ dotted.key }}` with inner whitespace trimmed by the capture handling.
fn template_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{([^}]+)\}\}").unwrap())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Context {
    data: Map<String, Value>,
    variables: Map<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_data(data: Map<String, Value>) -> Self {
        Self {
            data,
            variables: Map::new(),
        }
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn variables(&self) -> &Map<String, Value> {
        &self.variables
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    /// Look up a dotted path, consulting `data` first and then `variables`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        lookup(&self.data, path).or_else(|| lookup(&self.variables, path))
    }

    pub fn has(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Set a dotted path in `data`, creating intermediate objects as needed.
    /// A non-object value in the middle of the path is replaced.
    pub fn set(&mut self, path: &str, value: Value) {
        let mut segments = path.split('.').peekable();
        let mut current = &mut self.data;
        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                current.insert(segment.to_string(), value);
                return;
            }
            let entry = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            current = entry.as_object_mut().unwrap();
        }
    }

    /// Remove a dotted path from `data`, returning the removed value.
    pub fn remove(&mut self, path: &str) -> Option<Value> {
        let (parent_path, leaf) = match path.rsplit_once('.') {
            Some((parent, leaf)) => (Some(parent), leaf),
            None => (None, path),
        };
        match parent_path {
            None => self.data.remove(leaf),
            Some(parent) => match lookup_mut(&mut self.data, parent) {
                Some(Value::Object(map)) => map.remove(leaf),
                _ => None,
            },
        }
    }

    /// Recursively deep-merge a map into `data`. Matching object keys merge;
    /// anything else is replaced by the incoming value.
    pub fn merge(&mut self, incoming: Map<String, Value>) {
        deep_merge(&mut self.data, incoming);
    }

    /// Substitute every `{{ key }}` occurrence via dotted lookup. Unresolved
    /// tokens are preserved verbatim, which makes the substitution idempotent.
    pub fn process_template(&self, template: &str) -> String {
        template_pattern()
            .replace_all(template, |caps: &regex::Captures<'_>| {
                let key = caps[1].trim();
                if key.is_empty() {
                    return caps[0].to_string();
                }
                match self.get(key) {
                    Some(value) => stringify(value),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    /// Deep-walk a value tree, substituting templates in every string leaf.
    pub fn process_templates(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.process_template(s)),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.process_templates(v)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.process_templates(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

/// Descend a dotted path through nested objects.
fn lookup<'a>(map: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = map.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn lookup_mut<'a>(map: &'a mut Map<String, Value>, path: &str) -> Option<&'a mut Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = map.get_mut(first)?;
    for segment in segments {
        current = current.as_object_mut()?.get_mut(segment)?;
    }
    Some(current)
}

/// Render a value for template substitution. Strings render raw, scalars via
/// display, and composites as compact JSON.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Recursive map-wise merge. Sequences are replaced, not concatenated.
pub fn deep_merge(target: &mut Map<String, Value>, incoming: Map<String, Value>) {
    for (key, value) in incoming {
        match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(new)) => {
                deep_merge(existing, new);
            }
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}
