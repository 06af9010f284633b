use std::collections::HashSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::WorkflowError;

/// Config key controlling whether a node failure aborts the run. Default true.
pub const CONFIG_STOP_ON_FAIL: &str = "stopWorkflowOnFail";
/// Config key selecting inline or pooled execution. Default `"sync"`.
pub const CONFIG_EXECUTION_MODE: &str = "executionMode";

/// Default output slot name for connections.
pub fn default_output() -> String {
    "output".to_string()
}

/// Default input slot name for connections.
pub fn default_input() -> String {
    "input".to_string()
}

/// Complete workflow definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl Workflow {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            nodes: Vec::new(),
            connections: Vec::new(),
        }
    }

    pub fn add_node(&mut self, node: NodeSpec) -> &mut Self {
        self.nodes.push(node);
        self
    }

    /// Connect two nodes on the default `output`/`input` slots.
    pub fn connect(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.connect_ports(from, default_output(), to, default_input())
    }

    pub fn connect_ports(
        &mut self,
        from: impl Into<String>,
        from_output: impl Into<String>,
        to: impl Into<String>,
        to_input: impl Into<String>,
    ) -> &mut Self {
        self.connections.push(Connection {
            from: from.into(),
            from_output: from_output.into(),
            to: to.into(),
            to_input: to_input.into(),
        });
        self
    }

    pub fn find_node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Structural validation: node ids are unique and non-empty, connection
    /// endpoints exist, and core config keys parse.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if node.id.is_empty() {
                return Err(WorkflowError::Invalid(format!(
                    "node '{}' has an empty id",
                    node.name
                )));
            }
            if !seen.insert(node.id.as_str()) {
                return Err(WorkflowError::Invalid(format!(
                    "duplicate node id '{}'",
                    node.id
                )));
            }
        }
        for conn in &self.connections {
            if self.find_node(&conn.from).is_none() {
                return Err(WorkflowError::InvalidConnection(format!(
                    "connection source '{}' does not exist",
                    conn.from
                )));
            }
            if self.find_node(&conn.to).is_none() {
                return Err(WorkflowError::InvalidConnection(format!(
                    "connection target '{}' does not exist",
                    conn.to
                )));
            }
        }
        for node in &self.nodes {
            node.execution_mode()?;
        }
        Ok(())
    }
}

/// Node specification in a workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeSpec {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl NodeSpec {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        let node_type = node_type.into();
        Self {
            id: id.into(),
            name: format!("{} Node", node_type),
            node_type,
            config: Map::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Whether a failure of this node aborts the whole run. Defaults to true.
    pub fn stop_on_fail(&self) -> bool {
        self.config
            .get(CONFIG_STOP_ON_FAIL)
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }

    /// Inline or pooled execution. Defaults to sync; anything else in the
    /// config key is a configuration error surfaced at validation time.
    pub fn execution_mode(&self) -> Result<ExecutionMode, WorkflowError> {
        match self.config.get(CONFIG_EXECUTION_MODE) {
            None => Ok(ExecutionMode::Sync),
            Some(Value::String(s)) => ExecutionMode::from_str(s).map_err(|_| {
                WorkflowError::Configuration(format!(
                    "node '{}': invalid executionMode '{}'",
                    self.id, s
                ))
            }),
            Some(other) => Err(WorkflowError::Configuration(format!(
                "node '{}': executionMode must be a string, got {}",
                self.id, other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Sync,
    Async,
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync" => Ok(ExecutionMode::Sync),
            "async" => Ok(ExecutionMode::Async),
            other => Err(format!("unknown execution mode: {}", other)),
        }
    }
}

/// Directed edge from one node's output slot to another node's input slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub from: String,
    pub to: String,
    #[serde(default = "default_output")]
    pub from_output: String,
    #[serde(default = "default_input")]
    pub to_input: String,
}
