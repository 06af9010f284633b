use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::context::Context;
use crate::error::NodeError;
use crate::log::{LogLevel, NodeLog};

/// Core trait that all executable nodes implement
#[async_trait]
pub trait Node: Send + Sync {
    /// Unique type identifier (e.g., "http", "transform")
    fn node_type(&self) -> &str;

    /// Execute the node with given context. A returned `Err` is captured by
    /// the executor and converted into a failed [`NodeResult`].
    async fn execute(&self, ctx: NodeContext) -> Result<NodeResult, NodeError>;

    /// Validate configuration at workflow build time
    fn validate(&self) -> bool {
        true
    }

    /// Human-facing description of the node kind
    fn describe(&self) -> NodeDescriptor {
        NodeDescriptor::default()
    }
}

/// Execution context passed to each node invocation. All fields are value
/// snapshots; node implementations never see (or mutate) live executor state.
#[derive(Debug, Clone)]
pub struct NodeContext {
    /// Node instance id within the workflow
    pub node_id: String,

    /// Human label from the workflow definition
    pub node_name: String,

    /// Input values assembled from upstream connections
    pub input: Map<String, Value>,

    /// Node configuration with templates already resolved
    pub config: Map<String, Value>,

    /// Snapshot of the shared context at dispatch time
    pub context: Context,
}

impl NodeContext {
    pub fn new(node_id: impl Into<String>, node_name: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            node_name: node_name.into(),
            input: Map::new(),
            config: Map::new(),
            context: Context::new(),
        }
    }

    /// Get required input or return error
    pub fn require_input(&self, name: &str) -> Result<&Value, NodeError> {
        self.input
            .get(name)
            .ok_or_else(|| NodeError::MissingInput(name.to_string()))
    }

    /// Get config value or return error
    pub fn require_config(&self, name: &str) -> Result<&Value, NodeError> {
        self.config
            .get(name)
            .ok_or_else(|| NodeError::Configuration(format!("Missing config: {}", name)))
    }

    /// Get config with default
    pub fn config_or(&self, name: &str, default: Value) -> Value {
        self.config.get(name).cloned().unwrap_or(default)
    }
}

/// Outcome of a single node invocation. Exactly one of the success/failure
/// branches is meaningful: `error` only when `success` is false.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResult {
    pub success: bool,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<NodeLog>,
}

impl NodeResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
            logs: Vec::new(),
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(error.into()),
            logs: Vec::new(),
        }
    }

    pub fn with_log(mut self, level: LogLevel, message: impl Into<String>) -> Self {
        self.logs.push(NodeLog::new(level, message));
        self
    }

    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        self.logs.push(NodeLog::new(level, message));
    }
}

/// Metadata about a node kind
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDescriptor {
    pub description: String,
    pub category: String,
    pub icon: String,
    pub input_schema: Value,
    pub output_schema: Value,
}

impl Default for NodeDescriptor {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
            icon: "node".to_string(),
            input_schema: Value::Object(Map::new()),
            output_schema: Value::Object(Map::new()),
        }
    }
}
