use async_trait::async_trait;
use serde_json::{json, Map, Value};

use trelliscore::{Node, NodeContext, NodeDescriptor, NodeError, NodeResult, NodeSpec};
use trellisruntime::NodeFactory;

const OPERATIONS: [&str; 5] = ["pick", "rename", "template", "parseJson", "stringify"];

/// Data-shaping node: applies one named operation to its input payload.
pub struct TransformNode {
    config: Map<String, Value>,
}

impl TransformNode {
    pub fn new(config: Map<String, Value>) -> Self {
        Self { config }
    }

    /// The payload is the default `input` slot when present, otherwise the
    /// whole assembled input map.
    fn payload(ctx: &NodeContext) -> Value {
        match ctx.input.get("input") {
            Some(value) => value.clone(),
            None => Value::Object(ctx.input.clone()),
        }
    }
}

#[async_trait]
impl Node for TransformNode {
    fn node_type(&self) -> &str {
        "transform"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeResult, NodeError> {
        let operation_value = ctx.config_or("operation", json!("pick"));
        let operation = operation_value.as_str().unwrap_or("pick");
        let payload = Self::payload(&ctx);

        let data = match operation {
            "pick" => {
                let fields = ctx.require_config("fields")?;
                let fields = fields.as_array().ok_or_else(|| NodeError::InvalidInputType {
                    field: "fields".to_string(),
                    expected: "array".to_string(),
                    actual: type_name(fields).to_string(),
                })?;
                let source = payload.as_object().ok_or_else(|| NodeError::InvalidInputType {
                    field: "input".to_string(),
                    expected: "object".to_string(),
                    actual: type_name(&payload).to_string(),
                })?;
                let mut out = Map::new();
                for field in fields {
                    if let Some(name) = field.as_str() {
                        if let Some(value) = source.get(name) {
                            out.insert(name.to_string(), value.clone());
                        }
                    }
                }
                Value::Object(out)
            }
            "rename" => {
                let mapping = ctx.require_config("mapping")?;
                let mapping = mapping.as_object().ok_or_else(|| NodeError::InvalidInputType {
                    field: "mapping".to_string(),
                    expected: "object".to_string(),
                    actual: type_name(mapping).to_string(),
                })?;
                let source = payload.as_object().ok_or_else(|| NodeError::InvalidInputType {
                    field: "input".to_string(),
                    expected: "object".to_string(),
                    actual: type_name(&payload).to_string(),
                })?;
                let mut out = Map::new();
                for (key, value) in source {
                    let renamed = mapping
                        .get(key)
                        .and_then(Value::as_str)
                        .unwrap_or(key.as_str());
                    out.insert(renamed.to_string(), value.clone());
                }
                Value::Object(out)
            }
            "template" => {
                let template = ctx.require_config("template")?;
                let template = template.as_str().ok_or_else(|| NodeError::InvalidInputType {
                    field: "template".to_string(),
                    expected: "string".to_string(),
                    actual: type_name(template).to_string(),
                })?;
                json!({ "result": ctx.context.process_template(template) })
            }
            "parseJson" => {
                let text = payload.as_str().ok_or_else(|| NodeError::InvalidInputType {
                    field: "input".to_string(),
                    expected: "string".to_string(),
                    actual: type_name(&payload).to_string(),
                })?;
                serde_json::from_str(text)
                    .map_err(|e| NodeError::ExecutionFailed(format!("JSON parse error: {}", e)))?
            }
            "stringify" => {
                let text = serde_json::to_string_pretty(&payload).map_err(|e| {
                    NodeError::ExecutionFailed(format!("JSON stringify error: {}", e))
                })?;
                Value::String(text)
            }
            other => {
                return Err(NodeError::Configuration(format!(
                    "Unknown operation: {}",
                    other
                )))
            }
        };

        Ok(NodeResult::ok(data))
    }

    fn validate(&self) -> bool {
        let operation = self
            .config
            .get("operation")
            .and_then(Value::as_str)
            .unwrap_or("pick");
        if !OPERATIONS.contains(&operation) {
            return false;
        }
        match operation {
            "pick" => self.config.get("fields").is_some_and(Value::is_array),
            "rename" => self.config.get("mapping").is_some_and(Value::is_object),
            "template" => self.config.get("template").is_some_and(|v| v.is_string()),
            _ => true,
        }
    }

    fn describe(&self) -> NodeDescriptor {
        NodeDescriptor {
            description: "Shape data: pick/rename fields, render templates, parse/stringify JSON"
                .to_string(),
            category: "data".to_string(),
            icon: "shuffle".to_string(),
            input_schema: json!({ "input": "any" }),
            output_schema: json!({ "data": "depends on the operation" }),
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub struct TransformNodeFactory;

impl NodeFactory for TransformNodeFactory {
    fn node_type(&self) -> &str {
        "transform"
    }

    fn aliases(&self) -> Vec<&str> {
        vec!["map"]
    }

    fn create(&self, spec: &NodeSpec) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(TransformNode::new(spec.config.clone())))
    }

    fn descriptor(&self) -> NodeDescriptor {
        TransformNode::new(Map::new()).describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with(config: Value, input: Value) -> NodeContext {
        let mut ctx = NodeContext::new("t", "Transform");
        ctx.config = config.as_object().cloned().unwrap_or_default();
        ctx.input = input.as_object().cloned().unwrap_or_default();
        ctx
    }

    #[tokio::test]
    async fn pick_keeps_listed_fields() {
        let node = TransformNode::new(Map::new());
        let ctx = ctx_with(
            json!({"operation": "pick", "fields": ["a", "c"]}),
            json!({"input": {"a": 1, "b": 2, "c": 3}}),
        );
        let result = node.execute(ctx).await.unwrap();
        assert_eq!(result.data, json!({"a": 1, "c": 3}));
    }

    #[tokio::test]
    async fn rename_maps_keys() {
        let node = TransformNode::new(Map::new());
        let ctx = ctx_with(
            json!({"operation": "rename", "mapping": {"old": "new"}}),
            json!({"input": {"old": 1, "kept": 2}}),
        );
        let result = node.execute(ctx).await.unwrap();
        assert_eq!(result.data, json!({"new": 1, "kept": 2}));
    }

    #[tokio::test]
    async fn parse_and_stringify_roundtrip() {
        let node = TransformNode::new(Map::new());
        let ctx = ctx_with(
            json!({"operation": "parseJson"}),
            json!({"input": r#"{"x": 5}"#}),
        );
        let parsed = node.execute(ctx).await.unwrap();
        assert_eq!(parsed.data, json!({"x": 5}));

        let ctx = ctx_with(json!({"operation": "stringify"}), json!({"input": {"x": 5}}));
        let text = node.execute(ctx).await.unwrap();
        assert!(text.data.as_str().unwrap().contains("\"x\": 5"));
    }

    #[tokio::test]
    async fn template_renders_against_context() {
        let node = TransformNode::new(Map::new());
        let mut ctx = ctx_with(
            json!({"operation": "template", "template": "hello {{who}}"}),
            json!({}),
        );
        ctx.context.set("who", json!("world"));
        let result = node.execute(ctx).await.unwrap();
        assert_eq!(result.data, json!({"result": "hello world"}));
    }

    #[tokio::test]
    async fn unknown_operation_is_config_error() {
        let node = TransformNode::new(Map::new());
        let ctx = ctx_with(json!({"operation": "explode"}), json!({}));
        let err = node.execute(ctx).await.unwrap_err();
        assert!(matches!(err, NodeError::Configuration(_)));
    }

    #[test]
    fn validate_checks_operation_requirements() {
        let valid = TransformNode::new(
            json!({"operation": "pick", "fields": ["a"]})
                .as_object()
                .cloned()
                .unwrap(),
        );
        assert!(valid.validate());

        let missing = TransformNode::new(json!({"operation": "pick"}).as_object().cloned().unwrap());
        assert!(!missing.validate());

        let unknown =
            TransformNode::new(json!({"operation": "explode"}).as_object().cloned().unwrap());
        assert!(!unknown.validate());
    }
}
