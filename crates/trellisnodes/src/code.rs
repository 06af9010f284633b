use async_trait::async_trait;
use serde_json::{json, Map, Value};

use trelliscore::{Node, NodeContext, NodeDescriptor, NodeError, NodeResult, NodeSpec};
use trellisruntime::NodeFactory;

/// Expression node: evaluates a JEXL expression against the node's input and
/// the shared context. Payloads are always passed as context objects, never
/// interpolated into the expression string.
pub struct CodeNode {
    config: Map<String, Value>,
}

impl CodeNode {
    pub fn new(config: Map<String, Value>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Node for CodeNode {
    fn node_type(&self) -> &str {
        "code"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeResult, NodeError> {
        let expression = ctx
            .require_config("expression")?
            .as_str()
            .ok_or_else(|| NodeError::Configuration("expression must be a string".to_string()))?
            .to_string();

        let scope = json!({
            "input": ctx.input,
            "data": ctx.context.data(),
            "variables": ctx.context.variables(),
        });

        let evaluator = jexl_eval::Evaluator::new();
        let value = evaluator
            .eval_in_context(&expression, &scope)
            .map_err(|e| NodeError::ExecutionFailed(format!("expression failed: {}", e)))?;

        Ok(NodeResult::ok(value))
    }

    fn validate(&self) -> bool {
        self.config
            .get("expression")
            .and_then(Value::as_str)
            .is_some_and(|e| !e.trim().is_empty())
    }

    fn describe(&self) -> NodeDescriptor {
        NodeDescriptor {
            description: "Evaluate a JEXL expression over input and context".to_string(),
            category: "logic".to_string(),
            icon: "code".to_string(),
            input_schema: json!({ "input": "any, exposed as `input`" }),
            output_schema: json!({ "data": "the expression's value" }),
        }
    }
}

pub struct CodeNodeFactory;

impl NodeFactory for CodeNodeFactory {
    fn node_type(&self) -> &str {
        "code"
    }

    fn aliases(&self) -> Vec<&str> {
        vec!["script"]
    }

    fn create(&self, spec: &NodeSpec) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(CodeNode::new(spec.config.clone())))
    }

    fn descriptor(&self) -> NodeDescriptor {
        CodeNode::new(Map::new()).describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with_expression(expression: &str) -> NodeContext {
        let mut ctx = NodeContext::new("code", "Code");
        ctx.config
            .insert("expression".to_string(), json!(expression));
        ctx
    }

    #[tokio::test]
    async fn evaluates_arithmetic_over_input() {
        let node = CodeNode::new(Map::new());
        let mut ctx = ctx_with_expression("input.a + input.b");
        ctx.input.insert("a".to_string(), json!(2));
        ctx.input.insert("b".to_string(), json!(3));

        let result = node.execute(ctx).await.unwrap();
        assert_eq!(result.data, json!(5.0));
    }

    #[tokio::test]
    async fn reads_shared_context_data() {
        let node = CodeNode::new(Map::new());
        let mut ctx = ctx_with_expression("data.user.name");
        ctx.context.set("user", json!({"name": "ada"}));

        let result = node.execute(ctx).await.unwrap();
        assert_eq!(result.data, json!("ada"));
    }

    #[tokio::test]
    async fn broken_expression_fails_execution() {
        let node = CodeNode::new(Map::new());
        let ctx = ctx_with_expression("((");
        let err = node.execute(ctx).await.unwrap_err();
        assert!(matches!(err, NodeError::ExecutionFailed(_)));
    }

    #[test]
    fn validate_requires_expression() {
        assert!(!CodeNode::new(Map::new()).validate());
        let mut config = Map::new();
        config.insert("expression".to_string(), json!("1 + 1"));
        assert!(CodeNode::new(config).validate());
    }
}
