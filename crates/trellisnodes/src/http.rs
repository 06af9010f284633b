use async_trait::async_trait;
use serde_json::{json, Map, Value};

use trelliscore::{Node, NodeContext, NodeDescriptor, NodeError, NodeResult, NodeSpec};
use trellisruntime::NodeFactory;

const SUPPORTED_METHODS: [&str; 5] = ["GET", "POST", "PUT", "PATCH", "DELETE"];

/// HTTP request node
pub struct HttpNode {
    client: reqwest::Client,
    config: Map<String, Value>,
}

impl HttpNode {
    pub fn new(config: Map<String, Value>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl Node for HttpNode {
    fn node_type(&self) -> &str {
        "http"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeResult, NodeError> {
        // the url may come from resolved config or an upstream node
        let url = ctx
            .config
            .get("url")
            .or_else(|| ctx.input.get("url"))
            .and_then(Value::as_str)
            .ok_or_else(|| NodeError::MissingInput("url".to_string()))?
            .to_string();

        let method_value = ctx.config_or("method", json!("GET"));
        let method = method_value.as_str().unwrap_or("GET").to_uppercase();
        if !SUPPORTED_METHODS.contains(&method.as_str()) {
            return Err(NodeError::Configuration(format!(
                "Unsupported method: {}",
                method
            )));
        }

        let mut request = match method.as_str() {
            "GET" => self.client.get(&url),
            "POST" => self.client.post(&url),
            "PUT" => self.client.put(&url),
            "PATCH" => self.client.patch(&url),
            _ => self.client.delete(&url),
        };

        if let Some(Value::Object(headers)) = ctx.config.get("headers") {
            for (key, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(key, value);
                }
            }
        }

        if let Some(body) = ctx.input.get("body").or_else(|| ctx.config.get("body")) {
            request = match body {
                Value::String(text) => request.body(text.clone()),
                other => request.json(other),
            };
        }

        let response = request
            .send()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("HTTP request failed: {}", e)))?;

        let status = response.status().as_u16();
        let headers: Map<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.to_string(),
                    Value::String(v.to_str().unwrap_or("").to_string()),
                )
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("Failed to read response: {}", e)))?;

        let mut data = json!({
            "status": status,
            "body": body,
            "headers": headers,
        });
        if let Ok(parsed) = serde_json::from_str::<Value>(&body) {
            data["json"] = parsed;
        }

        let mut result = NodeResult::ok(data);
        result.log(
            trelliscore::LogLevel::Info,
            format!("{} {} -> {}", method, url, status),
        );
        Ok(result)
    }

    fn validate(&self) -> bool {
        if let Some(method) = self.config.get("method") {
            let Some(method) = method.as_str() else {
                return false;
            };
            if !SUPPORTED_METHODS.contains(&method.to_uppercase().as_str()) {
                return false;
            }
        }
        match self.config.get("headers") {
            None => true,
            Some(headers) => headers.is_object(),
        }
    }

    fn describe(&self) -> NodeDescriptor {
        NodeDescriptor {
            description: "Make HTTP requests".to_string(),
            category: "network".to_string(),
            icon: "globe".to_string(),
            input_schema: json!({
                "url": "string (optional when configured)",
                "body": "string | object",
            }),
            output_schema: json!({
                "status": "number",
                "body": "string",
                "headers": "object",
                "json": "parsed body when the response is JSON",
            }),
        }
    }
}

pub struct HttpNodeFactory;

impl NodeFactory for HttpNodeFactory {
    fn node_type(&self) -> &str {
        "http"
    }

    fn aliases(&self) -> Vec<&str> {
        vec!["httpRequest", "api"]
    }

    fn create(&self, spec: &NodeSpec) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(HttpNode::new(spec.config.clone())))
    }

    fn descriptor(&self) -> NodeDescriptor {
        HttpNode::new(Map::new()).describe()
    }

    fn default_config(&self) -> Map<String, Value> {
        let mut defaults = Map::new();
        defaults.insert("method".to_string(), json!("GET"));
        defaults
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn validate_rejects_bad_method_and_headers() {
        assert!(HttpNode::new(config(&[("method", json!("GET"))])).validate());
        assert!(HttpNode::new(config(&[("method", json!("post"))])).validate());
        assert!(!HttpNode::new(config(&[("method", json!("TELEPORT"))])).validate());
        assert!(!HttpNode::new(config(&[("headers", json!("nope"))])).validate());
    }

    #[tokio::test]
    async fn missing_url_is_an_input_error() {
        let node = HttpNode::new(Map::new());
        let err = node.execute(NodeContext::new("n", "n")).await.unwrap_err();
        assert!(matches!(err, NodeError::MissingInput(_)));
    }

    #[tokio::test]
    async fn unsupported_method_errors_before_sending() {
        let node = HttpNode::new(Map::new());
        let mut ctx = NodeContext::new("n", "n");
        ctx.config.insert("url".to_string(), json!("http://127.0.0.1:1"));
        ctx.config.insert("method".to_string(), json!("TELEPORT"));
        let err = node.execute(ctx).await.unwrap_err();
        assert!(matches!(err, NodeError::Configuration(_)));
    }
}
