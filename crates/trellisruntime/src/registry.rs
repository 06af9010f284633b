//! Named node factories with alias resolution.
//!
//! The registry is a single map from lookup names (primary types and aliases)
//! to factories. Lookup priority: exact match, then case-insensitive exact
//! match, then substring match over registered names.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use uuid::Uuid;

use trelliscore::{deep_merge, Node, NodeDescriptor, NodeError, NodeSpec, WorkflowError};

/// Factory trait for creating node instances
pub trait NodeFactory: Send + Sync {
    /// Primary type identifier (e.g., "http", "transform")
    fn node_type(&self) -> &str;

    /// Alternative lookup names resolving to this factory
    fn aliases(&self) -> Vec<&str> {
        Vec::new()
    }

    /// Create a new instance of the node for the given spec
    fn create(&self, spec: &NodeSpec) -> Result<Box<dyn Node>, NodeError>;

    /// Metadata shown by tooling
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::default()
    }

    /// Configuration defaults merged under the caller's config
    fn default_config(&self) -> Map<String, Value> {
        Map::new()
    }
}

/// Registry of available node types
#[derive(Default)]
pub struct NodeRegistry {
    factories: HashMap<String, Arc<dyn NodeFactory>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under its primary type and all aliases, replacing
    /// any existing mapping.
    pub fn register(&mut self, factory: Arc<dyn NodeFactory>) {
        tracing::debug!(node_type = factory.node_type(), "registering node type");
        for name in lookup_names(factory.as_ref()) {
            self.factories.insert(name, Arc::clone(&factory));
        }
    }

    /// Like [`register`](Self::register) but fails on any name collision.
    pub fn register_strict(&mut self, factory: Arc<dyn NodeFactory>) -> Result<(), WorkflowError> {
        for name in lookup_names(factory.as_ref()) {
            if self.factories.contains_key(&name) {
                return Err(WorkflowError::AlreadyRegistered(name));
            }
        }
        self.register(factory);
        Ok(())
    }

    /// Resolve a type name: exact, case-insensitive, then substring.
    pub fn find(&self, node_type: &str) -> Option<Arc<dyn NodeFactory>> {
        if let Some(factory) = self.factories.get(node_type) {
            return Some(Arc::clone(factory));
        }
        let wanted = node_type.to_lowercase();
        let mut names: Vec<&String> = self.factories.keys().collect();
        names.sort();
        if let Some(name) = names.iter().find(|n| n.to_lowercase() == wanted) {
            return self.factories.get(*name).cloned();
        }
        names
            .iter()
            .find(|n| n.to_lowercase().contains(&wanted))
            .and_then(|name| self.factories.get(*name).cloned())
    }

    /// Create a node from a type name and a bare config map. Fills in a
    /// generated id and the default `"<type> Node"` name, merges the caller
    /// config over the factory defaults, then validates the instance.
    pub fn create(
        &self,
        node_type: &str,
        config: Map<String, Value>,
    ) -> Result<(NodeSpec, Box<dyn Node>), WorkflowError> {
        let spec = NodeSpec {
            id: Uuid::new_v4().to_string(),
            name: format!("{} Node", node_type),
            node_type: node_type.to_string(),
            config,
        };
        self.create_from_spec(&spec)
    }

    /// Create a node instance for a workflow node spec. Returns the spec with
    /// the factory's defaults merged under its config alongside the instance;
    /// the executor runs the node against that merged spec.
    pub fn create_from_spec(
        &self,
        spec: &NodeSpec,
    ) -> Result<(NodeSpec, Box<dyn Node>), WorkflowError> {
        let factory = self
            .find(&spec.node_type)
            .ok_or_else(|| WorkflowError::UnknownNodeType(spec.node_type.clone()))?;

        let mut merged = spec.clone();
        let mut config = factory.default_config();
        deep_merge(&mut config, merged.config);
        merged.config = config;

        let node = factory
            .create(&merged)
            .map_err(|e| WorkflowError::Invalid(format!("failed to create node: {}", e)))?;
        if !node.validate() {
            return Err(WorkflowError::Configuration(format!(
                "node '{}' ({}) has invalid configuration",
                merged.id, merged.node_type
            )));
        }
        Ok((merged, node))
    }

    /// All registered primary types, sorted and deduplicated.
    pub fn list(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .factories
            .values()
            .map(|f| f.node_type().to_string())
            .collect();
        types.sort();
        types.dedup();
        types
    }

    pub fn describe(&self, node_type: &str) -> Option<NodeDescriptor> {
        self.find(node_type).map(|f| f.descriptor())
    }
}

fn lookup_names(factory: &dyn NodeFactory) -> Vec<String> {
    let mut names = vec![factory.node_type().to_string()];
    names.extend(factory.aliases().into_iter().map(String::from));
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use trelliscore::{NodeContext, NodeResult};

    struct StubNode {
        kind: &'static str,
        valid: bool,
    }

    #[async_trait]
    impl Node for StubNode {
        fn node_type(&self) -> &str {
            self.kind
        }

        async fn execute(&self, _ctx: NodeContext) -> Result<NodeResult, NodeError> {
            Ok(NodeResult::ok(Value::Null))
        }

        fn validate(&self) -> bool {
            self.valid
        }
    }

    struct StubFactory {
        kind: &'static str,
        aliases: Vec<&'static str>,
        valid: bool,
    }

    impl NodeFactory for StubFactory {
        fn node_type(&self) -> &str {
            self.kind
        }

        fn aliases(&self) -> Vec<&str> {
            self.aliases.clone()
        }

        fn create(&self, _spec: &NodeSpec) -> Result<Box<dyn Node>, NodeError> {
            Ok(Box::new(StubNode {
                kind: self.kind,
                valid: self.valid,
            }))
        }

        fn default_config(&self) -> Map<String, Value> {
            let mut defaults = Map::new();
            defaults.insert("retries".to_string(), json!(3));
            defaults.insert("method".to_string(), json!("GET"));
            defaults
        }
    }

    fn registry() -> NodeRegistry {
        let mut registry = NodeRegistry::new();
        registry.register(Arc::new(StubFactory {
            kind: "httpRequest",
            aliases: vec!["http", "api"],
            valid: true,
        }));
        registry
    }

    #[test]
    fn find_by_alias_and_case() {
        let registry = registry();
        assert!(registry.find("httpRequest").is_some());
        assert!(registry.find("http").is_some());
        assert!(registry.find("API").is_some(), "case-insensitive");
        assert!(registry.find("Request").is_some(), "substring");
        assert!(registry.find("database").is_none());
    }

    #[test]
    fn create_fills_defaults_and_merges_config() {
        let registry = registry();
        let mut config = Map::new();
        config.insert("method".to_string(), json!("POST"));
        let (spec, _node) = registry.create("http", config).unwrap();

        assert!(!spec.id.is_empty());
        assert_eq!(spec.name, "http Node");
        // caller config wins over factory defaults
        assert_eq!(spec.config["method"], json!("POST"));
        assert_eq!(spec.config["retries"], json!(3));
    }

    #[test]
    fn strict_registration_rejects_collision() {
        let mut registry = registry();
        let err = registry
            .register_strict(Arc::new(StubFactory {
                kind: "http",
                aliases: vec![],
                valid: true,
            }))
            .unwrap_err();
        assert!(matches!(err, WorkflowError::AlreadyRegistered(_)));
    }

    #[test]
    fn invalid_node_config_rejected() {
        let mut registry = NodeRegistry::new();
        registry.register(Arc::new(StubFactory {
            kind: "broken",
            aliases: vec![],
            valid: false,
        }));
        let err = registry.create("broken", Map::new()).err().unwrap();
        assert!(matches!(err, WorkflowError::Configuration(_)));
    }

    #[test]
    fn unknown_type_errors() {
        let registry = registry();
        let err = registry
            .create_from_spec(&NodeSpec::new("n", "nope"))
            .err()
            .unwrap();
        assert!(matches!(err, WorkflowError::UnknownNodeType(_)));
    }

    #[test]
    fn list_reports_primary_types_once() {
        let registry = registry();
        assert_eq!(registry.list(), vec!["httpRequest".to_string()]);
    }
}
