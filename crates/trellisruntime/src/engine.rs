//! Engine facade wiring registry, executor, logger, and state store together.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::RwLock;

use trelliscore::{EngineError, Execution, StoreError, Workflow, WorkflowError};

use crate::config::EngineConfig;
use crate::executor::Executor;
use crate::logger::Logger;
use crate::registry::NodeRegistry;
use crate::store::{NullStateStore, StateStore};

pub struct Engine {
    registry: Arc<NodeRegistry>,
    executor: Executor,
    store: Arc<dyn StateStore>,
    logger: Logger,
    workflows: RwLock<HashMap<String, Workflow>>,
}

impl Engine {
    /// Engine without persistence: every state-store operation is a no-op.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_registry(Arc::new(NodeRegistry::new()), config, None)
    }

    /// Engine with a persistence backend. The backend is pinged once at
    /// startup; when unreachable the engine logs a single warning and runs
    /// with persistence disabled.
    pub async fn with_store(config: EngineConfig, store: Arc<dyn StateStore>) -> Self {
        let store = match store.ping().await {
            Ok(()) => Some(store),
            Err(e) => {
                tracing::warn!(error = %e, "state store unavailable, persistence disabled");
                None
            }
        };
        Self::with_registry(Arc::new(NodeRegistry::new()), config, store)
    }

    /// When a store is supplied, log records are also shipped to it; the
    /// forwarder task requires a tokio runtime to be running.
    pub fn with_registry(
        registry: Arc<NodeRegistry>,
        config: EngineConfig,
        store: Option<Arc<dyn StateStore>>,
    ) -> Self {
        let logger = match &store {
            Some(store) => Logger::with_store(config.log_level, Arc::clone(store)),
            None => Logger::new(config.log_level),
        };
        let store: Arc<dyn StateStore> = store.unwrap_or_else(|| Arc::new(NullStateStore));
        let executor = Executor::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            logger.clone(),
        )
        .with_max_workers(config.max_workers);
        Self {
            registry,
            executor,
            store,
            logger,
            workflows: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub async fn register_workflow(&self, workflow: Workflow) {
        let mut workflows = self.workflows.write().await;
        workflows.insert(workflow.id.clone(), workflow);
    }

    /// Execute a previously registered workflow by id.
    pub async fn execute_workflow(
        &self,
        workflow_id: &str,
        initial_context: Map<String, Value>,
    ) -> Result<Execution, EngineError> {
        let workflows = self.workflows.read().await;
        let workflow = workflows
            .get(workflow_id)
            .ok_or_else(|| EngineError::Workflow(WorkflowError::NotFound(workflow_id.into())))?;
        Ok(self.executor.execute(workflow, initial_context).await)
    }

    /// Execute a workflow directly (without registration).
    pub async fn execute(
        &self,
        workflow: &Workflow,
        initial_context: Map<String, Value>,
    ) -> Execution {
        self.executor.execute(workflow, initial_context).await
    }

    /// Request cancellation of a running execution. Observed by the executor
    /// at its next level boundary.
    pub async fn cancel(&self, execution_id: &str) -> Result<bool, StoreError> {
        self.store.cancel_execution(execution_id).await
    }

    pub async fn history(&self, workflow_id: &str) -> Result<Vec<Execution>, StoreError> {
        self.store.list_history(workflow_id).await
    }

    pub async fn running(&self) -> Result<Vec<String>, StoreError> {
        self.store.list_running().await
    }
}
