//! Level-driven workflow executor.
//!
//! The executor walks the dependency graph one level at a time. Within a
//! level, sync nodes run inline on the executor task and async nodes are
//! dispatched to a semaphore-bounded pool and awaited as a barrier. The
//! executor is the single writer to the shared context and the completed /
//! failed bookkeeping; nodes only ever see value snapshots.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::{Map, Value};
use tokio::sync::Semaphore;

use trelliscore::{
    deep_merge, Context, Execution, ExecutionMode, ExecutionStatus, LogLevel, Node, NodeContext,
    NodeError, NodeResult, NodeSpec, Workflow,
};

use crate::graph::DependencyGraph;
use crate::logger::{Logger, ScopedLogger};
use crate::registry::NodeRegistry;
use crate::store::StateStore;

pub const DEFAULT_MAX_WORKERS: usize = 4;

pub struct Executor {
    max_workers: usize,
    registry: Arc<NodeRegistry>,
    store: Arc<dyn StateStore>,
    logger: Logger,
}

impl Executor {
    pub fn new(registry: Arc<NodeRegistry>, store: Arc<dyn StateStore>, logger: Logger) -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            registry,
            store,
            logger,
        }
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    /// Run a workflow to completion and return the execution record. Expected
    /// failure modes (validation errors, node failures, cancellation) are
    /// reported through the record's status, never raised.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        initial_context: Map<String, Value>,
    ) -> Execution {
        let mut execution = Execution::new(&workflow.id);
        let mut ctx = Context::from_data(initial_context);
        execution.context = Value::Object(ctx.data().clone());

        self.persist(&execution).await;
        if let Err(e) = self.store.add_to_running(&execution.id).await {
            tracing::warn!(error = %e, "failed to register running execution");
        }

        let log = self.logger.scoped(execution.id.as_str(), None);

        // Load-time validation: structure, graph, node instantiation.
        let graph = DependencyGraph::new(workflow);
        let mut errors: Vec<String> = Vec::new();
        if let Err(e) = workflow.validate() {
            errors.push(e.to_string());
        }
        errors.extend(graph.validate());

        // Instantiation also merges each factory's config defaults under the
        // node's config; nodes execute against the merged spec.
        let mut instances: HashMap<String, Box<dyn Node>> = HashMap::new();
        let mut specs: HashMap<String, NodeSpec> = HashMap::new();
        if errors.is_empty() {
            for spec in &workflow.nodes {
                match self.registry.create_from_spec(spec) {
                    Ok((merged, node)) => {
                        instances.insert(spec.id.clone(), node);
                        specs.insert(spec.id.clone(), merged);
                    }
                    Err(e) => errors.push(e.to_string()),
                }
            }
        }

        if !errors.is_empty() {
            let message = errors.join("; ");
            tracing::error!(workflow = %workflow.id, error = %message, "workflow validation failed");
            log.error(format!("validation failed: {}", message));
            execution.fail(message);
            self.finalize(&execution).await;
            return execution;
        }

        execution.start();
        self.persist(&execution).await;
        log.info(format!("workflow '{}' started", workflow.name));
        tracing::info!(
            workflow = %workflow.id,
            execution = %execution.id,
            nodes = workflow.nodes.len(),
            "starting workflow execution"
        );

        let mut completed: HashSet<String> = HashSet::new();
        let mut failed: HashSet<String> = HashSet::new();
        let mut node_outputs: HashMap<String, Value> = HashMap::new();
        let mut fatal: Vec<String> = Vec::new();
        let semaphore = Arc::new(Semaphore::new(self.max_workers));

        for group in graph.parallel_groups() {
            // Cancellation is observed only between levels; in-flight work
            // always finishes first.
            if self.externally_cancelled(&execution.id).await {
                log.warning("execution cancelled");
                execution.cancel();
                self.finalize(&execution).await;
                return execution;
            }

            let mut sync_nodes: Vec<&NodeSpec> = Vec::new();
            let mut async_nodes: Vec<&NodeSpec> = Vec::new();
            for id in group {
                if !graph.can_execute(id, &completed, &failed) {
                    tracing::debug!(node = %id, "skipping node with unsatisfied dependencies");
                    continue;
                }
                let Some(spec) = specs.get(id) else {
                    continue;
                };
                match spec.execution_mode().unwrap_or(ExecutionMode::Sync) {
                    ExecutionMode::Sync => sync_nodes.push(spec),
                    ExecutionMode::Async => async_nodes.push(spec),
                }
            }

            for spec in sync_nodes {
                let Some(node) = instances.remove(&spec.id) else {
                    continue;
                };
                log.node(&spec.id).debug("node started");
                let node_ctx = self.node_context(spec, &ctx, &node_outputs, workflow);
                let outcome = node.execute(node_ctx).await;
                self.apply_outcome(
                    spec,
                    outcome,
                    &mut ctx,
                    &mut execution,
                    &mut completed,
                    &mut failed,
                    &mut node_outputs,
                    &mut fatal,
                    &log,
                );
                self.persist(&execution).await;
            }

            let mut tasks = FuturesUnordered::new();
            for spec in &async_nodes {
                let Some(node) = instances.remove(&spec.id) else {
                    continue;
                };
                log.node(&spec.id).debug("node dispatched");
                let node_ctx = self.node_context(spec, &ctx, &node_outputs, workflow);
                let semaphore = Arc::clone(&semaphore);
                let id = spec.id.clone();
                let handle = tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    node.execute(node_ctx).await
                });
                tasks.push(async move { (id, handle.await) });
            }

            // barrier: the level quiesces before any result is applied to the
            // next level's view of the world
            while let Some((id, joined)) = tasks.next().await {
                let Some(spec) = specs.get(&id) else {
                    continue;
                };
                let outcome = match joined {
                    Ok(outcome) => outcome,
                    Err(e) => Err(NodeError::ExecutionFailed(format!("task panicked: {}", e))),
                };
                self.apply_outcome(
                    spec,
                    outcome,
                    &mut ctx,
                    &mut execution,
                    &mut completed,
                    &mut failed,
                    &mut node_outputs,
                    &mut fatal,
                    &log,
                );
                self.persist(&execution).await;
            }

            if !fatal.is_empty() {
                fatal.sort();
                let message = format!("Some nodes failed: {}", fatal.join(", "));
                log.error(message.clone());
                execution.fail(message);
                self.finalize(&execution).await;
                return execution;
            }
        }

        // the end of the last level is a boundary like any other
        if self.externally_cancelled(&execution.id).await {
            log.warning("execution cancelled");
            execution.cancel();
            self.finalize(&execution).await;
            return execution;
        }

        execution.context = Value::Object(ctx.data().clone());
        execution.complete();
        log.info(format!("workflow '{}' completed", workflow.name));
        tracing::info!(
            workflow = %workflow.id,
            execution = %execution.id,
            completed = completed.len(),
            "workflow execution completed"
        );
        self.finalize(&execution).await;
        execution
    }

    /// Assemble the snapshot handed to a node: inputs from upstream outputs,
    /// config with templates resolved against the current context.
    fn node_context(
        &self,
        spec: &NodeSpec,
        ctx: &Context,
        node_outputs: &HashMap<String, Value>,
        workflow: &Workflow,
    ) -> NodeContext {
        let input = assemble_input(workflow, &spec.id, node_outputs, ctx);
        let config = match ctx.process_templates(&Value::Object(spec.config.clone())) {
            Value::Object(map) => map,
            _ => spec.config.clone(),
        };
        NodeContext {
            node_id: spec.id.clone(),
            node_name: spec.name.clone(),
            input,
            config,
            context: ctx.clone(),
        }
    }

    /// Failure policy and context propagation for one finished node.
    #[allow(clippy::too_many_arguments)]
    fn apply_outcome(
        &self,
        spec: &NodeSpec,
        outcome: Result<NodeResult, NodeError>,
        ctx: &mut Context,
        execution: &mut Execution,
        completed: &mut HashSet<String>,
        failed: &mut HashSet<String>,
        node_outputs: &mut HashMap<String, Value>,
        fatal: &mut Vec<String>,
        log: &ScopedLogger,
    ) {
        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                // a raised failure becomes a synthetic failed result
                NodeResult::fail(e.to_string()).with_log(LogLevel::Error, e.to_string())
            }
        };

        let id = spec.id.as_str();
        execution.append_logs(id, result.logs.clone());

        if result.success {
            ctx.set(&format!("nodes.{}.output", id), result.data.clone());
            node_outputs.insert(id.to_string(), result.data);
            completed.insert(id.to_string());
            log.node(id).info("node completed");
            tracing::debug!(node = %id, "node completed");
        } else {
            let error = result.error.unwrap_or_else(|| "unknown error".to_string());
            if spec.stop_on_fail() {
                failed.insert(id.to_string());
                fatal.push(id.to_string());
                log.node(id).error(format!("node failed: {}", error));
                tracing::error!(node = %id, error = %error, "node failed");
            } else {
                // the run proceeds, but no output is published
                completed.insert(id.to_string());
                log.node(id)
                    .warning(format!("node failed (continuing): {}", error));
                tracing::warn!(node = %id, error = %error, "node failed, continuing");
            }
        }

        execution.context = Value::Object(ctx.data().clone());
    }

    async fn externally_cancelled(&self, execution_id: &str) -> bool {
        match self.store.get_execution(execution_id).await {
            Ok(Some(stored)) => stored.is_cancelled(),
            _ => false,
        }
    }

    /// Upsert the run record. A mid-run `running` save must not resurrect a
    /// record an external caller already cancelled; the cancellation is then
    /// honored at the next level boundary.
    async fn persist(&self, execution: &Execution) {
        if execution.status == ExecutionStatus::Running {
            if let Ok(Some(stored)) = self.store.get_execution(&execution.id).await {
                if stored.is_cancelled() {
                    return;
                }
            }
        }
        if let Err(e) = self.store.save_execution(execution).await {
            tracing::warn!(error = %e, "failed to persist execution");
        }
    }

    async fn finalize(&self, execution: &Execution) {
        self.persist(execution).await;
        if let Err(e) = self.store.remove_from_running(&execution.id).await {
            tracing::warn!(error = %e, "failed to deregister running execution");
        }
        if let Err(e) = self
            .store
            .append_history(&execution.workflow_id, execution)
            .await
        {
            tracing::warn!(error = %e, "failed to append execution history");
        }
    }
}

/// Inputs for a node, keyed by each incoming connection's `toInput` slot.
/// The value is the upstream output's `fromOutput` entry when present, else
/// the whole output; a later connection overrides an earlier one on the same
/// slot. An explicit `nodes.<id>.input` subtree in the context is merged on
/// top.
fn assemble_input(
    workflow: &Workflow,
    node_id: &str,
    node_outputs: &HashMap<String, Value>,
    ctx: &Context,
) -> Map<String, Value> {
    let mut input = Map::new();
    for conn in workflow.connections.iter().filter(|c| c.to == node_id) {
        let Some(data) = node_outputs.get(&conn.from) else {
            continue;
        };
        let value = match data {
            Value::Object(map) if map.contains_key(&conn.from_output) => {
                map[&conn.from_output].clone()
            }
            other => other.clone(),
        };
        input.insert(conn.to_input.clone(), value);
    }
    if let Some(Value::Object(explicit)) = ctx.get(&format!("nodes.{}.input", node_id)) {
        let explicit = explicit.clone();
        deep_merge(&mut input, explicit);
    }
    input
}

#[cfg(test)]
mod tests {
    use super::*;
    use trelliscore::NodeSpec;

    fn outputs(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn input_resolves_from_output_slot() {
        let mut wf = Workflow::new("wf", "wf");
        wf.add_node(NodeSpec::new("a", "t")).add_node(NodeSpec::new("b", "t"));
        wf.connect_ports("a", "body", "b", "payload");

        let node_outputs = outputs(&[("a", serde_json::json!({"body": "text", "status": 200}))]);
        let input = assemble_input(&wf, "b", &node_outputs, &Context::new());
        assert_eq!(input["payload"], serde_json::json!("text"));
    }

    #[test]
    fn input_falls_back_to_whole_output() {
        let mut wf = Workflow::new("wf", "wf");
        wf.add_node(NodeSpec::new("a", "t")).add_node(NodeSpec::new("b", "t"));
        wf.connect("a", "b");

        let node_outputs = outputs(&[("a", serde_json::json!({"x": 1}))]);
        let input = assemble_input(&wf, "b", &node_outputs, &Context::new());
        // no "output" key in the data, so the whole output flows through
        assert_eq!(input["input"], serde_json::json!({"x": 1}));
    }

    #[test]
    fn last_connection_wins_on_same_slot() {
        let mut wf = Workflow::new("wf", "wf");
        wf.add_node(NodeSpec::new("a", "t"))
            .add_node(NodeSpec::new("b", "t"))
            .add_node(NodeSpec::new("c", "t"));
        wf.connect("a", "c").connect("b", "c");

        let node_outputs = outputs(&[
            ("a", serde_json::json!("first")),
            ("b", serde_json::json!("second")),
        ]);
        let input = assemble_input(&wf, "c", &node_outputs, &Context::new());
        assert_eq!(input["input"], serde_json::json!("second"));
    }

    #[test]
    fn missing_upstream_output_contributes_nothing() {
        let mut wf = Workflow::new("wf", "wf");
        wf.add_node(NodeSpec::new("a", "t")).add_node(NodeSpec::new("b", "t"));
        wf.connect("a", "b");

        let input = assemble_input(&wf, "b", &HashMap::new(), &Context::new());
        assert!(input.is_empty());
    }

    #[test]
    fn explicit_context_input_merges_over_connections() {
        let mut wf = Workflow::new("wf", "wf");
        wf.add_node(NodeSpec::new("a", "t")).add_node(NodeSpec::new("b", "t"));
        wf.connect("a", "b");

        let mut ctx = Context::new();
        ctx.set("nodes.b.input", serde_json::json!({"input": "override", "extra": true}));
        let node_outputs = outputs(&[("a", serde_json::json!("from-a"))]);
        let input = assemble_input(&wf, "b", &node_outputs, &ctx);
        assert_eq!(input["input"], serde_json::json!("override"));
        assert_eq!(input["extra"], serde_json::json!(true));
    }
}
