//! The observable state of a single workflow run.
//!
//! An execution moves `pending -> running -> completed | failed`; terminal
//! states are sinks. Cancellation is a failure with the reserved error
//! `"cancelled"`. The record is what gets persisted and what callers see.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::log::{opt_timestamp, NodeLog};

/// Reserved error string for externally cancelled runs.
pub const CANCELLED_ERROR: &str = "cancelled";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    /// Snapshot of the shared context `data` layer, updated as nodes complete.
    pub context: Value,
    /// Node logs grouped by node id.
    #[serde(default)]
    pub logs: BTreeMap<String, Vec<NodeLog>>,
    #[serde(
        default,
        with = "opt_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "opt_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub end_time: Option<DateTime<Utc>>,
    /// Seconds between start and end, set when the run reaches a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

impl Execution {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            workflow_id: workflow_id.into(),
            status: ExecutionStatus::Pending,
            context: Value::Object(Map::new()),
            logs: BTreeMap::new(),
            start_time: None,
            end_time: None,
            duration: None,
        }
    }

    /// `pending -> running`. No-op from any other state.
    pub fn start(&mut self) {
        if self.status == ExecutionStatus::Pending {
            self.status = ExecutionStatus::Running;
            self.start_time = Some(Utc::now());
        }
    }

    /// `running -> completed`. No-op from any other state.
    pub fn complete(&mut self) {
        if self.status == ExecutionStatus::Running {
            self.status = ExecutionStatus::Completed;
            self.finish();
        }
    }

    /// Any non-terminal state `-> failed`. Records the error under
    /// `context.error`.
    pub fn fail(&mut self, error: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = ExecutionStatus::Failed;
        let error = error.into();
        if let Value::Object(map) = &mut self.context {
            map.insert("error".to_string(), Value::String(error));
        }
        self.finish();
    }

    /// External cancellation: fail with the reserved `"cancelled"` error.
    pub fn cancel(&mut self) {
        self.fail(CANCELLED_ERROR);
    }

    pub fn error(&self) -> Option<&str> {
        self.context.get("error").and_then(Value::as_str)
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == ExecutionStatus::Failed && self.error() == Some(CANCELLED_ERROR)
    }

    pub fn append_logs(&mut self, node_id: &str, entries: Vec<NodeLog>) {
        if entries.is_empty() {
            return;
        }
        self.logs
            .entry(node_id.to_string())
            .or_default()
            .extend(entries);
    }

    fn finish(&mut self) {
        self.end_time = Some(Utc::now());
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            let micros = (end - start).num_microseconds().unwrap_or(0).max(0);
            self.duration = Some(micros as f64 / 1_000_000.0);
        }
    }
}
