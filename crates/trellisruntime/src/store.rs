//! Execution-state persistence.
//!
//! The engine talks to an abstract [`StateStore`]; backends are expected to
//! behave like a key/list store with per-key TTLs. Two backends ship with the
//! runtime: an in-process memory store for development and tests, and a null
//! store used when persistence is unconfigured. All operations are best-effort
//! observability, never a recovery log.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;

use trelliscore::{Execution, ExecutionStatus, StoreError};

use crate::logger::LogRecord;

/// TTL for live execution records (1 hour).
pub const EXECUTION_TTL_SECS: i64 = 3_600;
/// TTL for per-workflow history lists (7 days).
pub const HISTORY_TTL_SECS: i64 = 604_800;
/// TTL for per-day log lists (30 days).
pub const LOG_TTL_SECS: i64 = 2_592_000;
/// History lists retain only the most recent entries.
pub const HISTORY_LIMIT: usize = 100;

pub fn execution_key(id: &str) -> String {
    format!("workflow_execution:{}", id)
}

pub fn history_key(workflow_id: &str) -> String {
    format!("workflow_history:{}", workflow_id)
}

pub fn logs_key(date: NaiveDate) -> String {
    format!("workflow_logs:{}", date.format("%Y-%m-%d"))
}

pub const RUNNING_KEY: &str = "running_executions";

/// Persistence collaborator for executions, history, and logs.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Reachability probe at startup; a failing store is swapped for a no-op.
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Upsert the execution record keyed by its id.
    async fn save_execution(&self, execution: &Execution) -> Result<(), StoreError>;

    /// Read back an execution record.
    async fn get_execution(&self, id: &str) -> Result<Option<Execution>, StoreError>;

    async fn add_to_running(&self, id: &str) -> Result<(), StoreError>;

    async fn remove_from_running(&self, id: &str) -> Result<(), StoreError>;

    /// Snapshot of currently running execution ids.
    async fn list_running(&self) -> Result<Vec<String>, StoreError>;

    /// Prepend to the per-workflow history, trimmed to [`HISTORY_LIMIT`].
    async fn append_history(
        &self,
        workflow_id: &str,
        execution: &Execution,
    ) -> Result<(), StoreError>;

    /// Most recent executions first, at most [`HISTORY_LIMIT`].
    async fn list_history(&self, workflow_id: &str) -> Result<Vec<Execution>, StoreError>;

    /// Append a structured log entry to the given day's list.
    async fn append_log(&self, date: NaiveDate, entry: &LogRecord) -> Result<(), StoreError>;

    /// Cancel a running execution: load it, fail it with the reserved
    /// `"cancelled"` error, save it back. Returns false when the execution is
    /// unknown or no longer running.
    async fn cancel_execution(&self, id: &str) -> Result<bool, StoreError> {
        match self.get_execution(id).await? {
            Some(mut execution) if execution.status == ExecutionStatus::Running => {
                execution.cancel();
                self.save_execution(&execution).await?;
                self.remove_from_running(id).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

// ---------------------------------------------------------------------------
// Null backend
// ---------------------------------------------------------------------------

/// No-op store used when persistence is unconfigured. Reads return
/// empty/absent, writes succeed silently.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStateStore;

#[async_trait]
impl StateStore for NullStateStore {
    async fn save_execution(&self, _execution: &Execution) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get_execution(&self, _id: &str) -> Result<Option<Execution>, StoreError> {
        Ok(None)
    }

    async fn add_to_running(&self, _id: &str) -> Result<(), StoreError> {
        Ok(())
    }

    async fn remove_from_running(&self, _id: &str) -> Result<(), StoreError> {
        Ok(())
    }

    async fn list_running(&self) -> Result<Vec<String>, StoreError> {
        Ok(Vec::new())
    }

    async fn append_history(
        &self,
        _workflow_id: &str,
        _execution: &Execution,
    ) -> Result<(), StoreError> {
        Ok(())
    }

    async fn list_history(&self, _workflow_id: &str) -> Result<Vec<Execution>, StoreError> {
        Ok(Vec::new())
    }

    async fn append_log(&self, _date: NaiveDate, _entry: &LogRecord) -> Result<(), StoreError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Memory backend
// ---------------------------------------------------------------------------

struct Expiring<T> {
    value: T,
    expires_at: DateTime<Utc>,
}

impl<T> Expiring<T> {
    fn new(value: T, ttl_secs: i64) -> Self {
        Self {
            value,
            expires_at: Utc::now() + chrono::Duration::seconds(ttl_secs),
        }
    }

    fn live(&self) -> bool {
        Utc::now() < self.expires_at
    }
}

#[derive(Default)]
struct MemoryInner {
    executions: HashMap<String, Expiring<String>>,
    running: HashSet<String>,
    history: HashMap<String, Expiring<VecDeque<String>>>,
    logs: HashMap<String, Expiring<Vec<String>>>,
}

/// In-process store honoring the same keyspace semantics (TTLs, history trim)
/// as a list/KV backend. Entries expire lazily on read.
#[derive(Default)]
pub struct MemoryStateStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn save_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        let payload = serde_json::to_string(execution)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let mut inner = self.inner.write().await;
        inner.executions.insert(
            execution_key(&execution.id),
            Expiring::new(payload, EXECUTION_TTL_SECS),
        );
        Ok(())
    }

    async fn get_execution(&self, id: &str) -> Result<Option<Execution>, StoreError> {
        let inner = self.inner.read().await;
        match inner.executions.get(&execution_key(id)) {
            Some(entry) if entry.live() => serde_json::from_str(&entry.value)
                .map(Some)
                .map_err(|e| StoreError::Serialization(e.to_string())),
            _ => Ok(None),
        }
    }

    async fn add_to_running(&self, id: &str) -> Result<(), StoreError> {
        self.inner.write().await.running.insert(id.to_string());
        Ok(())
    }

    async fn remove_from_running(&self, id: &str) -> Result<(), StoreError> {
        self.inner.write().await.running.remove(id);
        Ok(())
    }

    async fn list_running(&self) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.read().await;
        let mut ids: Vec<String> = inner.running.iter().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn append_history(
        &self,
        workflow_id: &str,
        execution: &Execution,
    ) -> Result<(), StoreError> {
        let payload = serde_json::to_string(execution)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let mut inner = self.inner.write().await;
        let key = history_key(workflow_id);
        let expired = !inner.history.get(&key).is_some_and(Expiring::live);
        if expired {
            inner
                .history
                .insert(key.clone(), Expiring::new(VecDeque::new(), HISTORY_TTL_SECS));
        }
        let entry = inner.history.get_mut(&key).unwrap();
        entry.value.push_front(payload);
        entry.value.truncate(HISTORY_LIMIT);
        // each append refreshes the list TTL, as an upsert would
        entry.expires_at = Utc::now() + chrono::Duration::seconds(HISTORY_TTL_SECS);
        Ok(())
    }

    async fn list_history(&self, workflow_id: &str) -> Result<Vec<Execution>, StoreError> {
        let inner = self.inner.read().await;
        match inner.history.get(&history_key(workflow_id)) {
            Some(entry) if entry.live() => entry
                .value
                .iter()
                .map(|payload| {
                    serde_json::from_str(payload)
                        .map_err(|e| StoreError::Serialization(e.to_string()))
                })
                .collect(),
            _ => Ok(Vec::new()),
        }
    }

    async fn append_log(&self, date: NaiveDate, entry: &LogRecord) -> Result<(), StoreError> {
        let payload = serde_json::to_string(entry)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let mut inner = self.inner.write().await;
        let key = logs_key(date);
        let expired = !inner.logs.get(&key).is_some_and(Expiring::live);
        if expired {
            inner
                .logs
                .insert(key.clone(), Expiring::new(Vec::new(), LOG_TTL_SECS));
        }
        let slot = inner.logs.get_mut(&key).unwrap();
        slot.value.push(payload);
        Ok(())
    }
}
