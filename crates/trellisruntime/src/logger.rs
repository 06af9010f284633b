//! Level-filtered structured log pipeline.
//!
//! Records below the configured minimum level are dropped at the call site.
//! Accepted records land in an in-process ordered buffer and, when a state
//! store is attached, are also shipped through a channel to a forwarder task
//! that appends them to the store's per-day log list.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use trelliscore::{timestamp, LogLevel};

use crate::store::StateStore;

/// A structured log record produced by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub context: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
}

impl LogRecord {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            context: Map::new(),
            execution_id: None,
            node_id: None,
        }
    }
}

#[derive(Clone)]
pub struct Logger {
    min_level: LogLevel,
    buffer: Arc<Mutex<Vec<LogRecord>>>,
    shipper: Option<mpsc::UnboundedSender<LogRecord>>,
}

impl Logger {
    pub fn new(min_level: LogLevel) -> Self {
        Self {
            min_level,
            buffer: Arc::new(Mutex::new(Vec::new())),
            shipper: None,
        }
    }

    /// Attach a state store: spawns a forwarder task draining records into
    /// the store's per-day log list. Requires a tokio runtime.
    pub fn with_store(min_level: LogLevel, store: Arc<dyn StateStore>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<LogRecord>();
        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                let date = record.timestamp.date_naive();
                if let Err(e) = store.append_log(date, &record).await {
                    tracing::warn!(error = %e, "failed to ship log record to store");
                }
            }
        });
        Self {
            min_level,
            buffer: Arc::new(Mutex::new(Vec::new())),
            shipper: Some(tx),
        }
    }

    pub fn min_level(&self) -> LogLevel {
        self.min_level
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>, context: Map<String, Value>) {
        let mut record = LogRecord::new(level, message);
        record.context = context;
        self.emit(record);
    }

    pub fn emit(&self, record: LogRecord) {
        if record.level < self.min_level {
            return;
        }
        if let Some(tx) = &self.shipper {
            let _ = tx.send(record.clone());
        }
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.push(record);
        }
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message, Map::new());
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message, Map::new());
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.log(LogLevel::Warning, message, Map::new());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message, Map::new());
    }

    pub fn critical(&self, message: impl Into<String>) {
        self.log(LogLevel::Critical, message, Map::new());
    }

    /// Handle stamping every record with execution/node identity.
    pub fn scoped(
        &self,
        execution_id: impl Into<String>,
        node_id: Option<String>,
    ) -> ScopedLogger {
        ScopedLogger {
            logger: self.clone(),
            execution_id: execution_id.into(),
            node_id,
        }
    }

    /// Snapshot of the buffered records in emission order.
    pub fn records(&self) -> Vec<LogRecord> {
        self.buffer.lock().map(|b| b.clone()).unwrap_or_default()
    }

    pub fn export_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.records())
    }

    /// `timestamp,level,message,execution_id,node_id`, quoted, CRLF rows.
    pub fn export_csv(&self) -> String {
        let mut out = String::from("timestamp,level,message,execution_id,node_id\r\n");
        for record in self.records() {
            let row = [
                record
                    .timestamp
                    .format(trelliscore::TIMESTAMP_FORMAT)
                    .to_string(),
                record.level.as_str().to_string(),
                record.message.clone(),
                record.execution_id.clone().unwrap_or_default(),
                record.node_id.clone().unwrap_or_default(),
            ];
            let quoted: Vec<String> = row
                .iter()
                .map(|field| format!("\"{}\"", field.replace('"', "\"\"")))
                .collect();
            out.push_str(&quoted.join(","));
            out.push_str("\r\n");
        }
        out
    }

    /// `[ts] LEVEL: message (Execution: …)(Node: …)` per line.
    pub fn export_text(&self) -> String {
        let mut out = String::new();
        for record in self.records() {
            out.push_str(&format!(
                "[{}] {}: {}",
                record.timestamp.format(trelliscore::TIMESTAMP_FORMAT),
                record.level.as_str().to_uppercase(),
                record.message
            ));
            if let Some(id) = &record.execution_id {
                out.push_str(&format!(" (Execution: {})", id));
            }
            if let Some(id) = &record.node_id {
                out.push_str(&format!(" (Node: {})", id));
            }
            out.push('\n');
        }
        out
    }
}

/// A logger bound to one execution (and optionally one node).
#[derive(Clone)]
pub struct ScopedLogger {
    logger: Logger,
    execution_id: String,
    node_id: Option<String>,
}

impl ScopedLogger {
    pub fn node(&self, node_id: impl Into<String>) -> ScopedLogger {
        ScopedLogger {
            logger: self.logger.clone(),
            execution_id: self.execution_id.clone(),
            node_id: Some(node_id.into()),
        }
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>, context: Map<String, Value>) {
        let mut record = LogRecord::new(level, message);
        record.context = context;
        record.execution_id = Some(self.execution_id.clone());
        record.node_id = self.node_id.clone();
        self.logger.emit(record);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message, Map::new());
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message, Map::new());
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.log(LogLevel::Warning, message, Map::new());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message, Map::new());
    }
}
