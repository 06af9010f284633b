//! Workflow execution runtime
//!
//! This crate provides the execution engine that runs workflows: dependency
//! graph construction and validation, level-driven mixed sync/async
//! execution, the node registry, the structured log pipeline, and
//! execution-state persistence.

mod config;
mod engine;
mod executor;
mod graph;
mod logger;
mod registry;
mod store;

pub use config::{EngineConfig, StateStoreConfig};
pub use engine::Engine;
pub use executor::{Executor, DEFAULT_MAX_WORKERS};
pub use graph::DependencyGraph;
pub use logger::{LogRecord, Logger, ScopedLogger};
pub use registry::{NodeFactory, NodeRegistry};
pub use store::{
    execution_key, history_key, logs_key, MemoryStateStore, NullStateStore, StateStore,
    EXECUTION_TTL_SECS, HISTORY_LIMIT, HISTORY_TTL_SECS, LOG_TTL_SECS, RUNNING_KEY,
};
