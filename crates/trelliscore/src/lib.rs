//! Core abstractions for the trellis workflow engine
//!
//! This crate provides the fundamental types and traits that all other
//! components depend on: the workflow model, the node contract, the shared
//! execution context, and the execution record.

mod context;
mod error;
mod execution;
mod log;
mod node;
mod workflow;

pub use context::{deep_merge, Context};
pub use error::{EngineError, NodeError, StoreError, WorkflowError};
pub use execution::{Execution, ExecutionStatus, CANCELLED_ERROR};
pub use log::{opt_timestamp, timestamp, LogLevel, NodeLog, TIMESTAMP_FORMAT};
pub use node::{Node, NodeContext, NodeDescriptor, NodeResult};
pub use workflow::{
    default_input, default_output, Connection, ExecutionMode, NodeSpec, Workflow,
    CONFIG_EXECUTION_MODE, CONFIG_STOP_ON_FAIL,
};

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
