//! Standard node library
//!
//! Built-in node kinds recognized by the engine: `http`, `database`,
//! `transform`, and `code`.

mod code;
mod database;
mod http;
mod transform;

pub use code::{CodeNode, CodeNodeFactory};
pub use database::{DatabaseNode, DatabaseNodeFactory};
pub use http::{HttpNode, HttpNodeFactory};
pub use transform::{TransformNode, TransformNodeFactory};

use std::sync::Arc;

use trellisruntime::NodeRegistry;

/// Register all built-in nodes with a registry
pub fn register_builtins(registry: &mut NodeRegistry) {
    registry.register(Arc::new(CodeNodeFactory));
    registry.register(Arc::new(DatabaseNodeFactory));
    registry.register(Arc::new(HttpNodeFactory));
    registry.register(Arc::new(TransformNodeFactory));
}
