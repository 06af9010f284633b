use serde::{Deserialize, Serialize};

use trelliscore::LogLevel;

use crate::executor::DEFAULT_MAX_WORKERS;

/// Core engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Size of the async worker pool. Clamped to at least 1.
    pub max_workers: usize,
    /// Minimum level accepted by the structured log pipeline.
    pub log_level: LogLevel,
    /// Persistence backend parameters. Absent means persistence is disabled
    /// and all state-store operations are no-ops.
    pub state_store: Option<StateStoreConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            log_level: LogLevel::Info,
            state_store: None,
        }
    }
}

/// Connection parameters for a key/list store backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StateStoreConfig {
    pub host: String,
    pub port: u16,
    pub credential: Option<String>,
    pub database: u32,
    pub timeout_secs: u64,
    pub key_prefix: String,
}

impl Default for StateStoreConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            credential: None,
            database: 0,
            timeout_secs: 5,
            key_prefix: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.log_level, LogLevel::Info);
        assert!(config.state_store.is_none());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: EngineConfig = serde_json::from_str(
            r#"{ "maxWorkers": 8, "stateStore": { "host": "store.internal" } }"#,
        )
        .unwrap();
        assert_eq!(config.max_workers, 8);
        assert_eq!(config.log_level, LogLevel::Info);
        let store = config.state_store.unwrap();
        assert_eq!(store.host, "store.internal");
        assert_eq!(store.port, 6379);
    }
}
