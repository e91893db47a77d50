//! Search configuration.

use serde::{Deserialize, Serialize};

/// Top-level search configuration: one or more named backends plus
/// indexing knobs shared by all of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub backends: Vec<BackendConfig>,
    /// Objects per indexing batch during rebuilds.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            backends: Vec::new(),
            batch_size: default_batch_size(),
        }
    }
}

/// One configured backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Unique name used in routing, logs, and errors.
    pub name: String,
    pub engine: EngineConfig,
    /// Model types this backend indexes. Empty means all registered
    /// model types.
    #[serde(default)]
    pub model_types: Vec<String>,
}

/// Engine-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineConfig {
    /// Embedded relational engine with its FTS extension.
    Sqlite {
        /// Connection URL, e.g. `sqlite:///var/lib/app/search.db` or
        /// `sqlite::memory:`.
        database_url: String,
    },
    /// Remote JSON-over-HTTP engine.
    Remote {
        base_url: String,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        password: Option<String>,
        /// Prefix for index and alias names.
        #[serde(default = "default_index_prefix")]
        index_prefix: String,
        /// Retry budget for transient transport failures.
        #[serde(default = "default_max_retries")]
        max_retries: usize,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
}

fn default_batch_size() -> usize {
    100
}

fn default_index_prefix() -> String {
    "weft".to_string()
}

fn default_max_retries() -> usize {
    3
}

fn default_timeout_secs() -> u64 {
    30
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_sqlite_config() {
        let json = r#"{
            "backends": [
                {
                    "name": "local",
                    "engine": { "type": "sqlite", "database_url": "sqlite::memory:" }
                }
            ]
        }"#;
        let config: SearchConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.backends.len(), 1);
        assert!(config.backends[0].model_types.is_empty());
        assert!(matches!(
            config.backends[0].engine,
            EngineConfig::Sqlite { .. }
        ));
    }

    #[test]
    fn test_remote_config_defaults() {
        let json = r#"{
            "backends": [
                {
                    "name": "cluster",
                    "engine": { "type": "remote", "base_url": "http://search:9200" },
                    "model_types": ["page", "event"]
                }
            ],
            "batch_size": 250
        }"#;
        let config: SearchConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.batch_size, 250);
        match &config.backends[0].engine {
            EngineConfig::Remote {
                index_prefix,
                max_retries,
                timeout_secs,
                username,
                ..
            } => {
                assert_eq!(index_prefix, "weft");
                assert_eq!(*max_retries, 3);
                assert_eq!(*timeout_secs, 30);
                assert!(username.is_none());
            }
            other => panic!("expected remote engine, got {other:?}"),
        }
        assert_eq!(config.backends[0].model_types, vec!["page", "event"]);
    }
}
