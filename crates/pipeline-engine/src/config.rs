//! Engine configuration

use serde::{Deserialize, Serialize};

/// Tunables for a [`PipelineEngine`](crate::PipelineEngine) session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Maximum number of run snapshots kept for undo/redo
    pub history_limit: usize,
    /// zstd level used to compress snapshots
    pub snapshot_compression_level: i32,
    /// Record a snapshot even when the run ended with failed or cancelled nodes
    pub record_failed_runs: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_limit: 100,
            snapshot_compression_level: 3,
            record_failed_runs: true,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON config, filling missing fields with defaults
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = EngineConfig::from_json(r#"{"historyLimit": 5}"#).unwrap();
        assert_eq!(config.history_limit, 5);
        assert_eq!(config.snapshot_compression_level, 3);
        assert!(config.record_failed_runs);
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        assert!(EngineConfig::from_json(r#"{"historyLimit": "many"}"#).is_err());
    }
}
