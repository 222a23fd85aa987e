//! Engine configuration

use case_types::{CaseError, CaseResult};
use serde::{Deserialize, Serialize};

/// Tunables for the case engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Ceiling on agenda passes per operation; exceeding it aborts the operation
    pub max_agenda_passes: usize,
    /// Check structural invariants before committing each operation
    pub verify_invariants: bool,
    /// Append applied transitions to the case history
    pub record_history: bool,
    /// Page size for queries without an explicit limit
    pub default_page_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_agenda_passes: 1000,
            verify_invariants: true,
            record_history: true,
            default_page_size: 100,
        }
    }
}

impl EngineConfig {
    pub fn with_max_agenda_passes(mut self, passes: usize) -> Self {
        self.max_agenda_passes = passes;
        self
    }

    pub fn with_verify_invariants(mut self, verify: bool) -> Self {
        self.verify_invariants = verify;
        self
    }

    pub fn with_record_history(mut self, record: bool) -> Self {
        self.record_history = record;
        self
    }

    pub fn with_default_page_size(mut self, size: usize) -> Self {
        self.default_page_size = size;
        self
    }

    /// Parse a JSON document; missing fields keep their defaults
    pub fn from_json(json: &str) -> CaseResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| CaseError::Validation(format!("invalid engine config: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_agenda_passes, 1000);
        assert!(config.verify_invariants);
        assert!(config.record_history);
        assert_eq!(config.default_page_size, 100);
    }

    #[test]
    fn test_from_json_partial() {
        let config = EngineConfig::from_json(r#"{"max_agenda_passes": 50}"#).unwrap();
        assert_eq!(config.max_agenda_passes, 50);
        assert!(config.record_history);

        assert!(EngineConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_builders() {
        let config = EngineConfig::default()
            .with_record_history(false)
            .with_default_page_size(10);
        assert!(!config.record_history);
        assert_eq!(config.default_page_size, 10);
    }
}
