//! Definition registry: stores and retrieves case definitions
//!
//! Case definitions are immutable once registered. To modify,
//! deploy a new version under the same key. The registry tracks all versions.

use case_types::{CaseDefinition, CaseDefinitionId, CaseError, CaseResult};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of case definitions
#[derive(Clone, Debug)]
pub struct DefinitionRegistry {
    /// All registered definitions, keyed by ID
    definitions: HashMap<CaseDefinitionId, Arc<CaseDefinition>>,
    /// Index by key → definition IDs in version order
    by_key: HashMap<String, Vec<CaseDefinitionId>>,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self {
            definitions: HashMap::new(),
            by_key: HashMap::new(),
        }
    }

    /// Register a case definition
    ///
    /// Validates the definition and assigns the next version for its key.
    pub fn register(&mut self, mut definition: CaseDefinition) -> CaseResult<CaseDefinitionId> {
        definition.validate()?;

        if self.definitions.contains_key(&definition.id) {
            return Err(CaseError::Validation(format!(
                "Case definition {} is already registered",
                definition.id
            )));
        }

        let versions = self.by_key.entry(definition.key.clone()).or_default();
        definition.version = versions.len() as u32 + 1;

        let id = definition.id.clone();
        tracing::info!(
            definition_id = %id,
            key = %definition.key,
            version = definition.version,
            plan_items = definition.plan_item_count(),
            "Case definition registered"
        );

        versions.push(id.clone());
        self.definitions.insert(id.clone(), Arc::new(definition));
        Ok(id)
    }

    pub fn get(&self, id: &CaseDefinitionId) -> CaseResult<Arc<CaseDefinition>> {
        self.definitions
            .get(id)
            .cloned()
            .ok_or_else(|| CaseError::DefinitionNotFound(id.clone()))
    }

    /// The latest version deployed under `key`
    pub fn latest_by_key(&self, key: &str) -> CaseResult<Arc<CaseDefinition>> {
        self.by_key
            .get(key)
            .and_then(|ids| ids.last())
            .and_then(|id| self.definitions.get(id))
            .cloned()
            .ok_or_else(|| CaseError::DefinitionKeyNotFound(key.to_string()))
    }

    /// All versions deployed under `key`, oldest first
    pub fn versions_by_key(&self, key: &str) -> Vec<Arc<CaseDefinition>> {
        self.by_key
            .get(key)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.definitions.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn list(&self) -> Vec<Arc<CaseDefinition>> {
        self.definitions.values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.definitions.len()
    }

    pub fn contains(&self, id: &CaseDefinitionId) -> bool {
        self.definitions.contains_key(id)
    }
}

impl Default for DefinitionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
