//! Case repository: the storage seam for case instances
//!
//! The engine reads a case instance, works on a private copy and writes it
//! back with the revision it started from. A store that sees a different
//! revision rejects the write with [`CaseError::Conflict`].

use case_types::*;
use std::collections::HashMap;
use std::sync::RwLock;

/// Storage interface for case instances
pub trait CaseRepository: Send + Sync {
    /// Store a new case instance
    fn insert(&self, case: CaseInstance) -> CaseResult<()>;

    /// Load a copy of a case instance
    fn load(&self, id: &CaseInstanceId) -> CaseResult<CaseInstance>;

    /// Replace a case instance if its stored revision is still `expected_revision`
    fn save(&self, case: CaseInstance, expected_revision: u64) -> CaseResult<()>;

    /// The case owning a plan item instance
    fn find_case_of_plan_item(&self, id: &PlanItemInstanceId) -> CaseResult<CaseInstanceId>;

    /// The case owning a human task
    fn find_case_of_task(&self, task_id: &HumanTaskId) -> CaseResult<CaseInstanceId>;

    /// Copies of every stored case instance
    fn list(&self) -> CaseResult<Vec<CaseInstance>>;
}

#[derive(Default)]
struct Tables {
    cases: HashMap<CaseInstanceId, CaseInstance>,
    plan_item_index: HashMap<PlanItemInstanceId, CaseInstanceId>,
    task_index: HashMap<HumanTaskId, CaseInstanceId>,
}

impl Tables {
    fn index(&mut self, case: &CaseInstance) {
        for item in &case.plan_items {
            self.plan_item_index
                .insert(item.id.clone(), case.id.clone());
            if let Some(task_id) = &item.human_task_id {
                self.task_index.insert(task_id.clone(), case.id.clone());
            }
        }
    }
}

/// In-memory reference implementation of [`CaseRepository`]
#[derive(Default)]
pub struct InMemoryCaseRepository {
    tables: RwLock<Tables>,
}

impl InMemoryCaseRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> CaseResult<usize> {
        let guard = self
            .tables
            .read()
            .map_err(|_| CaseError::Storage("case table lock poisoned".to_string()))?;
        Ok(guard.cases.len())
    }
}

impl CaseRepository for InMemoryCaseRepository {
    fn insert(&self, case: CaseInstance) -> CaseResult<()> {
        let mut guard = self
            .tables
            .write()
            .map_err(|_| CaseError::Storage("case table lock poisoned".to_string()))?;
        if guard.cases.contains_key(&case.id) {
            return Err(CaseError::Storage(format!("case {} already exists", case.id)));
        }
        guard.index(&case);
        guard.cases.insert(case.id.clone(), case);
        Ok(())
    }

    fn load(&self, id: &CaseInstanceId) -> CaseResult<CaseInstance> {
        let guard = self
            .tables
            .read()
            .map_err(|_| CaseError::Storage("case table lock poisoned".to_string()))?;
        guard
            .cases
            .get(id)
            .cloned()
            .ok_or_else(|| CaseError::CaseInstanceNotFound(id.clone()))
    }

    fn save(&self, case: CaseInstance, expected_revision: u64) -> CaseResult<()> {
        let mut guard = self
            .tables
            .write()
            .map_err(|_| CaseError::Storage("case table lock poisoned".to_string()))?;
        let stored = guard
            .cases
            .get(&case.id)
            .ok_or_else(|| CaseError::CaseInstanceNotFound(case.id.clone()))?;
        if stored.revision != expected_revision {
            return Err(CaseError::Conflict {
                id: case.id.clone(),
                expected: expected_revision,
                found: stored.revision,
            });
        }
        guard.index(&case);
        guard.cases.insert(case.id.clone(), case);
        Ok(())
    }

    fn find_case_of_plan_item(&self, id: &PlanItemInstanceId) -> CaseResult<CaseInstanceId> {
        let guard = self
            .tables
            .read()
            .map_err(|_| CaseError::Storage("case table lock poisoned".to_string()))?;
        guard
            .plan_item_index
            .get(id)
            .cloned()
            .ok_or_else(|| CaseError::PlanItemInstanceNotFound(id.clone()))
    }

    fn find_case_of_task(&self, task_id: &HumanTaskId) -> CaseResult<CaseInstanceId> {
        let guard = self
            .tables
            .read()
            .map_err(|_| CaseError::Storage("case table lock poisoned".to_string()))?;
        guard
            .task_index
            .get(task_id)
            .cloned()
            .ok_or_else(|| CaseError::TaskNotFound(task_id.clone()))
    }

    fn list(&self) -> CaseResult<Vec<CaseInstance>> {
        let guard = self
            .tables
            .read()
            .map_err(|_| CaseError::Storage("case table lock poisoned".to_string()))?;
        let mut cases: Vec<CaseInstance> = guard.cases.values().cloned().collect();
        cases.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(cases)
    }
}
