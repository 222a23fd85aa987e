//! Case engine: the entry point for running case instances
//!
//! The engine:
//! 1. Registers case definitions
//! 2. Starts case instances
//! 3. Applies external stimuli (triggers, task completions, timers, variables)
//! 4. Settles each case through the agenda and commits it
//!
//! **Operations are atomic.** Each one works on a private copy of a single
//! case and either commits all of its changes and effects or none of them.
//! Operations on the same case are serialized; different cases proceed
//! independently.

use crate::config::EngineConfig;
use crate::definition_registry::DefinitionRegistry;
use crate::expression::{ExpressionEvaluator, SimpleExpressionEvaluator, Variables};
use crate::query::{CaseInstanceQuery, PlanItemInstanceQuery, UserEventListenerInstanceQuery};
use crate::repository::{CaseRepository, InMemoryCaseRepository};
use crate::unit_of_work::UnitOfWork;
use case_types::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

/// A freshly started case and what its start produced
#[derive(Clone, Debug)]
pub struct StartedCase {
    pub case: CaseInstance,
    pub outcome: OperationOutcome,
}

/// One mutex per case instance
#[derive(Default)]
struct CaseLocks {
    locks: Mutex<HashMap<CaseInstanceId, Arc<Mutex<()>>>>,
}

impl CaseLocks {
    fn lock_for(&self, id: &CaseInstanceId) -> CaseResult<Arc<Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| CaseError::Storage("case lock table poisoned".to_string()))?;
        Ok(locks.entry(id.clone()).or_default().clone())
    }
}

/// The case engine
pub struct CaseEngine {
    registry: RwLock<DefinitionRegistry>,
    repository: Arc<dyn CaseRepository>,
    evaluator: Arc<dyn ExpressionEvaluator>,
    config: EngineConfig,
    locks: CaseLocks,
}

impl CaseEngine {
    /// An engine with in-memory storage and the built-in expression evaluator
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            registry: RwLock::new(DefinitionRegistry::new()),
            repository: Arc::new(InMemoryCaseRepository::new()),
            evaluator: Arc::new(SimpleExpressionEvaluator::new()),
            config,
            locks: CaseLocks::default(),
        }
    }

    pub fn with_repository(mut self, repository: Arc<dyn CaseRepository>) -> Self {
        self.repository = repository;
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Definition Management ────────────────────────────────────────

    /// Validate and register a case definition
    pub fn register_definition(&self, definition: CaseDefinition) -> CaseResult<CaseDefinitionId> {
        self.registry
            .write()
            .map_err(|_| CaseError::Storage("definition registry lock poisoned".to_string()))?
            .register(definition)
    }

    pub fn definition(&self, id: &CaseDefinitionId) -> CaseResult<Arc<CaseDefinition>> {
        self.read_registry()?.get(id)
    }

    /// The latest version deployed under `key`
    pub fn latest_definition(&self, key: &str) -> CaseResult<Arc<CaseDefinition>> {
        self.read_registry()?.latest_by_key(key)
    }

    fn read_registry(&self) -> CaseResult<std::sync::RwLockReadGuard<'_, DefinitionRegistry>> {
        self.registry
            .read()
            .map_err(|_| CaseError::Storage("definition registry lock poisoned".to_string()))
    }

    // ── Case Lifecycle ───────────────────────────────────────────────

    /// Start a case of the latest definition deployed under `key`
    pub fn start_case(&self, key: &str, variables: Variables) -> CaseResult<StartedCase> {
        let definition = self.latest_definition(key)?;
        let case = CaseInstance::new(definition.id.clone(), definition.key.clone(), variables);
        let case_id = case.id.clone();

        let mut work =
            UnitOfWork::begin_new(case, &definition, self.evaluator.as_ref(), &self.config);
        let outcome = work
            .start_case()
            .and_then(|_| work.settle())
            .and_then(|_| work.commit(self.repository.as_ref()))
            .map_err(|e| self.log_abort(&case_id, "start_case", e))?;

        tracing::info!(
            case_instance_id = %case_id,
            definition = %definition.key,
            version = definition.version,
            effects = outcome.effects.len(),
            "Case started"
        );

        let case = self.repository.load(&case_id)?;
        Ok(StartedCase { case, outcome })
    }

    /// Terminate a case and everything still live in it
    pub fn terminate_case(&self, case_id: &CaseInstanceId) -> CaseResult<OperationOutcome> {
        self.run(case_id, "terminate_case", |work| work.terminate_case())
    }

    pub fn case_instance(&self, case_id: &CaseInstanceId) -> CaseResult<CaseInstance> {
        self.repository.load(case_id)
    }

    pub fn plan_item_instance(&self, id: &PlanItemInstanceId) -> CaseResult<PlanItemInstance> {
        let case_id = self.repository.find_case_of_plan_item(id)?;
        let case = self.repository.load(&case_id)?;
        case.find(id)
            .and_then(|idx| case.plan_items.get(idx.0).cloned())
            .ok_or_else(|| CaseError::PlanItemInstanceNotFound(id.clone()))
    }

    /// Applied transitions of a case, in order
    pub fn history(&self, case_id: &CaseInstanceId) -> CaseResult<Vec<HistoryEntry>> {
        Ok(self.repository.load(case_id)?.history)
    }

    // ── Stimuli ──────────────────────────────────────────────────────

    /// Manually trigger a plan item instance
    ///
    /// Listeners occur, tasks complete and active stages are asked to
    /// complete. Milestones cannot be triggered.
    pub fn trigger_plan_item(&self, id: &PlanItemInstanceId) -> CaseResult<OperationOutcome> {
        self.run_on_plan_item(id, "trigger_plan_item", |work, idx| work.trigger(idx))
    }

    pub fn complete_user_event_listener(
        &self,
        id: &PlanItemInstanceId,
    ) -> CaseResult<OperationOutcome> {
        self.run_on_plan_item(id, "complete_user_event_listener", |work, idx| {
            work.complete_user_event_listener(idx)
        })
    }

    /// Called by the job scheduler when a timer's job is due
    pub fn fire_timer(&self, id: &PlanItemInstanceId) -> CaseResult<OperationOutcome> {
        self.run_on_plan_item(id, "fire_timer", |work, idx| work.fire_timer(idx))
    }

    /// Called by the human task subsystem when a task is completed
    pub fn complete_task(&self, task_id: &HumanTaskId) -> CaseResult<OperationOutcome> {
        self.run_on_task(task_id, "complete_task", |work, idx| work.complete_task(idx))
    }

    /// Called by the human task subsystem when a task is deleted
    pub fn terminate_task(&self, task_id: &HumanTaskId) -> CaseResult<OperationOutcome> {
        self.run_on_task(task_id, "terminate_task", |work, idx| {
            work.terminate_task(idx)
        })
    }

    pub fn set_variable(
        &self,
        case_id: &CaseInstanceId,
        name: impl Into<String>,
        value: serde_json::Value,
    ) -> CaseResult<OperationOutcome> {
        let name = name.into();
        self.run(case_id, "set_variable", move |work| work.set_variable(name, value))
    }

    /// Set several variables in one operation
    pub fn set_variables(
        &self,
        case_id: &CaseInstanceId,
        variables: Variables,
    ) -> CaseResult<OperationOutcome> {
        self.run(case_id, "set_variables", move |work| {
            for (name, value) in variables {
                work.set_variable(name, value)?;
            }
            Ok(())
        })
    }

    /// Start an ENABLED instance
    pub fn start_plan_item(&self, id: &PlanItemInstanceId) -> CaseResult<OperationOutcome> {
        self.run_on_plan_item(id, "start_plan_item", |work, idx| work.manual_start(idx))
    }

    /// Re-enable a DISABLED instance
    pub fn enable_plan_item(&self, id: &PlanItemInstanceId) -> CaseResult<OperationOutcome> {
        self.run_on_plan_item(id, "enable_plan_item", |work, idx| work.enable(idx))
    }

    /// Disable an ENABLED instance
    pub fn disable_plan_item(&self, id: &PlanItemInstanceId) -> CaseResult<OperationOutcome> {
        self.run_on_plan_item(id, "disable_plan_item", |work, idx| work.disable(idx))
    }

    pub fn suspend_plan_item(&self, id: &PlanItemInstanceId) -> CaseResult<OperationOutcome> {
        self.run_on_plan_item(id, "suspend_plan_item", |work, idx| work.suspend(idx))
    }

    pub fn resume_plan_item(&self, id: &PlanItemInstanceId) -> CaseResult<OperationOutcome> {
        self.run_on_plan_item(id, "resume_plan_item", |work, idx| work.resume(idx))
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn create_plan_item_instance_query(&self) -> PlanItemInstanceQuery {
        PlanItemInstanceQuery::new(self.repository.clone(), self.config.default_page_size)
    }

    pub fn create_user_event_listener_instance_query(&self) -> UserEventListenerInstanceQuery {
        UserEventListenerInstanceQuery::new(self.repository.clone(), self.config.default_page_size)
    }

    pub fn create_case_instance_query(&self) -> CaseInstanceQuery {
        CaseInstanceQuery::new(self.repository.clone(), self.config.default_page_size)
    }

    // ── Operation plumbing ───────────────────────────────────────────

    fn run_on_plan_item<F>(
        &self,
        id: &PlanItemInstanceId,
        operation: &'static str,
        f: F,
    ) -> CaseResult<OperationOutcome>
    where
        F: FnOnce(&mut UnitOfWork<'_>, PlanItemIdx) -> CaseResult<()>,
    {
        let case_id = self.repository.find_case_of_plan_item(id)?;
        self.run(&case_id, operation, |work| {
            let idx = work.resolve(id)?;
            f(work, idx)
        })
    }

    fn run_on_task<F>(
        &self,
        task_id: &HumanTaskId,
        operation: &'static str,
        f: F,
    ) -> CaseResult<OperationOutcome>
    where
        F: FnOnce(&mut UnitOfWork<'_>, PlanItemIdx) -> CaseResult<()>,
    {
        let case_id = self.repository.find_case_of_task(task_id)?;
        self.run(&case_id, operation, |work| {
            let idx = work.resolve_task(task_id)?;
            f(work, idx)
        })
    }

    /// Load, change, settle and commit one case under its lock
    fn run<F>(
        &self,
        case_id: &CaseInstanceId,
        operation: &'static str,
        f: F,
    ) -> CaseResult<OperationOutcome>
    where
        F: FnOnce(&mut UnitOfWork<'_>) -> CaseResult<()>,
    {
        let lock = self.locks.lock_for(case_id)?;
        let _guard = lock
            .lock()
            .map_err(|_| CaseError::Storage(format!("lock of case {} poisoned", case_id)))?;

        let case = self.repository.load(case_id)?;
        let definition = self.definition(&case.definition_id)?;

        let mut work = UnitOfWork::begin(case, &definition, self.evaluator.as_ref(), &self.config);
        let outcome = f(&mut work)
            .and_then(|_| work.settle())
            .and_then(|_| work.commit(self.repository.as_ref()))
            .map_err(|e| self.log_abort(case_id, operation, e))?;

        tracing::debug!(
            case_instance_id = %case_id,
            operation,
            revision = outcome.revision,
            transitions = outcome.transitions.len(),
            effects = outcome.effects.len(),
            "Operation committed"
        );
        Ok(outcome)
    }

    fn log_abort(&self, case_id: &CaseInstanceId, operation: &str, error: CaseError) -> CaseError {
        if error.is_already_terminal() {
            tracing::warn!(case_instance_id = %case_id, operation, %error, "Plan item already terminal");
        } else if error.is_recoverable() {
            tracing::warn!(case_instance_id = %case_id, operation, %error, "Operation rejected");
        } else {
            tracing::error!(case_instance_id = %case_id, operation, %error, "Operation aborted");
        }
        error
    }
}

impl Default for CaseEngine {
    fn default() -> Self {
        Self::new()
    }
}

