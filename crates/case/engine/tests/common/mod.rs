//! Shared helpers for the case engine integration tests

#![allow(dead_code)]

use case_engine::CaseEngine;
use case_types::*;
use serde_json::Value;
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

/// Route engine logs to the test writer; `RUST_LOG=case_engine=debug` shows them
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// An engine with `definition` registered
pub fn engine_with(definition: CaseDefinition) -> CaseEngine {
    init_tracing();
    let engine = CaseEngine::new();
    engine.register_definition(definition).unwrap();
    engine
}

/// Build a definition from plan items, panicking on duplicates
pub fn model(key: &str, items: Vec<PlanItemDefinition>) -> CaseDefinition {
    items
        .into_iter()
        .try_fold(CaseDefinition::new(key, key), |def, item| {
            def.with_plan_item(item)
        })
        .unwrap()
}

pub fn start(engine: &CaseEngine, key: &str) -> CaseInstance {
    engine.start_case(key, BTreeMap::new()).unwrap().case
}

pub fn start_with(engine: &CaseEngine, key: &str, variables: &[(&str, Value)]) -> CaseInstance {
    let variables = variables
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    engine.start_case(key, variables).unwrap().case
}

// ---------------------------------------------------------------------------
// Lookups
// ---------------------------------------------------------------------------

/// Live plan item instances of a case
pub fn live_items(engine: &CaseEngine, case_id: &CaseInstanceId) -> Vec<PlanItemInstance> {
    engine
        .create_plan_item_instance_query()
        .case_instance_id(case_id)
        .list()
        .unwrap()
}

/// The single live instance of an element
pub fn live_item(engine: &CaseEngine, case_id: &CaseInstanceId, element: &str) -> PlanItemInstance {
    engine
        .create_plan_item_instance_query()
        .case_instance_id(case_id)
        .element_id(element)
        .single()
        .unwrap()
        .unwrap_or_else(|| panic!("no live instance of '{}'", element))
}

/// Every instance of an element, ended ones included, in creation order
pub fn all_instances(
    engine: &CaseEngine,
    case_id: &CaseInstanceId,
    element: &str,
) -> Vec<PlanItemInstance> {
    engine
        .create_plan_item_instance_query()
        .case_instance_id(case_id)
        .element_id(element)
        .include_ended()
        .list()
        .unwrap()
}

/// States of every instance of an element, in arena order
pub fn states_of(engine: &CaseEngine, case_id: &CaseInstanceId, element: &str) -> Vec<PlanItemState> {
    let case = engine.case_instance(case_id).unwrap();
    case.plan_items
        .iter()
        .filter(|p| p.plan_item_id.as_str() == element)
        .map(|p| p.state)
        .collect()
}

/// Active human tasks, ordered by name
pub fn active_tasks(engine: &CaseEngine, case_id: &CaseInstanceId) -> Vec<PlanItemInstance> {
    engine
        .create_plan_item_instance_query()
        .case_instance_id(case_id)
        .plan_item_definition_type(PlanItemKind::HumanTask)
        .state_active()
        .order_by_name()
        .asc()
        .list()
        .unwrap()
}

pub fn active_task_names(engine: &CaseEngine, case_id: &CaseInstanceId) -> Vec<String> {
    active_tasks(engine, case_id)
        .into_iter()
        .map(|t| t.name)
        .collect()
}

/// Names of the available user event listeners, ordered by name
pub fn listener_names(engine: &CaseEngine, case_id: &CaseInstanceId) -> Vec<String> {
    engine
        .create_user_event_listener_instance_query()
        .case_instance_id(case_id)
        .order_by_name()
        .asc()
        .list()
        .unwrap()
        .into_iter()
        .map(|l| l.name)
        .collect()
}

pub fn case_state(engine: &CaseEngine, case_id: &CaseInstanceId) -> CaseState {
    engine.case_instance(case_id).unwrap().state
}

// ---------------------------------------------------------------------------
// Stimuli
// ---------------------------------------------------------------------------

/// Complete the human task backing an active instance
pub fn complete_task(engine: &CaseEngine, item: &PlanItemInstance) -> OperationOutcome {
    let task_id = item
        .human_task_id
        .as_ref()
        .unwrap_or_else(|| panic!("'{}' has no human task", item.plan_item_id));
    engine.complete_task(task_id).unwrap()
}

/// Complete the active human task with the given name
pub fn complete_task_named(
    engine: &CaseEngine,
    case_id: &CaseInstanceId,
    name: &str,
) -> OperationOutcome {
    let task = active_tasks(engine, case_id)
        .into_iter()
        .find(|t| t.name == name)
        .unwrap_or_else(|| panic!("no active task named '{}'", name));
    complete_task(engine, &task)
}

/// Complete every active human task, one operation each
pub fn complete_all_tasks(engine: &CaseEngine, case_id: &CaseInstanceId) {
    for task in active_tasks(engine, case_id) {
        complete_task(engine, &task);
    }
}

/// Complete the available user event listener with the given name
pub fn complete_listener_named(
    engine: &CaseEngine,
    case_id: &CaseInstanceId,
    name: &str,
) -> OperationOutcome {
    let listener = engine
        .create_user_event_listener_instance_query()
        .case_instance_id(case_id)
        .name(name)
        .single()
        .unwrap()
        .unwrap_or_else(|| panic!("no available listener named '{}'", name));
    engine.complete_user_event_listener(&listener.id).unwrap()
}
