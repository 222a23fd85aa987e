//! Plan item and case lifecycle: manual activation, milestones, suspension,
//! explicit stage completion, case exit and history

mod common;

use case_engine::{CaseEngine, EngineConfig};
use case_types::*;
use common::*;
use serde_json::json;

// ---------------------------------------------------------------------------
// Manual activation
// ---------------------------------------------------------------------------

fn manual_model() -> CaseDefinition {
    model(
        "manual",
        vec![
            PlanItemDefinition::human_task("approve", "Approve").manual_activation(),
            PlanItemDefinition::human_task("work", "Work"),
        ],
    )
}

#[test]
fn test_manual_activation_waits_for_start() {
    let engine = engine_with(manual_model());
    let started = engine.start_case("manual", Default::default()).unwrap();
    let case = started.case;

    assert_eq!(started.outcome.created_tasks().len(), 1);
    let approve = live_item(&engine, &case.id, "approve");
    assert_eq!(approve.state, PlanItemState::Enabled);
    assert!(approve.human_task_id.is_none());

    let outcome = engine.start_plan_item(&approve.id).unwrap();
    assert_eq!(outcome.created_tasks().len(), 1);
    assert_eq!(active_task_names(&engine, &case.id), vec!["Approve", "Work"]);

    complete_all_tasks(&engine, &case.id);
    assert_eq!(case_state(&engine, &case.id), CaseState::Completed);
}

#[test]
fn test_disable_and_enable() {
    let engine = engine_with(manual_model());
    let case = start(&engine, "manual");
    let approve = live_item(&engine, &case.id, "approve");
    let work = live_item(&engine, &case.id, "work");

    engine.disable_plan_item(&approve.id).unwrap();
    assert_eq!(
        engine.plan_item_instance(&approve.id).unwrap().state,
        PlanItemState::Disabled
    );
    assert!(matches!(
        engine.start_plan_item(&approve.id),
        Err(CaseError::InvalidState { .. })
    ));
    assert!(matches!(
        engine.enable_plan_item(&work.id),
        Err(CaseError::InvalidState { .. })
    ));

    engine.enable_plan_item(&approve.id).unwrap();
    assert_eq!(
        engine.plan_item_instance(&approve.id).unwrap().state,
        PlanItemState::Enabled
    );
}

#[test]
fn test_disabled_item_does_not_block_completion() {
    let engine = engine_with(manual_model());
    let case = start(&engine, "manual");
    let approve = live_item(&engine, &case.id, "approve");

    engine.disable_plan_item(&approve.id).unwrap();
    assert_eq!(case_state(&engine, &case.id), CaseState::Active);

    let outcome = complete_task_named(&engine, &case.id, "Work");
    assert!(outcome.case_ended());
    assert_eq!(
        engine.plan_item_instance(&approve.id).unwrap().state,
        PlanItemState::Terminated
    );
}

// ---------------------------------------------------------------------------
// Milestones
// ---------------------------------------------------------------------------

#[test]
fn test_milestone_occurs_on_entry() {
    let engine = engine_with(model(
        "milestone",
        vec![
            PlanItemDefinition::human_task("draft", "Draft"),
            PlanItemDefinition::human_task("publish", "Publish"),
            PlanItemDefinition::milestone("drafted", "Drafted")
                .with_entry(Sentry::on("afterDraft", OnPart::complete("draft"))),
        ],
    ));
    let case = start(&engine, "milestone");

    let milestone = live_item(&engine, &case.id, "drafted");
    assert!(matches!(
        engine.trigger_plan_item(&milestone.id),
        Err(CaseError::InvalidState { .. })
    ));

    complete_task_named(&engine, &case.id, "Draft");

    assert_eq!(
        engine.plan_item_instance(&milestone.id).unwrap().state,
        PlanItemState::Completed
    );
    let transitions: Vec<PlanItemTransition> = engine
        .history(&case.id)
        .unwrap()
        .into_iter()
        .filter(|e| e.plan_item_id.as_str() == "drafted")
        .map(|e| e.transition)
        .collect();
    assert_eq!(
        transitions,
        vec![PlanItemTransition::Create, PlanItemTransition::Occur]
    );
    assert_eq!(case_state(&engine, &case.id), CaseState::Active);
}

// ---------------------------------------------------------------------------
// Suspension
// ---------------------------------------------------------------------------

fn suspension_model() -> CaseDefinition {
    model(
        "suspension",
        vec![
            PlanItemDefinition::stage("stage", "Stage"),
            PlanItemDefinition::human_task("work", "Work").in_stage("stage"),
            PlanItemDefinition::user_event_listener("release", "Release").in_stage("stage"),
            PlanItemDefinition::human_task("followUp", "Follow up")
                .in_stage("stage")
                .with_entry(Sentry::on("released", OnPart::occur("release"))),
        ],
    )
}

#[test]
fn test_suspended_stage_freezes_children() {
    let engine = engine_with(suspension_model());
    let case = start(&engine, "suspension");
    let stage = live_item(&engine, &case.id, "stage");
    let work = live_item(&engine, &case.id, "work");
    let release = live_item(&engine, &case.id, "release");

    engine.suspend_plan_item(&stage.id).unwrap();

    for element in ["stage", "work", "release", "followUp"] {
        assert_eq!(
            live_item(&engine, &case.id, element).state,
            PlanItemState::Suspended,
            "{} should be suspended",
            element
        );
    }
    assert_eq!(
        engine
            .create_user_event_listener_instance_query()
            .case_instance_id(&case.id)
            .state_suspended()
            .count()
            .unwrap(),
        1
    );
    assert!(matches!(
        engine.complete_user_event_listener(&release.id),
        Err(CaseError::InvalidState { .. })
    ));
    assert!(matches!(
        engine.resume_plan_item(&work.id),
        Err(CaseError::InvalidState { .. })
    ));

    engine.resume_plan_item(&stage.id).unwrap();
    assert_eq!(live_item(&engine, &case.id, "stage").state, PlanItemState::Active);
    assert_eq!(live_item(&engine, &case.id, "work").state, PlanItemState::Active);
    assert_eq!(
        live_item(&engine, &case.id, "release").state,
        PlanItemState::Available
    );
    assert_eq!(
        live_item(&engine, &case.id, "followUp").state,
        PlanItemState::Available
    );

    complete_listener_named(&engine, &case.id, "Release");
    assert_eq!(active_task_names(&engine, &case.id), vec!["Follow up", "Work"]);
}

#[test]
fn test_entry_observed_while_suspended_fires_on_resume() {
    let engine = engine_with(model(
        "suspendedEntry",
        vec![
            PlanItemDefinition::user_event_listener("go", "Go"),
            PlanItemDefinition::human_task("guarded", "Guarded")
                .with_entry(Sentry::on("onGo", OnPart::occur("go"))),
            PlanItemDefinition::human_task("keep", "Keep"),
        ],
    ));
    let case = start(&engine, "suspendedEntry");
    let guarded = live_item(&engine, &case.id, "guarded");

    engine.suspend_plan_item(&guarded.id).unwrap();
    complete_listener_named(&engine, &case.id, "Go");
    assert_eq!(
        engine.plan_item_instance(&guarded.id).unwrap().state,
        PlanItemState::Suspended
    );

    let outcome = engine.resume_plan_item(&guarded.id).unwrap();
    assert_eq!(outcome.created_tasks().len(), 1);
    assert_eq!(active_task_names(&engine, &case.id), vec!["Guarded", "Keep"]);
}

// ---------------------------------------------------------------------------
// Explicit stage completion
// ---------------------------------------------------------------------------

fn explicit_completion_model(optional_required: bool) -> CaseDefinition {
    let optional = PlanItemDefinition::human_task("optional", "Optional")
        .in_stage("stage")
        .with_entry(Sentry::on("more", OnPart::occur("more")));
    model(
        "explicitCompletion",
        vec![
            PlanItemDefinition::user_event_listener("more", "More"),
            PlanItemDefinition::stage("stage", "Stage"),
            PlanItemDefinition::human_task("main", "Main").in_stage("stage"),
            if optional_required {
                optional.required()
            } else {
                optional
            },
        ],
    )
}

#[test]
fn test_trigger_completes_stage_with_optional_children() {
    let engine = engine_with(explicit_completion_model(false));
    let case = start(&engine, "explicitCompletion");
    let stage = live_item(&engine, &case.id, "stage");

    assert!(matches!(
        engine.trigger_plan_item(&stage.id),
        Err(CaseError::InvalidState { .. })
    ));

    complete_task_named(&engine, &case.id, "Main");
    assert_eq!(live_item(&engine, &case.id, "stage").state, PlanItemState::Active);

    let outcome = engine.trigger_plan_item(&stage.id).unwrap();
    assert!(outcome.case_ended());
    assert_eq!(
        states_of(&engine, &case.id, "optional"),
        vec![PlanItemState::Terminated]
    );
    assert_eq!(
        states_of(&engine, &case.id, "more"),
        vec![PlanItemState::Terminated]
    );
}

#[test]
fn test_trigger_refused_while_required_child_open() {
    let engine = engine_with(explicit_completion_model(true));
    let case = start(&engine, "explicitCompletion");
    let stage = live_item(&engine, &case.id, "stage");

    complete_task_named(&engine, &case.id, "Main");
    let before = engine.case_instance(&case.id).unwrap().revision;

    assert!(matches!(
        engine.trigger_plan_item(&stage.id),
        Err(CaseError::InvalidState { .. })
    ));
    assert_eq!(engine.case_instance(&case.id).unwrap().revision, before);
}

#[test]
fn test_autocomplete_case_plan_model() {
    let definition = model(
        "autocompleteCase",
        vec![
            PlanItemDefinition::user_event_listener("extra", "Extra"),
            PlanItemDefinition::human_task("bonus", "Bonus")
                .with_entry(Sentry::on("onExtra", OnPart::occur("extra"))),
            PlanItemDefinition::human_task("main", "Main"),
        ],
    )
    .autocomplete();
    let engine = engine_with(definition);
    let case = start(&engine, "autocompleteCase");

    let outcome = complete_task_named(&engine, &case.id, "Main");
    assert!(outcome.case_ended());
    assert_eq!(case_state(&engine, &case.id), CaseState::Completed);
}

// ---------------------------------------------------------------------------
// Ending the case
// ---------------------------------------------------------------------------

fn case_exit_model() -> CaseDefinition {
    model(
        "caseExit",
        vec![
            PlanItemDefinition::user_event_listener("cancel", "Cancel"),
            PlanItemDefinition::human_task("taskA", "A"),
            PlanItemDefinition::human_task("taskB", "B"),
        ],
    )
    .with_exit(Sentry::on("cancelled", OnPart::occur("cancel")))
    .with_exit(Sentry::new("aborted").with_if("abort"))
}

#[test]
fn test_case_exit_on_listener() {
    let engine = engine_with(case_exit_model());
    let case = start(&engine, "caseExit");
    let task_a = live_item(&engine, &case.id, "taskA");

    let outcome = complete_listener_named(&engine, &case.id, "Cancel");

    assert_eq!(outcome.case_state, CaseState::Terminated);
    let removed = outcome
        .effects
        .iter()
        .filter(|e| matches!(e, CaseEffect::HumanTaskRemoved { .. }))
        .count();
    assert_eq!(removed, 2);
    assert_eq!(
        outcome.effects.last(),
        Some(&CaseEffect::CaseEnded {
            case_instance_id: case.id.clone(),
            state: CaseState::Terminated,
        })
    );
    assert!(live_items(&engine, &case.id).is_empty());

    let err = engine
        .complete_task(task_a.human_task_id.as_ref().unwrap())
        .unwrap_err();
    assert!(err.is_already_terminal());
    assert!(matches!(
        engine.set_variable(&case.id, "x", json!(1)),
        Err(CaseError::CaseEnded(_))
    ));
}

#[test]
fn test_case_exit_on_condition() {
    let engine = engine_with(case_exit_model());
    let case = start(&engine, "caseExit");

    let outcome = engine.set_variable(&case.id, "abort", json!(true)).unwrap();

    assert_eq!(outcome.case_state, CaseState::Terminated);
    assert_eq!(case_state(&engine, &case.id), CaseState::Terminated);
    assert!(engine.case_instance(&case.id).unwrap().ended_at.is_some());
}

#[test]
fn test_terminate_case() {
    let engine = engine_with(model(
        "terminateCase",
        vec![
            PlanItemDefinition::timer_event_listener("deadline", "Deadline", "P1D"),
            PlanItemDefinition::human_task("work", "Work")
                .with_exit(Sentry::on("late", OnPart::occur("deadline"))),
        ],
    ));
    let case = start(&engine, "terminateCase");
    let timer = live_item(&engine, &case.id, "deadline");

    let outcome = engine.terminate_case(&case.id).unwrap();

    assert_eq!(outcome.case_state, CaseState::Terminated);
    assert_eq!(outcome.cancelled_timers(), vec![&timer.id]);
    assert!(outcome
        .effects
        .iter()
        .any(|e| matches!(e, CaseEffect::HumanTaskRemoved { .. })));
    assert!(outcome.effects.iter().any(CaseEffect::is_case_ended));

    assert!(matches!(
        engine.terminate_case(&case.id),
        Err(CaseError::CaseEnded(_))
    ));
    assert_eq!(
        engine
            .create_case_instance_query()
            .state(CaseState::Terminated)
            .count()
            .unwrap(),
        1
    );
    assert_eq!(engine.create_case_instance_query().active().count().unwrap(), 0);
}

#[test]
fn test_timer_fires_exit() {
    let engine = engine_with(model(
        "timerExit",
        vec![
            PlanItemDefinition::timer_event_listener("deadline", "Deadline", "P1D"),
            PlanItemDefinition::human_task("work", "Work")
                .with_exit(Sentry::on("late", OnPart::occur("deadline"))),
        ],
    ));
    let case = start(&engine, "timerExit");
    let timer = live_item(&engine, &case.id, "deadline");

    let outcome = engine.fire_timer(&timer.id).unwrap();

    // The scheduler ran the job; nothing is left to cancel
    assert!(outcome.cancelled_timers().is_empty());
    assert!(outcome.case_ended());
    assert_eq!(
        states_of(&engine, &case.id, "work"),
        vec![PlanItemState::Terminated]
    );
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

#[test]
fn test_history_sequence_spans_operations() {
    let engine = engine_with(manual_model());
    let case = start(&engine, "manual");
    complete_task_named(&engine, &case.id, "Work");

    let history = engine.history(&case.id).unwrap();
    let sequences: Vec<u64> = history.iter().map(|e| e.sequence).collect();
    let expected: Vec<u64> = (0..history.len() as u64).collect();
    assert_eq!(sequences, expected);

    let created = history
        .iter()
        .filter(|e| e.transition == PlanItemTransition::Create)
        .count();
    assert_eq!(created, 2);
    assert!(history
        .iter()
        .filter(|e| e.transition == PlanItemTransition::Create)
        .all(|e| e.from.is_none()));
}

#[test]
fn test_history_can_be_disabled() {
    init_tracing();
    let engine = CaseEngine::with_config(EngineConfig::default().with_record_history(false));
    engine.register_definition(manual_model()).unwrap();

    let started = engine.start_case("manual", Default::default()).unwrap();

    assert!(!started.outcome.transitions.is_empty());
    assert!(engine.history(&started.case.id).unwrap().is_empty());

    // Sequence numbers keep counting across operations
    let last_started = started.outcome.transitions.last().unwrap().sequence;
    let approve = live_item(&engine, &started.case.id, "approve");
    let outcome = engine.start_plan_item(&approve.id).unwrap();
    let sequences: Vec<u64> = outcome.transitions.iter().map(|t| t.sequence).collect();
    assert!(!sequences.is_empty());
    assert_eq!(sequences[0], last_started + 1);
    assert!(sequences.windows(2).all(|w| w[1] == w[0] + 1));
    assert!(engine.history(&started.case.id).unwrap().is_empty());
}
