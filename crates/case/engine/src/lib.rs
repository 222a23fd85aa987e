//! Case Plan Runtime
//!
//! The case engine drives case instances through the lifecycle of their
//! plan items. It delivers sentry events, activates and terminates plan
//! items, creates repetitions, completes stages and removes event listeners
//! that nothing can ever observe again.
//!
//! # Key Principle
//!
//! **Every operation settles the case before it commits.**
//!
//! A stimulus (a trigger, a task completion, a timer, a variable change) is
//! applied to a private copy of one case. The agenda then runs until no
//! sentry fires, no orphan is left and no container can complete. Only the
//! settled result is stored, together with the effects for the human task
//! subsystem and the job scheduler.
//!
//! # Architecture
//!
//! The [`CaseEngine`] composes specialized components:
//!
//! - [`DefinitionRegistry`]: Stores versioned case definitions
//! - [`StateMachine`]: Transition guards for plan item instances
//! - [`SentryEvaluator`]: Delivers on-part events and finds satisfied sentries
//! - [`StageCompletion`]: Decides when stages and the case complete
//! - [`OrphanCollector`]: Finds listeners no sentry can use any more
//! - [`RepetitionController`]: Creates successors of repeating plan items
//! - [`HistoryRecorder`]: Records every applied transition
//! - [`CaseRepository`]: Storage seam with optimistic revisions
//!
//! # Example
//!
//! ```rust
//! use case_engine::CaseEngine;
//! use case_types::*;
//! use std::collections::BTreeMap;
//!
//! let engine = CaseEngine::new();
//!
//! let definition = CaseDefinition::new("review", "Document Review")
//!     .with_plan_item(PlanItemDefinition::user_event_listener("approve", "Approve"))
//!     .unwrap()
//!     .with_plan_item(
//!         PlanItemDefinition::human_task("publish", "Publish")
//!             .with_entry(Sentry::on("afterApproval", OnPart::occur("approve"))),
//!     )
//!     .unwrap();
//! engine.register_definition(definition).unwrap();
//!
//! let started = engine.start_case("review", BTreeMap::new()).unwrap();
//! let listener = engine
//!     .create_user_event_listener_instance_query()
//!     .case_instance_id(&started.case.id)
//!     .single()
//!     .unwrap()
//!     .unwrap();
//!
//! let outcome = engine.complete_user_event_listener(&listener.id).unwrap();
//! assert_eq!(outcome.created_tasks().len(), 1);
//! ```

#![deny(unsafe_code)]

mod agenda;
pub mod config;
pub mod definition_registry;
pub mod engine;
pub mod expression;
pub mod history;
pub mod invariants;
pub mod orphan_collector;
pub mod query;
pub mod repetition;
pub mod repository;
pub mod sentry_evaluator;
pub mod stage_completion;
pub mod state_machine;
mod unit_of_work;

// Re-export main types
pub use config::EngineConfig;
pub use definition_registry::DefinitionRegistry;
pub use engine::{CaseEngine, StartedCase};
pub use expression::{ExpressionEvaluator, SimpleExpressionEvaluator, Variables};
pub use history::HistoryRecorder;
pub use orphan_collector::OrphanCollector;
pub use query::{
    CaseInstanceQuery, PlanItemInstanceQuery, SortDirection, UserEventListenerInstance,
    UserEventListenerInstanceQuery,
};
pub use repetition::RepetitionController;
pub use repository::{CaseRepository, InMemoryCaseRepository};
pub use sentry_evaluator::SentryEvaluator;
pub use stage_completion::StageCompletion;
pub use state_machine::StateMachine;
