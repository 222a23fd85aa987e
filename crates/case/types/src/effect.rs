//! Effects handed to external collaborators once an operation commits
//!
//! The engine never calls the human task subsystem or the job scheduler
//! directly. It records what they need to do and returns the list with the
//! committed outcome, so discarded work never leaks out.

use crate::{
    CaseInstanceId, CaseState, HistoryEntry, HumanTaskId, PlanItemId, PlanItemInstanceId,
};
use serde::{Deserialize, Serialize};

/// A request for an external collaborator
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CaseEffect {
    /// A human task became active; create the work-list item
    HumanTaskCreated {
        task_id: HumanTaskId,
        plan_item_instance_id: PlanItemInstanceId,
        plan_item_id: PlanItemId,
        name: String,
    },
    /// A human task left ACTIVE other than through `complete_task`/`terminate_task`
    HumanTaskRemoved {
        task_id: HumanTaskId,
        plan_item_instance_id: PlanItemInstanceId,
    },
    /// A timer listener was created; schedule its job
    TimerScheduled {
        plan_item_instance_id: PlanItemInstanceId,
        plan_item_id: PlanItemId,
        timer_expression: String,
    },
    /// A timer listener ended before firing; cancel its job
    TimerCancelled {
        plan_item_instance_id: PlanItemInstanceId,
    },
    CaseEnded {
        case_instance_id: CaseInstanceId,
        state: CaseState,
    },
}

impl CaseEffect {
    pub fn is_case_ended(&self) -> bool {
        matches!(self, Self::CaseEnded { .. })
    }
}

/// Result of one committed operation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OperationOutcome {
    pub case_instance_id: CaseInstanceId,
    /// Revision the case was saved with
    pub revision: u64,
    pub case_state: CaseState,
    /// Effects for collaborators, in the order they were produced
    pub effects: Vec<CaseEffect>,
    /// Transitions applied by the operation, in order
    pub transitions: Vec<HistoryEntry>,
}

impl OperationOutcome {
    pub fn case_ended(&self) -> bool {
        self.case_state.is_ended()
    }

    /// Work-list items created by the operation
    pub fn created_tasks(&self) -> Vec<&HumanTaskId> {
        self.effects
            .iter()
            .filter_map(|e| match e {
                CaseEffect::HumanTaskCreated { task_id, .. } => Some(task_id),
                _ => None,
            })
            .collect()
    }

    pub fn cancelled_timers(&self) -> Vec<&PlanItemInstanceId> {
        self.effects
            .iter()
            .filter_map(|e| match e {
                CaseEffect::TimerCancelled {
                    plan_item_instance_id,
                } => Some(plan_item_instance_id),
                _ => None,
            })
            .collect()
    }
}
