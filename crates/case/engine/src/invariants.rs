//! Structural invariants checked before an operation commits
//!
//! A violation means the engine itself is wrong. The operation is aborted
//! and nothing is saved.

use crate::orphan_collector::OrphanCollector;
use crate::stage_completion::StageCompletion;
use case_types::*;

/// Verify the settled case graph
pub fn verify(case: &CaseInstance, definition: &CaseDefinition) -> CaseResult<()> {
    for (position, item) in case.plan_items.iter().enumerate() {
        if item.idx.0 != position {
            return violation(format!("{} stored at position {}", item.idx, position));
        }
        if item.case_instance_id != case.id {
            return violation(format!(
                "plan item {} belongs to case {}",
                item.id, item.case_instance_id
            ));
        }

        if let Some(parent_idx) = item.parent {
            let parent = case.get(parent_idx)?;
            if !parent.kind.is_container() || !parent.children.contains(&item.idx) {
                return violation(format!("{} is not linked from its parent {}", item.id, parent.id));
            }
            if parent.is_terminal() && item.is_live() {
                return violation(format!(
                    "{} is {} inside ended stage {}",
                    item.id, item.state, parent.id
                ));
            }
        }
        for child in &item.children {
            if case.get(*child)?.parent != Some(item.idx) {
                return violation(format!("child {} of {} points elsewhere", child, item.id));
            }
        }

        let plan_item = definition.require(&item.plan_item_id)?;
        if item.state == PlanItemState::WaitingForRepetition && !plan_item.is_repeating() {
            return violation(format!("{} waits for repetition but does not repeat", item.id));
        }
        if item.kind == PlanItemKind::HumanTask
            && item.effective_state() == PlanItemState::Active
            && item.human_task_id.is_none()
        {
            return violation(format!("active human task {} has no task id", item.id));
        }
        if item.state == PlanItemState::Suspended && item.state_before_suspension.is_none() {
            return violation(format!("{} is suspended without a prior state", item.id));
        }
    }

    if case.is_ended() {
        if let Some(live) = case.live_items().next() {
            return violation(format!(
                "case {} ended while {} is {}",
                case.id, live.id, live.state
            ));
        }
        return Ok(());
    }

    let completion = StageCompletion::new();
    for item in case.plan_items.iter() {
        if item.kind.is_container() && item.state == PlanItemState::Completed {
            // Children of a completed stage were ended with it
            if !completion.is_completable(case, definition, Some(item.idx), true)? {
                return violation(format!("stage {} completed with open children", item.id));
            }
        }
    }

    let orphans = OrphanCollector::new().find_orphans(case, definition)?;
    if let Some(orphan) = orphans.first() {
        return violation(format!("orphaned listener {} survived the operation", orphan));
    }

    Ok(())
}

fn violation(message: String) -> CaseResult<()> {
    tracing::warn!(%message, "Invariant violation");
    Err(CaseError::InvariantViolation(message))
}
