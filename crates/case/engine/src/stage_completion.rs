//! Stage completion: decides when containers may complete
//!
//! A container is either a stage instance or the case root. Completion is
//! checked innermost first; the first completable container is returned so
//! the agenda can apply it and deliver the resulting events before looking
//! at the enclosing container.

use case_types::*;
use std::cmp::Reverse;

/// A container ready to complete
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Completable {
    Stage(PlanItemIdx),
    Case,
}

/// Completion rules for stages and the case plan model
#[derive(Clone, Debug, Default)]
pub struct StageCompletion;

impl StageCompletion {
    pub fn new() -> Self {
        Self
    }

    /// Whether the container's children allow it to complete
    ///
    /// Active or suspended children always block, and so do required
    /// children that have not settled. Without autocomplete (and without an
    /// explicit request) every unsettled child blocks.
    pub fn is_completable(
        &self,
        case: &CaseInstance,
        definition: &CaseDefinition,
        container: Option<PlanItemIdx>,
        autocomplete: bool,
    ) -> CaseResult<bool> {
        for child_idx in case.live_children_of(container) {
            let child = case.get(child_idx)?;
            let state = child.state;
            if matches!(state, PlanItemState::Active | PlanItemState::Suspended) {
                return Ok(false);
            }
            if state.is_settled() {
                continue;
            }
            if !autocomplete {
                return Ok(false);
            }
            if definition.require(&child.plan_item_id)?.required {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// The innermost container that should complete on its own, if any
    pub fn next_completable(
        &self,
        case: &CaseInstance,
        definition: &CaseDefinition,
    ) -> CaseResult<Option<Completable>> {
        if case.is_ended() {
            return Ok(None);
        }

        let mut stages: Vec<PlanItemIdx> = case
            .live_items()
            .filter(|p| p.kind.is_container() && p.state == PlanItemState::Active)
            .map(|p| p.idx)
            .collect();
        stages.sort_by_key(|idx| (Reverse(case.depth(*idx)), *idx));

        for stage in stages {
            let item = case.get(stage)?;
            let autocomplete = definition.require(&item.plan_item_id)?.autocomplete;
            if self.is_completable(case, definition, Some(stage), autocomplete)? {
                return Ok(Some(Completable::Stage(stage)));
            }
        }

        if self.is_completable(case, definition, None, definition.autocomplete)? {
            return Ok(Some(Completable::Case));
        }
        Ok(None)
    }
}
