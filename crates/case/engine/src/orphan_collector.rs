//! Orphan collector: finds event listeners no sentry can ever need again
//!
//! A listener referenced by the model is kept while at least one of the
//! sentries observing it could still fire. A sentry can still fire when its
//! owner has a live instance to which it applies, or when the owner may yet
//! be instantiated because an enclosing stage has not activated. Every other
//! on-part of that sentry must be remembered already or still producible.
//! If-parts are ignored since variables may change at any time.
//!
//! Listeners the model never references stand alone and are never collected.
//! Suspended listeners are kept until their stage resumes.

use case_types::*;

/// Scans a case for unreachable listeners
#[derive(Clone, Debug, Default)]
pub struct OrphanCollector;

impl OrphanCollector {
    pub fn new() -> Self {
        Self
    }

    /// Live listeners that are no longer reachable, in arena order
    pub fn find_orphans(
        &self,
        case: &CaseInstance,
        definition: &CaseDefinition,
    ) -> CaseResult<Vec<PlanItemIdx>> {
        let mut orphans = Vec::new();
        if case.is_ended() {
            return Ok(orphans);
        }

        for listener in case.live_items() {
            if !listener.kind.is_listener() || listener.state != PlanItemState::Available {
                continue;
            }
            let references = definition.sentries_referencing(&listener.plan_item_id);
            if references.is_empty() {
                continue;
            }

            let mut reachable = false;
            for reference in &references {
                if self.could_fire(case, definition, listener, reference)? {
                    reachable = true;
                    break;
                }
            }
            if !reachable {
                orphans.push(listener.idx);
            }
        }

        Ok(orphans)
    }

    fn could_fire(
        &self,
        case: &CaseInstance,
        definition: &CaseDefinition,
        listener: &PlanItemInstance,
        reference: &SentryRef,
    ) -> CaseResult<bool> {
        let owner = match &reference.owner {
            SentryOwner::CasePlanModel => return Ok(true),
            SentryOwner::PlanItem(owner) => owner,
        };
        let Some(sentry) = definition.sentry(&reference.owner, reference.kind, &reference.sentry)
        else {
            return Ok(false);
        };

        for target_idx in case.instances_of(owner) {
            let target = case.get(target_idx)?;
            if !target.is_live() {
                continue;
            }
            if reference.kind == CriterionKind::Entry && !target.awaits_entry() {
                continue;
            }
            if !case.shares_scope(definition, listener.idx, target_idx)? {
                continue;
            }
            if self.other_parts_possible(
                case,
                definition,
                sentry,
                reference.kind,
                Some(&target.memory),
                &listener.plan_item_id,
            )? {
                return Ok(true);
            }
        }

        let owner_definition = definition.require(owner)?;
        if self.could_be_created(case, definition, owner_definition)? {
            return self.other_parts_possible(
                case,
                definition,
                sentry,
                reference.kind,
                None,
                &listener.plan_item_id,
            );
        }

        Ok(false)
    }

    fn other_parts_possible(
        &self,
        case: &CaseInstance,
        definition: &CaseDefinition,
        sentry: &Sentry,
        kind: CriterionKind,
        memory: Option<&SentryMemory>,
        listener: &PlanItemId,
    ) -> CaseResult<bool> {
        for (index, part) in sentry.on_parts.iter().enumerate() {
            if &part.source == listener {
                continue;
            }
            let remembered = memory
                .map(|m| m.is_remembered(kind, &sentry.id, index))
                .unwrap_or(false);
            if remembered {
                continue;
            }
            if !self.is_producible(case, definition, &part.source)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Whether some instance of `source` exists or may still come to exist
    fn is_producible(
        &self,
        case: &CaseInstance,
        definition: &CaseDefinition,
        source: &PlanItemId,
    ) -> CaseResult<bool> {
        for idx in case.instances_of(source) {
            if case.get(idx)?.is_live() {
                return Ok(true);
            }
        }
        self.could_be_created(case, definition, definition.require(source)?)
    }

    /// Whether an enclosing stage has yet to activate and create this plan item
    pub fn could_be_created(
        &self,
        case: &CaseInstance,
        definition: &CaseDefinition,
        plan_item: &PlanItemDefinition,
    ) -> CaseResult<bool> {
        let mut current = plan_item;
        for _ in 0..=definition.plan_item_count() {
            let Some(parent_id) = &current.parent else {
                return Ok(false);
            };

            let mut any_live = false;
            for idx in case.instances_of(parent_id) {
                let parent = case.get(idx)?;
                if !parent.is_live() {
                    continue;
                }
                any_live = true;
                if matches!(
                    parent.effective_state(),
                    PlanItemState::Available
                        | PlanItemState::Enabled
                        | PlanItemState::WaitingForRepetition
                ) {
                    return Ok(true);
                }
            }
            if any_live {
                return Ok(false);
            }
            current = definition.require(parent_id)?;
        }
        Ok(false)
    }
}
