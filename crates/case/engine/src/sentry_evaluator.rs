//! Sentry evaluator: delivers on-part events and finds satisfied sentries
//!
//! Delivery and evaluation are separate steps. Delivery records an event in
//! the sentry memory of every target that observes it. Evaluation is a pure
//! read over the case: it collects every satisfied sentry among the
//! candidates before anything is applied, so the set of firings never
//! depends on the order candidates are visited.

use crate::expression::ExpressionEvaluator;
use case_types::*;

/// An on-part event produced by an applied transition
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlanItemEvent {
    pub source: PlanItemIdx,
    pub transition: PlanItemTransition,
}

/// Targets whose sentry memory changed during delivery
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Delivery {
    pub targets: Vec<PlanItemIdx>,
    /// The case plan model's exit sentries observed the event
    pub root: bool,
}

/// A satisfied sentry, ready to be applied
///
/// The variant order is the application order: a case exit wins over
/// everything, and exits are applied before entries.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SentryFiring {
    ExitCase { sentry: SentryId },
    Exit { target: PlanItemIdx, sentry: SentryId },
    /// `sentry` is None when a container admits an item without entry criteria
    Enter {
        target: PlanItemIdx,
        sentry: Option<SentryId>,
    },
}

/// Evaluates entry and exit criteria against sentry memory and variables
pub struct SentryEvaluator<'a> {
    evaluator: &'a dyn ExpressionEvaluator,
}

impl<'a> SentryEvaluator<'a> {
    pub fn new(evaluator: &'a dyn ExpressionEvaluator) -> Self {
        Self { evaluator }
    }

    /// Record `event` in the memory of every sentry observing it
    ///
    /// An event reaches a target in the same scope, which includes items in
    /// sibling stages but excludes other repetitions of an enclosing stage.
    /// Entry memory is only kept by targets still awaiting entry.
    pub fn deliver(
        &self,
        case: &mut CaseInstance,
        definition: &CaseDefinition,
        event: &PlanItemEvent,
    ) -> CaseResult<Delivery> {
        let source = case.get(event.source)?;
        let source_element = source.plan_item_id.clone();
        let mut delivery = Delivery::default();

        for reference in definition.sentries_referencing(&source_element) {
            let Some(sentry) = definition.sentry(&reference.owner, reference.kind, &reference.sentry)
            else {
                continue;
            };
            let parts = sentry.matching_parts(&source_element, event.transition);
            if parts.is_empty() {
                continue;
            }

            match &reference.owner {
                SentryOwner::CasePlanModel => {
                    if case.is_ended() {
                        continue;
                    }
                    for part in &parts {
                        case.root_memory.remember(reference.kind, &sentry.id, *part);
                    }
                    delivery.root = true;
                }
                SentryOwner::PlanItem(owner) => {
                    for target_idx in case.instances_of(owner) {
                        if target_idx == event.source {
                            continue;
                        }
                        let target = case.get(target_idx)?;
                        if !target.is_live() {
                            continue;
                        }
                        if reference.kind == CriterionKind::Entry && !target.awaits_entry() {
                            continue;
                        }
                        if !case.shares_scope(definition, event.source, target_idx)? {
                            continue;
                        }

                        let target = case.get_mut(target_idx)?;
                        for part in &parts {
                            target.memory.remember(reference.kind, &sentry.id, *part);
                        }
                        tracing::trace!(
                            source = %source_element,
                            transition = %event.transition,
                            target = %owner,
                            sentry = %sentry.id,
                            kind = %reference.kind,
                            "On-part delivered"
                        );
                        if !delivery.targets.contains(&target_idx) {
                            delivery.targets.push(target_idx);
                        }
                    }
                }
            }
        }

        Ok(delivery)
    }

    /// Whether every on-part is remembered and the if-part holds
    pub fn is_satisfied(
        &self,
        sentry: &Sentry,
        kind: CriterionKind,
        memory: &SentryMemory,
        case: &CaseInstance,
    ) -> CaseResult<bool> {
        let parts_done = (0..sentry.on_parts.len())
            .all(|part| memory.is_remembered(kind, &sentry.id, part));
        if !parts_done {
            return Ok(false);
        }
        match &sentry.if_part {
            None => Ok(true),
            Some(if_part) => Ok(self.evaluator.evaluate(&if_part.condition, &case.variables)?),
        }
    }

    /// Collect every firing among `candidates` (and the case plan model when `root`)
    ///
    /// Suspended and ended candidates are skipped. Listeners have no criteria.
    /// The result is sorted in application order.
    pub fn evaluate(
        &self,
        case: &CaseInstance,
        definition: &CaseDefinition,
        candidates: &[PlanItemIdx],
        root: bool,
    ) -> CaseResult<Vec<SentryFiring>> {
        let mut firings = Vec::new();

        if root && !case.is_ended() {
            for sentry in &definition.exit_criteria {
                if self.is_satisfied(sentry, CriterionKind::Exit, &case.root_memory, case)? {
                    firings.push(SentryFiring::ExitCase {
                        sentry: sentry.id.clone(),
                    });
                    break;
                }
            }
        }

        for &idx in candidates {
            let item = case.get(idx)?;
            if !item.is_live() || item.is_suspended() || item.kind.is_listener() {
                continue;
            }
            // A waiting repetition inside a suspended stage stays parked
            if let Some(parent) = item.parent {
                if case.get(parent)?.is_suspended() {
                    continue;
                }
            }
            let plan_item = definition.require(&item.plan_item_id)?;

            let mut exiting = false;
            for sentry in &plan_item.exit_criteria {
                if self.is_satisfied(sentry, CriterionKind::Exit, &item.memory, case)? {
                    firings.push(SentryFiring::Exit {
                        target: idx,
                        sentry: sentry.id.clone(),
                    });
                    exiting = true;
                    break;
                }
            }
            if exiting {
                continue;
            }

            match item.state {
                PlanItemState::Available if !plan_item.has_entry_criteria() => {
                    firings.push(SentryFiring::Enter {
                        target: idx,
                        sentry: None,
                    });
                }
                PlanItemState::Available | PlanItemState::WaitingForRepetition => {
                    let waiting = item.state == PlanItemState::WaitingForRepetition;
                    for sentry in &plan_item.entry_criteria {
                        // The satisfaction that created a waiting successor is already spent
                        if waiting && sentry.is_condition_only() && !item.memory.conditions_armed() {
                            continue;
                        }
                        if self.is_satisfied(sentry, CriterionKind::Entry, &item.memory, case)? {
                            firings.push(SentryFiring::Enter {
                                target: idx,
                                sentry: Some(sentry.id.clone()),
                            });
                            break;
                        }
                    }
                }
                _ => {}
            }
        }

        firings.sort();
        firings.dedup();
        Ok(firings)
    }
}
