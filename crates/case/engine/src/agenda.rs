//! Agenda: drives an operation to a quiescent state
//!
//! Every operation ends by settling the case. A pass delivers queued on-part
//! events, evaluates the instances whose memory or variables changed and
//! applies all satisfied sentries together. When no sentry fires the pass
//! removes orphaned listeners, and when there are none it completes the
//! innermost completable container. The loop stops once a pass finds
//! nothing to do or the case has ended.

use crate::orphan_collector::OrphanCollector;
use crate::sentry_evaluator::{PlanItemEvent, SentryEvaluator};
use crate::stage_completion::{Completable, StageCompletion};
use crate::unit_of_work::UnitOfWork;
use case_types::*;
use std::collections::{BTreeSet, VecDeque};

/// Pending work of one operation
#[derive(Clone, Debug)]
pub struct Agenda {
    events: VecDeque<PlanItemEvent>,
    dirty: BTreeSet<PlanItemIdx>,
    root_dirty: bool,
    passes: usize,
    max_passes: usize,
}

impl Agenda {
    pub fn new(max_passes: usize) -> Self {
        Self {
            events: VecDeque::new(),
            dirty: BTreeSet::new(),
            root_dirty: false,
            passes: 0,
            max_passes,
        }
    }

    pub fn push_event(&mut self, event: PlanItemEvent) {
        self.events.push_back(event);
    }

    /// Queue an instance for sentry evaluation in the next pass
    pub fn mark_dirty(&mut self, idx: PlanItemIdx) {
        self.dirty.insert(idx);
    }

    /// Queue the case plan model's exit sentries for evaluation
    pub fn mark_root_dirty(&mut self) {
        self.root_dirty = true;
    }

    pub fn take_events(&mut self) -> Vec<PlanItemEvent> {
        self.events.drain(..).collect()
    }

    pub fn take_dirty(&mut self) -> Vec<PlanItemIdx> {
        std::mem::take(&mut self.dirty).into_iter().collect()
    }

    pub fn take_root_dirty(&mut self) -> bool {
        std::mem::take(&mut self.root_dirty)
    }

    pub fn is_idle(&self) -> bool {
        self.events.is_empty() && self.dirty.is_empty() && !self.root_dirty
    }

    pub fn passes(&self) -> usize {
        self.passes
    }

    /// Count a pass; a case that never settles is an engine fault
    pub fn begin_pass(&mut self, case_id: &CaseInstanceId) -> CaseResult<usize> {
        self.passes += 1;
        if self.passes > self.max_passes {
            tracing::error!(
                case_instance_id = %case_id,
                max_passes = self.max_passes,
                "Agenda did not settle"
            );
            return Err(CaseError::InvariantViolation(format!(
                "case {} did not settle within {} agenda passes",
                case_id, self.max_passes
            )));
        }
        Ok(self.passes)
    }

    /// Drop pending work once the case has ended
    pub fn clear(&mut self) {
        self.events.clear();
        self.dirty.clear();
        self.root_dirty = false;
    }
}

impl UnitOfWork<'_> {
    /// Run agenda passes until the case is quiescent or has ended
    pub(crate) fn settle(&mut self) -> CaseResult<()> {
        let definition = self.definition;
        let sentries = SentryEvaluator::new(self.evaluator);
        let orphans = OrphanCollector::new();
        let completion = StageCompletion::new();

        loop {
            if self.case.is_ended() {
                self.agenda.clear();
                break;
            }
            let pass = self.agenda.begin_pass(&self.case.id)?;

            for event in self.agenda.take_events() {
                let delivery = sentries.deliver(&mut self.case, definition, &event)?;
                for target in delivery.targets {
                    self.agenda.mark_dirty(target);
                }
                if delivery.root {
                    self.agenda.mark_root_dirty();
                }
            }

            let candidates = self.agenda.take_dirty();
            let root = self.agenda.take_root_dirty();
            let firings = sentries.evaluate(&self.case, definition, &candidates, root)?;

            tracing::trace!(
                case_instance_id = %self.case.id,
                pass,
                candidates = candidates.len(),
                firings = firings.len(),
                "Agenda pass"
            );

            if !firings.is_empty() {
                for firing in firings {
                    self.apply_firing(firing)?;
                    if self.case.is_ended() {
                        break;
                    }
                }
                continue;
            }

            let orphaned = orphans.find_orphans(&self.case, definition)?;
            if !orphaned.is_empty() {
                for idx in orphaned {
                    self.remove_orphan(idx)?;
                }
                continue;
            }

            match completion.next_completable(&self.case, definition)? {
                Some(Completable::Stage(stage)) => {
                    self.complete(stage, CompletionSource::Engine)?;
                }
                Some(Completable::Case) => {
                    self.end_case(CaseState::Completed)?;
                }
                None if self.agenda.is_idle() => break,
                None => {}
            }
        }

        tracing::trace!(
            case_instance_id = %self.case.id,
            passes = self.agenda.passes(),
            "Case settled"
        );
        Ok(())
    }
}

/// Who asked for a completion
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CompletionSource {
    /// The engine completed a container on its own
    Engine,
    /// A caller triggered the instance
    Trigger,
    /// The human task subsystem reported the task done
    TaskSubsystem,
}
