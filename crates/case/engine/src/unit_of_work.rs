//! Unit of work: one operation applied to a private copy of a case
//!
//! An operation loads a case, changes the copy through the primitives below,
//! settles it through the agenda and commits it with the revision it was
//! loaded at. Effects and transitions are buffered here and only leave
//! through [`UnitOfWork::commit`], so an aborted operation leaves no trace.

use crate::agenda::{Agenda, CompletionSource};
use crate::config::EngineConfig;
use crate::expression::ExpressionEvaluator;
use crate::history::HistoryRecorder;
use crate::invariants;
use crate::repetition::{RepetitionController, RepetitionTrigger};
use crate::repository::CaseRepository;
use crate::sentry_evaluator::{PlanItemEvent, SentryFiring};
use crate::stage_completion::StageCompletion;
use crate::state_machine::StateMachine;
use case_types::*;
use chrono::Utc;

/// The working copy of a case for one operation
pub(crate) struct UnitOfWork<'a> {
    pub(crate) case: CaseInstance,
    pub(crate) definition: &'a CaseDefinition,
    pub(crate) evaluator: &'a dyn ExpressionEvaluator,
    pub(crate) agenda: Agenda,
    config: &'a EngineConfig,
    state_machine: StateMachine,
    history: HistoryRecorder,
    effects: Vec<CaseEffect>,
    transitions: Vec<HistoryEntry>,
    /// None while the case has never been stored
    expected_revision: Option<u64>,
}

impl<'a> UnitOfWork<'a> {
    /// Work on a stored case
    pub(crate) fn begin(
        case: CaseInstance,
        definition: &'a CaseDefinition,
        evaluator: &'a dyn ExpressionEvaluator,
        config: &'a EngineConfig,
    ) -> Self {
        let expected_revision = Some(case.revision);
        Self::with_revision(case, definition, evaluator, config, expected_revision)
    }

    /// Work on a case that is inserted on commit
    pub(crate) fn begin_new(
        case: CaseInstance,
        definition: &'a CaseDefinition,
        evaluator: &'a dyn ExpressionEvaluator,
        config: &'a EngineConfig,
    ) -> Self {
        Self::with_revision(case, definition, evaluator, config, None)
    }

    fn with_revision(
        case: CaseInstance,
        definition: &'a CaseDefinition,
        evaluator: &'a dyn ExpressionEvaluator,
        config: &'a EngineConfig,
        expected_revision: Option<u64>,
    ) -> Self {
        let history = HistoryRecorder::new(config.record_history);
        Self {
            case,
            definition,
            evaluator,
            agenda: Agenda::new(config.max_agenda_passes),
            config,
            state_machine: StateMachine::new(),
            history,
            effects: Vec::new(),
            transitions: Vec::new(),
            expected_revision,
        }
    }

    // ── Lookups ──────────────────────────────────────────────────────

    pub(crate) fn resolve(&self, id: &PlanItemInstanceId) -> CaseResult<PlanItemIdx> {
        self.case
            .find(id)
            .ok_or_else(|| CaseError::PlanItemInstanceNotFound(id.clone()))
    }

    pub(crate) fn resolve_task(&self, task_id: &HumanTaskId) -> CaseResult<PlanItemIdx> {
        self.case
            .find_by_task(task_id)
            .ok_or_else(|| CaseError::TaskNotFound(task_id.clone()))
    }

    fn ensure_active(&self) -> CaseResult<()> {
        if self.case.is_ended() {
            return Err(CaseError::CaseEnded(self.case.id.clone()));
        }
        Ok(())
    }

    /// Terminal instances are reported before the case state so that racing
    /// completions stay benign
    fn ensure_operable(&self, idx: PlanItemIdx) -> CaseResult<()> {
        let item = self.case.get(idx)?;
        if item.is_terminal() {
            return Err(CaseError::AlreadyTerminal {
                id: item.id.clone(),
                state: item.state,
            });
        }
        self.ensure_active()
    }

    fn ensure_kind(&self, idx: PlanItemIdx, expected: PlanItemKind) -> CaseResult<()> {
        let item = self.case.get(idx)?;
        if item.kind != expected {
            return Err(CaseError::WrongKind {
                id: item.id.clone(),
                expected: expected.type_name().to_string(),
                actual: item.kind.type_name().to_string(),
            });
        }
        Ok(())
    }

    // ── Transition primitives ────────────────────────────────────────

    /// Apply a checked transition; returns the state it left
    fn apply(
        &mut self,
        idx: PlanItemIdx,
        transition: PlanItemTransition,
        emit: bool,
    ) -> CaseResult<PlanItemState> {
        let to = self.state_machine.check(self.case.get(idx)?, transition)?;
        let now = Utc::now();

        let item = self.case.get_mut(idx)?;
        let from = item.state;
        item.state = to;
        item.last_transition_at = now;
        match transition {
            PlanItemTransition::Suspend => item.state_before_suspension = Some(from),
            PlanItemTransition::Resume => item.state_before_suspension = None,
            _ => {}
        }
        if to.is_terminal() {
            item.ended_at = Some(now);
            item.memory.clear();
        }
        let snapshot = item.clone();

        tracing::debug!(
            case_instance_id = %self.case.id,
            plan_item = %snapshot.plan_item_id,
            instance = %snapshot.id,
            %transition,
            %from,
            %to,
            "Plan item transition"
        );

        self.record(&snapshot, transition, Some(from));
        if emit {
            self.agenda.push_event(PlanItemEvent {
                source: idx,
                transition,
            });
        }
        Ok(from)
    }

    fn record(
        &mut self,
        item: &PlanItemInstance,
        transition: PlanItemTransition,
        from: Option<PlanItemState>,
    ) {
        let entry = self.history.record(&mut self.case, item, transition, from);
        self.transitions.push(entry);
    }

    /// Create an instance of `plan_item` in `parent` and queue it for evaluation
    fn create(
        &mut self,
        plan_item: &PlanItemDefinition,
        parent: Option<PlanItemIdx>,
        state: PlanItemState,
        repetition_counter: u32,
    ) -> CaseResult<PlanItemIdx> {
        // Items created inside a suspended stage wait for its resumption
        let parent_suspended = match parent {
            Some(parent) => self.case.get(parent)?.is_suspended(),
            None => false,
        };
        let (state, state_before_suspension) = if parent_suspended {
            (PlanItemState::Suspended, Some(state))
        } else {
            (state, None)
        };

        let now = Utc::now();
        let idx = self.case.push(PlanItemInstance {
            id: PlanItemInstanceId::generate(),
            idx: PlanItemIdx(0),
            case_instance_id: self.case.id.clone(),
            case_definition_id: self.case.definition_id.clone(),
            plan_item_id: plan_item.id.clone(),
            definition_ref: plan_item.definition_ref.clone(),
            name: plan_item.name.clone(),
            kind: plan_item.kind,
            parent,
            stage_instance_id: None,
            children: Vec::new(),
            state,
            state_before_suspension,
            memory: SentryMemory::new(),
            repetition_counter,
            human_task_id: None,
            created_at: now,
            last_transition_at: now,
            ended_at: None,
        })?;
        let snapshot = self.case.get(idx)?.clone();

        tracing::debug!(
            case_instance_id = %self.case.id,
            plan_item = %plan_item.id,
            instance = %snapshot.id,
            %state,
            "Plan item created"
        );

        self.record(&snapshot, PlanItemTransition::Create, None);
        if plan_item.kind == PlanItemKind::TimerEventListener {
            if let Some(expression) = &plan_item.timer_expression {
                self.effects.push(CaseEffect::TimerScheduled {
                    plan_item_instance_id: snapshot.id.clone(),
                    plan_item_id: plan_item.id.clone(),
                    timer_expression: expression.clone(),
                });
            }
        }
        self.agenda.push_event(PlanItemEvent {
            source: idx,
            transition: PlanItemTransition::Create,
        });
        self.agenda.mark_dirty(idx);
        Ok(idx)
    }

    /// Instantiate the plan items directly inside `container` (None is the case root)
    fn create_children(&mut self, container: Option<PlanItemIdx>) -> CaseResult<()> {
        let definition = self.definition;
        let container_id = match container {
            Some(idx) => Some(self.case.get(idx)?.plan_item_id.clone()),
            None => None,
        };
        for child in definition.children_of(container_id.as_ref()) {
            self.create(child, container, PlanItemState::Available, 1)?;
        }
        Ok(())
    }

    fn create_successor(
        &mut self,
        idx: PlanItemIdx,
        state: PlanItemState,
    ) -> CaseResult<Option<PlanItemIdx>> {
        let definition = self.definition;
        let item = self.case.get(idx)?;
        let plan_item = definition.require(&item.plan_item_id)?;
        if let Some(parent) = item.parent {
            if !self.case.get(parent)?.is_live() {
                return Ok(None);
            }
        }
        if !RepetitionController::new(self.evaluator).allows_successor(&self.case, plan_item, item)? {
            return Ok(None);
        }
        let parent = item.parent;
        let counter = item.repetition_counter + 1;

        let successor = self.create(plan_item, parent, state, counter)?;
        tracing::debug!(
            case_instance_id = %self.case.id,
            plan_item = %plan_item.id,
            repetition = counter,
            "Repetition successor created"
        );
        Ok(Some(successor))
    }

    fn repeat_after_completion(&mut self, idx: PlanItemIdx) -> CaseResult<()> {
        let definition = self.definition;
        let plan_item = definition.require(&self.case.get(idx)?.plan_item_id)?;
        let controller = RepetitionController::new(self.evaluator);
        if let Some(state) = controller.successor_state(plan_item, RepetitionTrigger::Completed) {
            self.create_successor(idx, state)?;
        }
        Ok(())
    }

    /// Entry satisfied (or the container admitted the item)
    fn activate(&mut self, idx: PlanItemIdx) -> CaseResult<()> {
        let definition = self.definition;
        let plan_item = definition.require(&self.case.get(idx)?.plan_item_id)?;
        self.case
            .get_mut(idx)?
            .memory
            .clear_kind(CriterionKind::Entry);

        let controller = RepetitionController::new(self.evaluator);
        if let Some(state) = controller.successor_state(plan_item, RepetitionTrigger::Activated) {
            self.create_successor(idx, state)?;
        }

        if plan_item.kind.behavior().completes_on_start {
            self.apply(idx, PlanItemTransition::Occur, true)?;
            return self.repeat_after_completion(idx);
        }
        if plan_item.manual_activation {
            self.apply(idx, PlanItemTransition::Enable, true)?;
            return Ok(());
        }
        self.start(idx, PlanItemTransition::Start)
    }

    fn start(&mut self, idx: PlanItemIdx, transition: PlanItemTransition) -> CaseResult<()> {
        self.apply(idx, transition, true)?;

        let item = self.case.get(idx)?;
        let kind = item.kind;
        match kind {
            PlanItemKind::HumanTask => {
                let task_id = HumanTaskId::generate();
                let effect = CaseEffect::HumanTaskCreated {
                    task_id: task_id.clone(),
                    plan_item_instance_id: item.id.clone(),
                    plan_item_id: item.plan_item_id.clone(),
                    name: item.name.clone(),
                };
                tracing::debug!(
                    case_instance_id = %self.case.id,
                    instance = %item.id,
                    task_id = %task_id,
                    "Human task created"
                );
                self.case.get_mut(idx)?.human_task_id = Some(task_id);
                self.effects.push(effect);
            }
            PlanItemKind::Stage => self.create_children(Some(idx))?,
            _ => {}
        }
        Ok(())
    }

    pub(crate) fn complete(&mut self, idx: PlanItemIdx, source: CompletionSource) -> CaseResult<()> {
        let item = self.case.get(idx)?;
        self.state_machine
            .check(item, PlanItemTransition::Complete)?;
        let is_container = item.kind.is_container();
        let task_id = item.human_task_id.clone();
        let instance_id = item.id.clone();

        if is_container {
            for child in self.case.live_children_of(Some(idx)) {
                if self.case.get(child)?.is_live() {
                    self.terminate(child, PlanItemTransition::ParentTerminate, true)?;
                }
            }
        }
        self.apply(idx, PlanItemTransition::Complete, true)?;

        if source == CompletionSource::Trigger {
            if let Some(task_id) = task_id {
                self.effects.push(CaseEffect::HumanTaskRemoved {
                    task_id,
                    plan_item_instance_id: instance_id,
                });
            }
        }
        if is_container && source == CompletionSource::Engine {
            tracing::debug!(
                case_instance_id = %self.case.id,
                stage = %self.case.get(idx)?.plan_item_id,
                "Stage completed"
            );
        }
        self.repeat_after_completion(idx)
    }

    fn occur(&mut self, idx: PlanItemIdx, cancel_timer: bool) -> CaseResult<()> {
        let item = self.case.get(idx)?;
        let is_timer = item.kind == PlanItemKind::TimerEventListener;
        let instance_id = item.id.clone();

        self.apply(idx, PlanItemTransition::Occur, true)?;
        if is_timer && cancel_timer {
            self.effects.push(CaseEffect::TimerCancelled {
                plan_item_instance_id: instance_id,
            });
        }
        Ok(())
    }

    /// End an instance and every live descendant
    fn terminate(
        &mut self,
        idx: PlanItemIdx,
        transition: PlanItemTransition,
        notify_task: bool,
    ) -> CaseResult<()> {
        let descendants = self.case.descendants_of(idx);
        self.end_item(idx, transition, true, notify_task)?;
        for descendant in descendants {
            if self.case.get(descendant)?.is_live() {
                self.end_item(descendant, PlanItemTransition::ParentTerminate, true, true)?;
            }
        }
        Ok(())
    }

    fn end_item(
        &mut self,
        idx: PlanItemIdx,
        transition: PlanItemTransition,
        emit: bool,
        notify_task: bool,
    ) -> CaseResult<()> {
        let item = self.case.get(idx)?;
        let open_task = if notify_task
            && item.kind == PlanItemKind::HumanTask
            && item.effective_state() == PlanItemState::Active
        {
            item.human_task_id.clone()
        } else {
            None
        };
        let is_timer = item.kind == PlanItemKind::TimerEventListener;
        let instance_id = item.id.clone();

        self.apply(idx, transition, emit)?;

        if let Some(task_id) = open_task {
            self.effects.push(CaseEffect::HumanTaskRemoved {
                task_id,
                plan_item_instance_id: instance_id.clone(),
            });
        }
        if is_timer {
            self.effects.push(CaseEffect::TimerCancelled {
                plan_item_instance_id: instance_id,
            });
        }
        Ok(())
    }

    /// Orphans end silently: no on-part event is produced
    pub(crate) fn remove_orphan(&mut self, idx: PlanItemIdx) -> CaseResult<()> {
        let item = self.case.get(idx)?;
        tracing::debug!(
            case_instance_id = %self.case.id,
            plan_item = %item.plan_item_id,
            instance = %item.id,
            "Orphaned listener removed"
        );
        self.end_item(idx, PlanItemTransition::Terminate, false, true)
    }

    pub(crate) fn end_case(&mut self, state: CaseState) -> CaseResult<()> {
        let live: Vec<PlanItemIdx> = self.case.live_items().map(|p| p.idx).collect();
        for idx in live {
            if self.case.get(idx)?.is_live() {
                self.end_item(idx, PlanItemTransition::ParentTerminate, false, true)?;
            }
        }

        self.case.state = state;
        self.case.ended_at = Some(Utc::now());
        self.case.root_memory.clear();
        self.agenda.clear();
        self.effects.push(CaseEffect::CaseEnded {
            case_instance_id: self.case.id.clone(),
            state,
        });

        tracing::info!(
            case_instance_id = %self.case.id,
            definition = %self.case.definition_key,
            state = ?state,
            "Case ended"
        );
        Ok(())
    }

    pub(crate) fn apply_firing(&mut self, firing: SentryFiring) -> CaseResult<()> {
        match firing {
            SentryFiring::ExitCase { sentry } => {
                tracing::debug!(
                    case_instance_id = %self.case.id,
                    %sentry,
                    "Case exit sentry fired"
                );
                self.end_case(CaseState::Terminated)
            }
            SentryFiring::Exit { target, sentry } => {
                let item = self.case.get(target)?;
                if !item.is_live() {
                    return Ok(());
                }
                tracing::debug!(
                    case_instance_id = %self.case.id,
                    plan_item = %item.plan_item_id,
                    %sentry,
                    "Exit sentry fired"
                );
                self.terminate(target, PlanItemTransition::Exit, true)
            }
            SentryFiring::Enter { target, sentry } => {
                let item = self.case.get(target)?;
                // An exit applied earlier in the pass may have ended it
                if !matches!(
                    item.state,
                    PlanItemState::Available | PlanItemState::WaitingForRepetition
                ) {
                    return Ok(());
                }
                tracing::debug!(
                    case_instance_id = %self.case.id,
                    plan_item = %item.plan_item_id,
                    sentry = ?sentry,
                    "Entry satisfied"
                );
                self.activate(target)
            }
        }
    }

    // ── Operations ───────────────────────────────────────────────────

    pub(crate) fn start_case(&mut self) -> CaseResult<()> {
        self.create_children(None)
    }

    /// Manual trigger: listeners occur, tasks complete, stages are asked to complete
    pub(crate) fn trigger(&mut self, idx: PlanItemIdx) -> CaseResult<()> {
        self.ensure_operable(idx)?;
        let item = self.case.get(idx)?;
        let kind = item.kind;
        let transition =
            self.state_machine
                .manual_trigger(kind)
                .ok_or_else(|| CaseError::InvalidState {
                    id: item.id.clone(),
                    state: item.state,
                    operation: "trigger".to_string(),
                })?;

        match transition {
            PlanItemTransition::Occur => self.occur(idx, true),
            _ if kind.is_container() => self.request_completion(idx),
            _ => self.complete(idx, CompletionSource::Trigger),
        }
    }

    /// An explicit completion request; optional children do not block it
    fn request_completion(&mut self, idx: PlanItemIdx) -> CaseResult<()> {
        let item = self.case.get(idx)?;
        let refused = CaseError::InvalidState {
            id: item.id.clone(),
            state: item.state,
            operation: "complete".to_string(),
        };
        if item.state != PlanItemState::Active {
            return Err(refused);
        }
        if !StageCompletion::new().is_completable(&self.case, self.definition, Some(idx), true)? {
            return Err(refused);
        }
        self.complete(idx, CompletionSource::Trigger)
    }

    pub(crate) fn complete_user_event_listener(&mut self, idx: PlanItemIdx) -> CaseResult<()> {
        self.ensure_kind(idx, PlanItemKind::UserEventListener)?;
        self.ensure_operable(idx)?;
        self.occur(idx, false)
    }

    pub(crate) fn fire_timer(&mut self, idx: PlanItemIdx) -> CaseResult<()> {
        self.ensure_kind(idx, PlanItemKind::TimerEventListener)?;
        self.ensure_operable(idx)?;
        self.occur(idx, false)
    }

    pub(crate) fn complete_task(&mut self, idx: PlanItemIdx) -> CaseResult<()> {
        self.ensure_operable(idx)?;
        self.complete(idx, CompletionSource::TaskSubsystem)
    }

    /// The task subsystem dropped the task; the instance ends without completing
    pub(crate) fn terminate_task(&mut self, idx: PlanItemIdx) -> CaseResult<()> {
        self.ensure_operable(idx)?;
        self.terminate(idx, PlanItemTransition::Terminate, false)?;
        self.repeat_after_completion(idx)
    }

    pub(crate) fn manual_start(&mut self, idx: PlanItemIdx) -> CaseResult<()> {
        self.ensure_operable(idx)?;
        self.start(idx, PlanItemTransition::ManualStart)
    }

    /// Re-enable a disabled instance
    pub(crate) fn enable(&mut self, idx: PlanItemIdx) -> CaseResult<()> {
        self.ensure_operable(idx)?;
        let item = self.case.get(idx)?;
        if item.state != PlanItemState::Disabled {
            return Err(CaseError::InvalidState {
                id: item.id.clone(),
                state: item.state,
                operation: "enable".to_string(),
            });
        }
        self.apply(idx, PlanItemTransition::Enable, true)?;
        Ok(())
    }

    pub(crate) fn disable(&mut self, idx: PlanItemIdx) -> CaseResult<()> {
        self.ensure_operable(idx)?;
        self.apply(idx, PlanItemTransition::Disable, true)?;
        Ok(())
    }

    /// Suspend an instance together with its running descendants
    pub(crate) fn suspend(&mut self, idx: PlanItemIdx) -> CaseResult<()> {
        self.ensure_operable(idx)?;
        self.apply(idx, PlanItemTransition::Suspend, true)?;
        for descendant in self.case.descendants_of(idx) {
            let state = self.case.get(descendant)?.state;
            if matches!(
                state,
                PlanItemState::Available | PlanItemState::Enabled | PlanItemState::Active
            ) {
                self.apply(descendant, PlanItemTransition::Suspend, true)?;
            }
        }
        Ok(())
    }

    /// Resume an instance and its suspended descendants
    pub(crate) fn resume(&mut self, idx: PlanItemIdx) -> CaseResult<()> {
        self.ensure_operable(idx)?;
        let item = self.case.get(idx)?;
        if let Some(parent) = item.parent {
            if self.case.get(parent)?.is_suspended() {
                return Err(CaseError::InvalidState {
                    id: item.id.clone(),
                    state: item.state,
                    operation: "resume".to_string(),
                });
            }
        }

        self.apply(idx, PlanItemTransition::Resume, true)?;
        self.agenda.mark_dirty(idx);
        for descendant in self.case.descendants_of(idx) {
            let (suspended, live) = {
                let item = self.case.get(descendant)?;
                (item.is_suspended(), item.is_live())
            };
            if suspended {
                self.apply(descendant, PlanItemTransition::Resume, true)?;
                self.agenda.mark_dirty(descendant);
            } else if live {
                self.agenda.mark_dirty(descendant);
            }
        }
        Ok(())
    }

    /// Store a variable and re-evaluate every sentry with a condition
    pub(crate) fn set_variable(&mut self, name: String, value: serde_json::Value) -> CaseResult<()> {
        self.ensure_active()?;
        tracing::debug!(case_instance_id = %self.case.id, variable = %name, "Variable set");
        self.case.variables.insert(name, value);

        let definition = self.definition;
        let guarded: Vec<PlanItemIdx> = self
            .case
            .live_items()
            .filter(|item| {
                definition.get(&item.plan_item_id).is_some_and(|plan_item| {
                    plan_item
                        .entry_criteria
                        .iter()
                        .chain(plan_item.exit_criteria.iter())
                        .any(|sentry| sentry.if_part.is_some())
                })
            })
            .map(|item| item.idx)
            .collect();
        for idx in guarded {
            self.case.get_mut(idx)?.memory.arm_conditions();
            self.agenda.mark_dirty(idx);
        }
        if definition
            .exit_criteria
            .iter()
            .any(|sentry| sentry.if_part.is_some())
        {
            self.agenda.mark_root_dirty();
        }
        Ok(())
    }

    pub(crate) fn terminate_case(&mut self) -> CaseResult<()> {
        self.ensure_active()?;
        self.end_case(CaseState::Terminated)
    }

    // ── Commit ───────────────────────────────────────────────────────

    /// Verify, bump the revision and store the case
    pub(crate) fn commit(self, repository: &dyn CaseRepository) -> CaseResult<OperationOutcome> {
        if self.config.verify_invariants {
            invariants::verify(&self.case, self.definition)?;
        }

        let mut case = self.case;
        let revision = self.expected_revision.map(|r| r + 1).unwrap_or(0);
        case.revision = revision;

        let outcome = OperationOutcome {
            case_instance_id: case.id.clone(),
            revision,
            case_state: case.state,
            effects: self.effects,
            transitions: self.transitions,
        };
        match self.expected_revision {
            None => repository.insert(case)?,
            Some(expected) => repository.save(case, expected)?,
        }
        Ok(outcome)
    }
}
