//! State machine: transition guards for plan item instances
//!
//! The state machine answers one question: given an instance in state S,
//! may transition T be applied, and what state does it lead to? It never
//! mutates anything. Side effects of a transition (creating children,
//! emitting effects, cascading terminations) belong to the unit of work.

use case_types::*;

/// Transition rules for plan item instances
#[derive(Clone, Debug)]
pub struct StateMachine;

impl StateMachine {
    pub fn new() -> Self {
        Self
    }

    /// The state `transition` leads to from `from`, if it is allowed at all
    pub fn target_state(
        &self,
        kind: PlanItemKind,
        from: PlanItemState,
        transition: PlanItemTransition,
    ) -> Option<PlanItemState> {
        use PlanItemState::*;
        use PlanItemTransition as T;

        let behavior = kind.behavior();
        match (transition, from) {
            (T::Start, Available | WaitingForRepetition) if !behavior.is_listener => Some(Active),
            (T::Enable, Available | WaitingForRepetition | Disabled) if !behavior.is_listener => {
                Some(Enabled)
            }
            (T::Disable, Enabled) => Some(Disabled),
            (T::ManualStart, Enabled) => Some(Active),
            (T::Complete, Active) => Some(Completed),
            (T::Occur, Available | WaitingForRepetition)
                if behavior.completion_event == PlanItemTransition::Occur =>
            {
                Some(Completed)
            }
            (T::Terminate | T::Exit | T::ParentTerminate, state) if state.is_live() => {
                Some(Terminated)
            }
            (T::Suspend, Available | Enabled | Active) => Some(Suspended),
            _ => None,
        }
    }

    /// Check a transition against an instance and return the resulting state
    ///
    /// Terminal instances yield the benign [`CaseError::AlreadyTerminal`];
    /// any other disallowed combination is [`CaseError::InvalidState`].
    pub fn check(
        &self,
        item: &PlanItemInstance,
        transition: PlanItemTransition,
    ) -> CaseResult<PlanItemState> {
        if item.is_terminal() {
            return Err(CaseError::AlreadyTerminal {
                id: item.id.clone(),
                state: item.state,
            });
        }

        let target = if transition == PlanItemTransition::Resume {
            match (item.state, item.state_before_suspension) {
                (PlanItemState::Suspended, Some(before)) => Some(before),
                _ => None,
            }
        } else {
            self.target_state(item.kind, item.state, transition)
        };

        target.ok_or_else(|| CaseError::InvalidState {
            id: item.id.clone(),
            state: item.state,
            operation: transition.as_str().to_string(),
        })
    }

    /// The transition a manual trigger applies to an instance of `kind`
    ///
    /// Listeners occur, tasks complete, stages receive a completion request.
    /// Milestones cannot be triggered.
    pub fn manual_trigger(&self, kind: PlanItemKind) -> Option<PlanItemTransition> {
        let behavior = kind.behavior();
        if behavior.is_listener {
            Some(PlanItemTransition::Occur)
        } else if behavior.completes_on_trigger || behavior.is_container {
            Some(PlanItemTransition::Complete)
        } else {
            None
        }
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
