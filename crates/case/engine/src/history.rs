//! History recorder: records every applied plan item transition
//!
//! Each transition becomes a [`HistoryEntry`] with a per-case sequence
//! number, so the chain can be replayed to see exactly how a cascade
//! unfolded. Entries are appended to the case instance itself and commit
//! or roll back together with it.

use case_types::{
    CaseInstance, HistoryEntry, PlanItemId, PlanItemInstance, PlanItemInstanceId, PlanItemState,
    PlanItemTransition,
};
use chrono::Utc;

/// Appends history entries to case instances
#[derive(Clone, Debug)]
pub struct HistoryRecorder {
    enabled: bool,
}

impl HistoryRecorder {
    /// The sequence lives on the case, so it continues even when nothing is kept
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Record a transition; returns the entry for the operation outcome
    pub fn record(
        &mut self,
        case: &mut CaseInstance,
        item: &PlanItemInstance,
        transition: PlanItemTransition,
        from: Option<PlanItemState>,
    ) -> HistoryEntry {
        let entry = HistoryEntry {
            sequence: case.next_history_sequence,
            plan_item_instance_id: item.id.clone(),
            plan_item_id: item.plan_item_id.clone(),
            transition,
            from,
            to: item.state,
            at: Utc::now(),
        };
        case.next_history_sequence += 1;

        tracing::trace!(
            case_instance_id = %case.id,
            sequence = entry.sequence,
            plan_item = %entry.plan_item_id,
            transition = %transition,
            to = %entry.to,
            "History recorded"
        );

        if self.enabled {
            case.history.push(entry.clone());
        }
        entry
    }
}

/// History entries of one plan item instance, in order
pub fn history_of_instance<'a>(
    case: &'a CaseInstance,
    id: &PlanItemInstanceId,
) -> Vec<&'a HistoryEntry> {
    case.history
        .iter()
        .filter(|e| &e.plan_item_instance_id == id)
        .collect()
}

/// Transitions recorded for every instance of a plan item, in order
pub fn transitions_of(case: &CaseInstance, plan_item_id: &PlanItemId) -> Vec<PlanItemTransition> {
    case.history
        .iter()
        .filter(|e| &e.plan_item_id == plan_item_id)
        .map(|e| e.transition)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use case_types::*;
    use std::collections::BTreeMap;

    fn make_case_with_item() -> (CaseInstance, PlanItemIdx) {
        let mut case = CaseInstance::new(CaseDefinitionId::new("d"), "key", BTreeMap::new());
        let now = Utc::now();
        let item = PlanItemInstance {
            id: PlanItemInstanceId::new("p-1"),
            idx: PlanItemIdx(0),
            case_instance_id: case.id.clone(),
            case_definition_id: case.definition_id.clone(),
            plan_item_id: PlanItemId::new("taskA"),
            definition_ref: "taskA".into(),
            name: "A".into(),
            kind: PlanItemKind::Task,
            parent: None,
            stage_instance_id: None,
            children: Vec::new(),
            state: PlanItemState::Available,
            state_before_suspension: None,
            memory: SentryMemory::new(),
            repetition_counter: 1,
            human_task_id: None,
            created_at: now,
            last_transition_at: now,
            ended_at: None,
        };
        let idx = case.push(item).unwrap();
        (case, idx)
    }

    #[test]
    fn test_sequence_continues() {
        let (mut case, idx) = make_case_with_item();
        let item = case.get(idx).unwrap().clone();

        let mut recorder = HistoryRecorder::new(true);
        recorder.record(&mut case, &item, PlanItemTransition::Create, None);
        recorder.record(
            &mut case,
            &item,
            PlanItemTransition::Start,
            Some(PlanItemState::Available),
        );

        let mut next = HistoryRecorder::new(true);
        let entry = next.record(&mut case, &item, PlanItemTransition::Complete, None);
        assert_eq!(entry.sequence, 2);
        assert_eq!(case.history.len(), 3);
        assert_eq!(
            transitions_of(&case, &PlanItemId::new("taskA")),
            vec![
                PlanItemTransition::Create,
                PlanItemTransition::Start,
                PlanItemTransition::Complete
            ]
        );
        assert_eq!(history_of_instance(&case, &item.id).len(), 3);
    }

    #[test]
    fn test_disabled_recorder_keeps_case_history_empty() {
        let (mut case, idx) = make_case_with_item();
        let item = case.get(idx).unwrap().clone();

        let mut recorder = HistoryRecorder::new(false);
        let entry = recorder.record(&mut case, &item, PlanItemTransition::Create, None);
        assert_eq!(entry.sequence, 0);

        // A later operation keeps counting though nothing was stored
        let mut next = HistoryRecorder::new(false);
        let entry = next.record(&mut case, &item, PlanItemTransition::Start, None);
        assert_eq!(entry.sequence, 1);
        assert!(case.history.is_empty());
        assert_eq!(case.next_history_sequence, 2);
    }
}
