//! Repetition controller: decides whether a repeating plan item gets a successor
//!
//! Plan items with entry criteria get their successor when an instance
//! activates; it waits in WAITING_FOR_REPETITION for the next entry. Plan
//! items without entry criteria get their successor when an instance
//! completes; it is admitted right away by its container.

use crate::expression::ExpressionEvaluator;
use case_types::*;

/// When in an instance's life its successor is created
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RepetitionTrigger {
    /// Entry criteria fired on the instance
    Activated,
    /// The instance completed (or its human task was terminated)
    Completed,
}

/// Creates successors for repeating plan items
pub struct RepetitionController<'a> {
    evaluator: &'a dyn ExpressionEvaluator,
}

impl<'a> RepetitionController<'a> {
    pub fn new(evaluator: &'a dyn ExpressionEvaluator) -> Self {
        Self { evaluator }
    }

    /// The state a successor starts in, if `trigger` creates one for this plan item
    pub fn successor_state(
        &self,
        plan_item: &PlanItemDefinition,
        trigger: RepetitionTrigger,
    ) -> Option<PlanItemState> {
        plan_item.repetition.as_ref()?;
        match (trigger, plan_item.has_entry_criteria()) {
            (RepetitionTrigger::Activated, true) => Some(PlanItemState::WaitingForRepetition),
            (RepetitionTrigger::Completed, false) => Some(PlanItemState::Available),
            _ => None,
        }
    }

    /// Whether the repetition rule allows another instance next to `instance`
    ///
    /// The rule's condition must hold and the number of instances created in
    /// the same container must stay under `max_instance_count`.
    pub fn allows_successor(
        &self,
        case: &CaseInstance,
        plan_item: &PlanItemDefinition,
        instance: &PlanItemInstance,
    ) -> CaseResult<bool> {
        let Some(rule) = &plan_item.repetition else {
            return Ok(false);
        };

        if let Some(max) = rule.max_instance_count {
            let siblings = case
                .instances_of(&plan_item.id)
                .into_iter()
                .filter_map(|idx| case.get(idx).ok())
                .filter(|p| p.parent == instance.parent)
                .count();
            if siblings >= max as usize {
                tracing::debug!(
                    case_instance_id = %case.id,
                    plan_item = %plan_item.id,
                    max,
                    "Repetition limit reached"
                );
                return Ok(false);
            }
        }

        match &rule.condition {
            None => Ok(true),
            Some(condition) => Ok(self.evaluator.evaluate(condition, &case.variables)?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::SimpleExpressionEvaluator;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn make_instance(case: &CaseInstance, element: &str) -> PlanItemInstance {
        let now = Utc::now();
        PlanItemInstance {
            id: PlanItemInstanceId::generate(),
            idx: PlanItemIdx(0),
            case_instance_id: case.id.clone(),
            case_definition_id: case.definition_id.clone(),
            plan_item_id: PlanItemId::new(element),
            definition_ref: element.into(),
            name: element.into(),
            kind: PlanItemKind::HumanTask,
            parent: None,
            stage_instance_id: None,
            children: Vec::new(),
            state: PlanItemState::Active,
            state_before_suspension: None,
            memory: SentryMemory::new(),
            repetition_counter: 1,
            human_task_id: None,
            created_at: now,
            last_transition_at: now,
            ended_at: None,
        }
    }

    #[test]
    fn test_successor_timing() {
        let eval = SimpleExpressionEvaluator::new();
        let controller = RepetitionController::new(&eval);

        let plain = PlanItemDefinition::task("a", "A").with_repetition(RepetitionRule::always());
        assert_eq!(
            controller.successor_state(&plain, RepetitionTrigger::Completed),
            Some(PlanItemState::Available)
        );
        assert_eq!(controller.successor_state(&plain, RepetitionTrigger::Activated), None);

        let guarded = PlanItemDefinition::task("b", "B")
            .with_entry(Sentry::on("s", OnPart::occur("l")))
            .with_repetition(RepetitionRule::always());
        assert_eq!(
            controller.successor_state(&guarded, RepetitionTrigger::Activated),
            Some(PlanItemState::WaitingForRepetition)
        );
        assert_eq!(controller.successor_state(&guarded, RepetitionTrigger::Completed), None);

        let once = PlanItemDefinition::task("c", "C");
        assert_eq!(controller.successor_state(&once, RepetitionTrigger::Completed), None);
    }

    #[test]
    fn test_condition_gates_successor() {
        let eval = SimpleExpressionEvaluator::new();
        let controller = RepetitionController::new(&eval);
        let plan_item = PlanItemDefinition::task("a", "A")
            .with_repetition(RepetitionRule::while_condition("${whileTrue}"));

        let mut case = CaseInstance::new(CaseDefinitionId::new("d"), "k", BTreeMap::new());
        let instance = make_instance(&case, "a");
        case.push(instance.clone()).unwrap();

        assert!(!controller.allows_successor(&case, &plan_item, &instance).unwrap());
        case.variables.insert("whileTrue".into(), json!("true"));
        assert!(controller.allows_successor(&case, &plan_item, &instance).unwrap());
    }

    #[test]
    fn test_max_instance_count() {
        let eval = SimpleExpressionEvaluator::new();
        let controller = RepetitionController::new(&eval);
        let plan_item = PlanItemDefinition::task("a", "A")
            .with_repetition(RepetitionRule::always().with_max_instances(2));

        let mut case = CaseInstance::new(CaseDefinitionId::new("d"), "k", BTreeMap::new());
        let first = make_instance(&case, "a");
        case.push(first.clone()).unwrap();
        assert!(controller.allows_successor(&case, &plan_item, &first).unwrap());

        case.push(make_instance(&case, "a")).unwrap();
        assert!(!controller.allows_successor(&case, &plan_item, &first).unwrap());
    }
}
