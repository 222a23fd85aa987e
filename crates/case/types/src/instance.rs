//! Case instances: running executions of a case definition
//!
//! A case instance owns an arena of plan item instances. Parent/child links
//! are arena indices, so the whole graph is a plain value that can be cloned
//! into a unit of work, mutated, and swapped back in one step.

use crate::{
    CaseDefinition, CaseDefinitionId, CaseError, CaseInstanceId, CaseResult, CaseState, CriterionKind,
    HumanTaskId, PlanItemId, PlanItemIdx, PlanItemInstanceId, PlanItemKind, PlanItemState,
    PlanItemTransition, SentryId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ── Sentry Memory ────────────────────────────────────────────────────

/// On-parts observed for one sentry of one target
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RememberedParts {
    pub kind: CriterionKind,
    pub sentry: SentryId,
    /// Indices into the sentry's on-part list
    pub parts: BTreeSet<usize>,
}

/// Which on-parts of a target's sentries have fired since their last reset
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentryMemory {
    entries: Vec<RememberedParts>,
    /// A variable changed since the target was created
    #[serde(default)]
    conditions_armed: bool,
}

impl SentryMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember an on-part; returns whether it was new
    pub fn remember(&mut self, kind: CriterionKind, sentry: &SentryId, part: usize) -> bool {
        match self
            .entries
            .iter_mut()
            .find(|e| e.kind == kind && &e.sentry == sentry)
        {
            Some(entry) => entry.parts.insert(part),
            None => {
                self.entries.push(RememberedParts {
                    kind,
                    sentry: sentry.clone(),
                    parts: BTreeSet::from([part]),
                });
                true
            }
        }
    }

    pub fn is_remembered(&self, kind: CriterionKind, sentry: &SentryId, part: usize) -> bool {
        self.parts(kind, sentry)
            .map(|parts| parts.contains(&part))
            .unwrap_or(false)
    }

    pub fn parts(&self, kind: CriterionKind, sentry: &SentryId) -> Option<&BTreeSet<usize>> {
        self.entries
            .iter()
            .find(|e| e.kind == kind && &e.sentry == sentry)
            .map(|e| &e.parts)
    }

    /// Consume the memory of a fired sentry
    pub fn reset(&mut self, kind: CriterionKind, sentry: &SentryId) {
        self.entries
            .retain(|e| !(e.kind == kind && &e.sentry == sentry));
    }

    pub fn clear_kind(&mut self, kind: CriterionKind) {
        self.entries.retain(|e| e.kind != kind);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.conditions_armed = false;
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && !self.conditions_armed
    }

    /// Record a variable change that condition-only sentries may react to
    pub fn arm_conditions(&mut self) {
        self.conditions_armed = true;
    }

    pub fn conditions_armed(&self) -> bool {
        self.conditions_armed
    }
}

// ── History ──────────────────────────────────────────────────────────

/// One applied plan item transition
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Monotonic per case instance
    pub sequence: u64,
    pub plan_item_instance_id: PlanItemInstanceId,
    pub plan_item_id: PlanItemId,
    pub transition: PlanItemTransition,
    /// None for the creation of the instance
    pub from: Option<PlanItemState>,
    pub to: PlanItemState,
    pub at: DateTime<Utc>,
}

// ── Plan Item Instance ───────────────────────────────────────────────

/// One occurrence of a plan item definition within a case instance
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanItemInstance {
    pub id: PlanItemInstanceId,
    /// Own position in the case arena
    pub idx: PlanItemIdx,
    pub case_instance_id: CaseInstanceId,
    pub case_definition_id: CaseDefinitionId,
    /// Element id of the plan item in the model
    pub plan_item_id: PlanItemId,
    /// Referenced plan item definition id
    pub definition_ref: String,
    pub name: String,
    pub kind: PlanItemKind,
    /// Enclosing stage instance (None = directly under the case root)
    pub parent: Option<PlanItemIdx>,
    pub stage_instance_id: Option<PlanItemInstanceId>,
    /// Child instances (stages only), in creation order
    #[serde(default)]
    pub children: Vec<PlanItemIdx>,
    pub state: PlanItemState,
    /// State restored on resume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_before_suspension: Option<PlanItemState>,
    /// Observed on-parts of this instance's own entry and exit sentries
    #[serde(default)]
    pub memory: SentryMemory,
    /// 1-based position within its repetition family
    pub repetition_counter: u32,
    /// Work-list item backing an active human task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_task_id: Option<HumanTaskId>,
    pub created_at: DateTime<Utc>,
    pub last_transition_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl PlanItemInstance {
    pub fn is_live(&self) -> bool {
        self.state.is_live()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_suspended(&self) -> bool {
        self.state == PlanItemState::Suspended
    }

    /// The state the instance is in, looking through a suspension
    pub fn effective_state(&self) -> PlanItemState {
        match (self.state, self.state_before_suspension) {
            (PlanItemState::Suspended, Some(before)) => before,
            (state, _) => state,
        }
    }

    /// Whether entry sentries still apply to this instance
    pub fn awaits_entry(&self) -> bool {
        matches!(
            self.effective_state(),
            PlanItemState::Available | PlanItemState::WaitingForRepetition
        )
    }
}

// ── Case Instance ────────────────────────────────────────────────────

/// A running (or ended) execution of a case definition
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaseInstance {
    pub id: CaseInstanceId,
    pub definition_id: CaseDefinitionId,
    pub definition_key: String,
    pub state: CaseState,
    #[serde(default)]
    pub variables: BTreeMap<String, serde_json::Value>,
    /// Arena of plan item instances; indices are stable
    #[serde(default)]
    pub plan_items: Vec<PlanItemInstance>,
    /// Observed on-parts of the case plan model's exit sentries
    #[serde(default)]
    pub root_memory: SentryMemory,
    /// Bumped on every committed operation
    pub revision: u64,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    /// Sequence number of the next recorded transition
    #[serde(default)]
    pub next_history_sequence: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl CaseInstance {
    pub fn new(
        definition_id: CaseDefinitionId,
        definition_key: impl Into<String>,
        variables: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            id: CaseInstanceId::generate(),
            definition_id,
            definition_key: definition_key.into(),
            state: CaseState::Active,
            variables,
            plan_items: Vec::new(),
            root_memory: SentryMemory::new(),
            revision: 0,
            history: Vec::new(),
            next_history_sequence: 0,
            created_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn is_ended(&self) -> bool {
        self.state.is_ended()
    }

    /// Append a plan item instance to the arena, linking it to its parent
    pub fn push(&mut self, mut item: PlanItemInstance) -> CaseResult<PlanItemIdx> {
        let idx = PlanItemIdx(self.plan_items.len());
        item.idx = idx;
        if let Some(parent) = item.parent {
            let parent_item = self.get_mut(parent)?;
            parent_item.children.push(idx);
            item.stage_instance_id = Some(parent_item.id.clone());
        }
        self.plan_items.push(item);
        Ok(idx)
    }

    pub fn get(&self, idx: PlanItemIdx) -> CaseResult<&PlanItemInstance> {
        self.plan_items.get(idx.0).ok_or_else(|| {
            CaseError::InvariantViolation(format!("dangling plan item index {} in case {}", idx, self.id))
        })
    }

    pub fn get_mut(&mut self, idx: PlanItemIdx) -> CaseResult<&mut PlanItemInstance> {
        let case_id = self.id.clone();
        self.plan_items.get_mut(idx.0).ok_or_else(|| {
            CaseError::InvariantViolation(format!("dangling plan item index {} in case {}", idx, case_id))
        })
    }

    pub fn find(&self, id: &PlanItemInstanceId) -> Option<PlanItemIdx> {
        self.plan_items.iter().find(|p| &p.id == id).map(|p| p.idx)
    }

    pub fn find_by_task(&self, task_id: &HumanTaskId) -> Option<PlanItemIdx> {
        self.plan_items
            .iter()
            .find(|p| p.human_task_id.as_ref() == Some(task_id))
            .map(|p| p.idx)
    }

    /// Direct children of a container (None = the case root)
    pub fn children_of(&self, parent: Option<PlanItemIdx>) -> Vec<PlanItemIdx> {
        match parent {
            Some(idx) => self
                .plan_items
                .get(idx.0)
                .map(|p| p.children.clone())
                .unwrap_or_default(),
            None => self
                .plan_items
                .iter()
                .filter(|p| p.parent.is_none())
                .map(|p| p.idx)
                .collect(),
        }
    }

    /// Live direct children of a container
    pub fn live_children_of(&self, parent: Option<PlanItemIdx>) -> Vec<PlanItemIdx> {
        self.children_of(parent)
            .into_iter()
            .filter(|idx| self.plan_items.get(idx.0).map(|p| p.is_live()).unwrap_or(false))
            .collect()
    }

    /// Every descendant of a stage instance, depth first
    pub fn descendants_of(&self, idx: PlanItemIdx) -> Vec<PlanItemIdx> {
        let mut out = Vec::new();
        let mut stack: Vec<PlanItemIdx> = self.children_of(Some(idx)).into_iter().rev().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            for child in self.children_of(Some(next)).into_iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    /// Enclosing stage instances, innermost first
    pub fn ancestors_of(&self, idx: PlanItemIdx) -> Vec<PlanItemIdx> {
        let mut chain = Vec::new();
        let mut current = self.plan_items.get(idx.0).and_then(|p| p.parent);
        while let Some(parent) = current {
            if chain.len() > self.plan_items.len() {
                break;
            }
            chain.push(parent);
            current = self.plan_items.get(parent.0).and_then(|p| p.parent);
        }
        chain
    }

    /// Nesting depth (0 = directly under the case root)
    pub fn depth(&self, idx: PlanItemIdx) -> usize {
        self.ancestors_of(idx).len()
    }

    /// Whether `a` and `b` sit in the same instance of the innermost stage
    /// enclosing both definitions
    ///
    /// When one definition encloses the other, the inner instance must lie
    /// inside that very outer instance. Items whose definitions only share
    /// the case plan model always share a scope. Instances in separate
    /// repetitions of a stage never do.
    pub fn shares_scope(
        &self,
        definition: &CaseDefinition,
        a: PlanItemIdx,
        b: PlanItemIdx,
    ) -> CaseResult<bool> {
        let a_element = &self.get(a)?.plan_item_id;
        let b_element = &self.get(b)?.plan_item_id;
        let a_stages = definition.ancestors_of(a_element);
        let b_stages = definition.ancestors_of(b_element);

        if a_stages.iter().any(|stage| &stage.id == b_element) {
            return Ok(self.enclosing_instance(a, b_element) == Some(b));
        }
        if b_stages.iter().any(|stage| &stage.id == a_element) {
            return Ok(self.enclosing_instance(b, a_element) == Some(a));
        }

        let common = a_stages
            .into_iter()
            .find(|stage| b_stages.iter().any(|other| other.id == stage.id));
        match common {
            None => Ok(true),
            Some(stage) => {
                Ok(self.enclosing_instance(a, &stage.id) == self.enclosing_instance(b, &stage.id))
            }
        }
    }

    /// The ancestor of `idx` instantiating the stage `stage`
    fn enclosing_instance(&self, idx: PlanItemIdx, stage: &PlanItemId) -> Option<PlanItemIdx> {
        self.ancestors_of(idx)
            .into_iter()
            .find(|ancestor| self.plan_items.get(ancestor.0).map(|p| &p.plan_item_id) == Some(stage))
    }

    /// All instances of a plan item, in creation order
    pub fn instances_of(&self, plan_item_id: &PlanItemId) -> Vec<PlanItemIdx> {
        self.plan_items
            .iter()
            .filter(|p| &p.plan_item_id == plan_item_id)
            .map(|p| p.idx)
            .collect()
    }

    pub fn live_items(&self) -> impl Iterator<Item = &PlanItemInstance> {
        self.plan_items.iter().filter(|p| p.is_live())
    }

    pub fn live_count(&self) -> usize {
        self.live_items().count()
    }

    /// Timer listeners still waiting for their timer
    pub fn pending_timers(&self) -> Vec<&PlanItemInstance> {
        self.live_items()
            .filter(|p| p.kind == PlanItemKind::TimerEventListener)
            .collect()
    }

    pub fn variable(&self, name: &str) -> Option<&serde_json::Value> {
        self.variables.get(name)
    }
}
