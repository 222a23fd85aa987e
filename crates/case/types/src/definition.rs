//! Case definitions: the immutable model a case instance executes
//!
//! A CaseDefinition is a tree of plan items rooted at the implicit case plan
//! model. Stages own nested plan items; every plan item may carry entry and
//! exit sentries whose on-parts point at other plan items of the same model.
//!
//! Definitions are immutable once registered. To modify, deploy a new version.

use crate::{
    CaseDefinitionId, CaseError, CaseResult, CriterionKind, PlanItemId, PlanItemTransition,
    Sentry, SentryId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

// ── Plan Item Kind ───────────────────────────────────────────────────

/// The closed set of plan item kinds the runtime knows how to drive.
///
/// Behavior differences between kinds are expressed through
/// [`PlanItemKind::behavior`], never through per-kind code paths scattered
/// across the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PlanItemKind {
    /// Work-list item completed through the human task subsystem
    HumanTask,
    /// Generic task completed by a manual trigger
    Task,
    /// Container of nested plan items
    Stage,
    /// Occurs as soon as it is reached
    Milestone,
    /// Occurs when a user triggers it
    UserEventListener,
    /// Occurs when its timer fires
    TimerEventListener,
}

/// Static behavior row for a plan item kind
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KindBehavior {
    /// Listeners stay AVAILABLE until they occur and are subject to orphan collection
    pub is_listener: bool,
    /// Containers own child plan item instances
    pub is_container: bool,
    /// Completes (occurs) in the same step it is started
    pub completes_on_start: bool,
    /// Can be completed through a manual trigger while ACTIVE
    pub completes_on_trigger: bool,
    /// The transition emitted when this kind finishes successfully
    pub completion_event: PlanItemTransition,
    /// Query-facing definition type name
    pub type_name: &'static str,
}

impl PlanItemKind {
    pub fn behavior(&self) -> KindBehavior {
        match self {
            Self::HumanTask => KindBehavior {
                is_listener: false,
                is_container: false,
                completes_on_start: false,
                completes_on_trigger: true,
                completion_event: PlanItemTransition::Complete,
                type_name: "humantask",
            },
            Self::Task => KindBehavior {
                is_listener: false,
                is_container: false,
                completes_on_start: false,
                completes_on_trigger: true,
                completion_event: PlanItemTransition::Complete,
                type_name: "task",
            },
            Self::Stage => KindBehavior {
                is_listener: false,
                is_container: true,
                completes_on_start: false,
                completes_on_trigger: false,
                completion_event: PlanItemTransition::Complete,
                type_name: "stage",
            },
            Self::Milestone => KindBehavior {
                is_listener: false,
                is_container: false,
                completes_on_start: true,
                completes_on_trigger: false,
                completion_event: PlanItemTransition::Occur,
                type_name: "milestone",
            },
            Self::UserEventListener => KindBehavior {
                is_listener: true,
                is_container: false,
                completes_on_start: false,
                completes_on_trigger: true,
                completion_event: PlanItemTransition::Occur,
                type_name: "usereventlistener",
            },
            Self::TimerEventListener => KindBehavior {
                is_listener: true,
                is_container: false,
                completes_on_start: false,
                completes_on_trigger: false,
                completion_event: PlanItemTransition::Occur,
                type_name: "timereventlistener",
            },
        }
    }

    pub fn is_listener(&self) -> bool {
        self.behavior().is_listener
    }

    pub fn is_container(&self) -> bool {
        self.behavior().is_container
    }

    pub fn type_name(&self) -> &'static str {
        self.behavior().type_name
    }
}

impl std::fmt::Display for PlanItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.type_name())
    }
}

// ── Repetition ───────────────────────────────────────────────────────

/// Repetition rule of a plan item
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepetitionRule {
    /// Successors are only created while this evaluates true (absent = always)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Upper bound on instances ever created for one container instance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_instance_count: Option<u32>,
}

impl RepetitionRule {
    pub fn always() -> Self {
        Self::default()
    }

    pub fn while_condition(condition: impl Into<String>) -> Self {
        Self {
            condition: Some(condition.into()),
            max_instance_count: None,
        }
    }

    pub fn with_max_instances(mut self, max: u32) -> Self {
        self.max_instance_count = Some(max);
        self
    }
}

// ── Plan Item Definition ─────────────────────────────────────────────

/// A plan item of the case model
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanItemDefinition {
    /// Element id, unique within the case definition
    pub id: PlanItemId,
    /// Id of the referenced plan item definition (shared by repeated uses)
    pub definition_ref: String,
    /// Human-readable name
    pub name: String,
    pub kind: PlanItemKind,
    /// Enclosing stage (None = directly under the case plan model)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<PlanItemId>,
    #[serde(default)]
    pub entry_criteria: Vec<Sentry>,
    #[serde(default)]
    pub exit_criteria: Vec<Sentry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repetition: Option<RepetitionRule>,
    /// Must reach a terminal or semi-terminal state before the parent may complete
    #[serde(default)]
    pub required: bool,
    /// Stages only: complete once required children settle
    #[serde(default)]
    pub autocomplete: bool,
    /// Satisfied entry leads to ENABLED instead of ACTIVE
    #[serde(default)]
    pub manual_activation: bool,
    /// Timer listeners only: opaque expression handed to the job scheduler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer_expression: Option<String>,
}

impl PlanItemDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: PlanItemKind) -> Self {
        let id = id.into();
        Self {
            definition_ref: id.clone(),
            id: PlanItemId::new(id),
            name: name.into(),
            kind,
            parent: None,
            entry_criteria: Vec::new(),
            exit_criteria: Vec::new(),
            repetition: None,
            required: false,
            autocomplete: false,
            manual_activation: false,
            timer_expression: None,
        }
    }

    pub fn human_task(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(id, name, PlanItemKind::HumanTask)
    }

    pub fn task(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(id, name, PlanItemKind::Task)
    }

    pub fn stage(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(id, name, PlanItemKind::Stage)
    }

    pub fn milestone(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(id, name, PlanItemKind::Milestone)
    }

    pub fn user_event_listener(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(id, name, PlanItemKind::UserEventListener)
    }

    pub fn timer_event_listener(
        id: impl Into<String>,
        name: impl Into<String>,
        timer_expression: impl Into<String>,
    ) -> Self {
        let mut def = Self::new(id, name, PlanItemKind::TimerEventListener);
        def.timer_expression = Some(timer_expression.into());
        def
    }

    pub fn with_definition_ref(mut self, definition_ref: impl Into<String>) -> Self {
        self.definition_ref = definition_ref.into();
        self
    }

    pub fn in_stage(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(PlanItemId::new(parent));
        self
    }

    pub fn with_entry(mut self, sentry: Sentry) -> Self {
        self.entry_criteria.push(sentry);
        self
    }

    pub fn with_exit(mut self, sentry: Sentry) -> Self {
        self.exit_criteria.push(sentry);
        self
    }

    pub fn with_repetition(mut self, rule: RepetitionRule) -> Self {
        self.repetition = Some(rule);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn autocomplete(mut self) -> Self {
        self.autocomplete = true;
        self
    }

    pub fn manual_activation(mut self) -> Self {
        self.manual_activation = true;
        self
    }

    pub fn has_entry_criteria(&self) -> bool {
        !self.entry_criteria.is_empty()
    }

    pub fn is_repeating(&self) -> bool {
        self.repetition.is_some()
    }

    pub fn criteria(&self, kind: CriterionKind) -> &[Sentry] {
        match kind {
            CriterionKind::Entry => &self.entry_criteria,
            CriterionKind::Exit => &self.exit_criteria,
        }
    }
}

// ── Sentry references ────────────────────────────────────────────────

/// Who a sentry belongs to
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SentryOwner {
    /// A plan item's entry or exit criteria
    PlanItem(PlanItemId),
    /// The case plan model's exit criteria
    CasePlanModel,
}

impl std::fmt::Display for SentryOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PlanItem(id) => write!(f, "{}", id),
            Self::CasePlanModel => f.write_str("casePlanModel"),
        }
    }
}

/// A back-reference from an on-part source to a sentry that observes it
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SentryRef {
    pub owner: SentryOwner,
    pub kind: CriterionKind,
    pub sentry: SentryId,
}

// ── Case Definition ──────────────────────────────────────────────────

/// A deployable case model
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaseDefinition {
    /// Unique identifier of this deployed version
    pub id: CaseDefinitionId,
    /// Key shared by every version of the model
    pub key: String,
    pub name: String,
    /// Assigned by the registry on deployment
    pub version: u32,
    /// Whether the case plan model completes once required children settle
    #[serde(default)]
    pub autocomplete: bool,
    /// Criteria that terminate the whole case
    #[serde(default)]
    pub exit_criteria: Vec<Sentry>,
    /// Plan items, in model order
    pub plan_items: Vec<PlanItemDefinition>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl CaseDefinition {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: CaseDefinitionId::generate(),
            key: key.into(),
            name: name.into(),
            version: 1,
            autocomplete: false,
            exit_criteria: Vec::new(),
            plan_items: Vec::new(),
            created_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn autocomplete(mut self) -> Self {
        self.autocomplete = true;
        self
    }

    pub fn with_exit(mut self, sentry: Sentry) -> Self {
        self.exit_criteria.push(sentry);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Add a plan item to the model
    pub fn add_plan_item(&mut self, item: PlanItemDefinition) -> CaseResult<()> {
        if self.plan_items.iter().any(|p| p.id == item.id) {
            return Err(CaseError::DuplicatePlanItem(item.id));
        }
        self.plan_items.push(item);
        Ok(())
    }

    /// Builder-style [`CaseDefinition::add_plan_item`]
    pub fn with_plan_item(mut self, item: PlanItemDefinition) -> CaseResult<Self> {
        self.add_plan_item(item)?;
        Ok(self)
    }

    pub fn get(&self, id: &PlanItemId) -> Option<&PlanItemDefinition> {
        self.plan_items.iter().find(|p| &p.id == id)
    }

    pub fn require(&self, id: &PlanItemId) -> CaseResult<&PlanItemDefinition> {
        self.get(id)
            .ok_or_else(|| CaseError::PlanItemNotFound(id.clone()))
    }

    /// Plan items directly inside `parent` (None = the case plan model)
    pub fn children_of(&self, parent: Option<&PlanItemId>) -> Vec<&PlanItemDefinition> {
        self.plan_items
            .iter()
            .filter(|p| p.parent.as_ref() == parent)
            .collect()
    }

    /// Chain of enclosing stages, innermost first
    pub fn ancestors_of(&self, id: &PlanItemId) -> Vec<&PlanItemDefinition> {
        let mut chain = Vec::new();
        let mut current = self.get(id).and_then(|p| p.parent.as_ref());
        while let Some(parent_id) = current {
            match self.get(parent_id) {
                Some(parent) if chain.len() <= self.plan_items.len() => {
                    chain.push(parent);
                    current = parent.parent.as_ref();
                }
                _ => break,
            }
        }
        chain
    }

    /// Look up a sentry by owner and kind
    pub fn sentry(
        &self,
        owner: &SentryOwner,
        kind: CriterionKind,
        sentry_id: &SentryId,
    ) -> Option<&Sentry> {
        let list = match owner {
            SentryOwner::CasePlanModel => match kind {
                CriterionKind::Exit => self.exit_criteria.as_slice(),
                CriterionKind::Entry => &[],
            },
            SentryOwner::PlanItem(id) => self.get(id)?.criteria(kind),
        };
        list.iter().find(|s| &s.id == sentry_id)
    }

    /// Every sentry in the model with an on-part observing `source`
    pub fn sentries_referencing(&self, source: &PlanItemId) -> Vec<SentryRef> {
        let mut refs = Vec::new();
        for item in &self.plan_items {
            for kind in [CriterionKind::Entry, CriterionKind::Exit] {
                for sentry in item.criteria(kind) {
                    if sentry.references(source) {
                        refs.push(SentryRef {
                            owner: SentryOwner::PlanItem(item.id.clone()),
                            kind,
                            sentry: sentry.id.clone(),
                        });
                    }
                }
            }
        }
        for sentry in &self.exit_criteria {
            if sentry.references(source) {
                refs.push(SentryRef {
                    owner: SentryOwner::CasePlanModel,
                    kind: CriterionKind::Exit,
                    sentry: sentry.id.clone(),
                });
            }
        }
        refs
    }

    /// Validate the model for structural correctness
    pub fn validate(&self) -> CaseResult<()> {
        if self.key.trim().is_empty() {
            return Err(CaseError::Validation("Case definition key is empty".into()));
        }

        let mut seen = HashSet::new();
        for item in &self.plan_items {
            if !seen.insert(&item.id) {
                return Err(CaseError::DuplicatePlanItem(item.id.clone()));
            }
        }

        for item in &self.plan_items {
            if let Some(parent_id) = &item.parent {
                let parent = self
                    .get(parent_id)
                    .ok_or_else(|| CaseError::PlanItemNotFound(parent_id.clone()))?;
                if !parent.kind.is_container() {
                    return Err(CaseError::InvalidParent {
                        item: item.id.clone(),
                        parent: parent_id.clone(),
                    });
                }
            }

            if item.kind.is_listener() {
                if item.has_entry_criteria() || !item.exit_criteria.is_empty() {
                    return Err(CaseError::Validation(format!(
                        "Event listener '{}' cannot carry entry or exit criteria",
                        item.id
                    )));
                }
                if item.is_repeating() {
                    return Err(CaseError::Validation(format!(
                        "Event listener '{}' cannot repeat",
                        item.id
                    )));
                }
            }

            if item.kind == PlanItemKind::TimerEventListener && item.timer_expression.is_none() {
                return Err(CaseError::Validation(format!(
                    "Timer event listener '{}' has no timer expression",
                    item.id
                )));
            }

            if item.kind.behavior().completes_on_start && !item.has_entry_criteria() {
                let unbounded = item
                    .repetition
                    .as_ref()
                    .is_some_and(|rule| rule.max_instance_count.is_none());
                if unbounded {
                    return Err(CaseError::Validation(format!(
                        "Milestone '{}' repeats without entry criteria or an instance limit",
                        item.id
                    )));
                }
            }

            if item.autocomplete && !item.kind.is_container() {
                return Err(CaseError::Validation(format!(
                    "Only stages can autocomplete: '{}'",
                    item.id
                )));
            }

            self.validate_sentries(&item.id.to_string(), &item.entry_criteria)?;
            self.validate_sentries(&item.id.to_string(), &item.exit_criteria)?;
        }

        self.validate_sentries("casePlanModel", &self.exit_criteria)?;
        self.check_parent_cycles()?;

        Ok(())
    }

    fn validate_sentries(&self, owner: &str, sentries: &[Sentry]) -> CaseResult<()> {
        let mut ids = HashSet::new();
        for sentry in sentries {
            if !ids.insert(&sentry.id) {
                return Err(CaseError::DuplicateSentry {
                    owner: owner.to_string(),
                    sentry: sentry.id.clone(),
                });
            }
            if sentry.on_parts.is_empty() && sentry.if_part.is_none() {
                return Err(CaseError::Validation(format!(
                    "Sentry '{}' on '{}' has neither on-parts nor an if-part",
                    sentry.id, owner
                )));
            }
            for part in &sentry.on_parts {
                if self.get(&part.source).is_none() {
                    return Err(CaseError::UnknownOnPartSource {
                        sentry: sentry.id.clone(),
                        source_item: part.source.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn check_parent_cycles(&self) -> CaseResult<()> {
        for item in &self.plan_items {
            let mut visited = HashSet::new();
            let mut current = item.parent.as_ref();
            while let Some(parent) = current {
                if !visited.insert(parent) || parent == &item.id {
                    return Err(CaseError::Validation(format!(
                        "Stage nesting cycle through '{}'",
                        item.id
                    )));
                }
                current = self.get(parent).and_then(|p| p.parent.as_ref());
            }
        }
        Ok(())
    }

    pub fn plan_item_count(&self) -> usize {
        self.plan_items.len()
    }
}
