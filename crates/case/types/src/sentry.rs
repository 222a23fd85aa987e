//! Sentries: the conditional triggers that guard entry into and exit from plan items
//!
//! A sentry is a conjunction of on-parts plus an optional if-part. It is
//! satisfied once every on-part has been observed (since the sentry last
//! fired on that target) and the if-part, if any, evaluates to true.

use crate::{PlanItemId, PlanItemTransition, SentryId};
use serde::{Deserialize, Serialize};

/// Whether a sentry guards activation or early termination of its owner
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CriterionKind {
    Entry,
    Exit,
}

impl std::fmt::Display for CriterionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Entry => f.write_str("entry"),
            Self::Exit => f.write_str("exit"),
        }
    }
}

/// A single trigger condition: "plan item X went through transition T"
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OnPart {
    /// The plan item whose lifecycle is observed
    pub source: PlanItemId,
    /// The transition on the source that satisfies this part
    pub event: PlanItemTransition,
}

impl OnPart {
    pub fn new(source: impl Into<String>, event: PlanItemTransition) -> Self {
        Self {
            source: PlanItemId::new(source),
            event,
        }
    }

    /// Satisfied when the source completes
    pub fn complete(source: impl Into<String>) -> Self {
        Self::new(source, PlanItemTransition::Complete)
    }

    /// Satisfied when the source (a listener or milestone) occurs
    pub fn occur(source: impl Into<String>) -> Self {
        Self::new(source, PlanItemTransition::Occur)
    }

    /// Satisfied when the source exits through its own exit criteria
    pub fn exit(source: impl Into<String>) -> Self {
        Self::new(source, PlanItemTransition::Exit)
    }

    pub fn start(source: impl Into<String>) -> Self {
        Self::new(source, PlanItemTransition::Start)
    }
}

/// A variable-guarded condition, evaluated by the engine's expression evaluator
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IfPart {
    pub condition: String,
}

impl IfPart {
    pub fn new(condition: impl Into<String>) -> Self {
        Self {
            condition: condition.into(),
        }
    }
}

/// An entry or exit criterion of a plan item (or of the case plan model)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sentry {
    pub id: SentryId,
    #[serde(default)]
    pub on_parts: Vec<OnPart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_part: Option<IfPart>,
}

impl Sentry {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: SentryId::new(id),
            on_parts: Vec::new(),
            if_part: None,
        }
    }

    /// A sentry with a single on-part
    pub fn on(id: impl Into<String>, part: OnPart) -> Self {
        Self::new(id).with_on_part(part)
    }

    pub fn with_on_part(mut self, part: OnPart) -> Self {
        self.on_parts.push(part);
        self
    }

    pub fn with_if(mut self, condition: impl Into<String>) -> Self {
        self.if_part = Some(IfPart::new(condition));
        self
    }

    /// Index of every on-part listening for `event` on `source`
    pub fn matching_parts(&self, source: &PlanItemId, event: PlanItemTransition) -> Vec<usize> {
        self.on_parts
            .iter()
            .enumerate()
            .filter(|(_, p)| &p.source == source && p.event == event)
            .map(|(i, _)| i)
            .collect()
    }

    /// Whether any on-part observes `source`
    pub fn references(&self, source: &PlanItemId) -> bool {
        self.on_parts.iter().any(|p| &p.source == source)
    }

    /// A sentry with no on-parts is driven by its if-part alone
    pub fn is_condition_only(&self) -> bool {
        self.on_parts.is_empty()
    }
}
