//! Error types for the case runtime

use crate::{
    CaseDefinitionId, CaseInstanceId, HumanTaskId, PlanItemId, PlanItemInstanceId, PlanItemState,
    SentryId,
};

/// Failure of an if-part or repetition condition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExpressionError {
    #[error("Empty expression")]
    Empty,

    #[error("Cannot parse expression '{expression}': {reason}")]
    Syntax { expression: String, reason: String },

    #[error("Variable '{variable}' is not comparable in '{expression}'")]
    TypeMismatch { expression: String, variable: String },
}

/// Errors that can occur in case runtime operations
#[derive(Debug, thiserror::Error)]
pub enum CaseError {
    // ── Not found ────────────────────────────────────────────────────
    #[error("Case definition not found: {0}")]
    DefinitionNotFound(CaseDefinitionId),

    #[error("No case definition deployed for key: {0}")]
    DefinitionKeyNotFound(String),

    #[error("Case instance not found: {0}")]
    CaseInstanceNotFound(CaseInstanceId),

    #[error("Plan item instance not found: {0}")]
    PlanItemInstanceNotFound(PlanItemInstanceId),

    #[error("Human task not found: {0}")]
    TaskNotFound(HumanTaskId),

    #[error("Plan item not found in definition: {0}")]
    PlanItemNotFound(PlanItemId),

    #[error("Query expected at most one result, found {0}")]
    NotUnique(usize),

    // ── State ────────────────────────────────────────────────────────
    #[error("Plan item instance {id} is already terminal ({state})")]
    AlreadyTerminal {
        id: PlanItemInstanceId,
        state: PlanItemState,
    },

    #[error("Invalid state for '{operation}' on {id}: {state}")]
    InvalidState {
        id: PlanItemInstanceId,
        state: PlanItemState,
        operation: String,
    },

    #[error("Case instance {0} has already ended")]
    CaseEnded(CaseInstanceId),

    #[error("Plan item instance {id} is a {actual}, expected {expected}")]
    WrongKind {
        id: PlanItemInstanceId,
        expected: String,
        actual: String,
    },

    // ── Fatal ────────────────────────────────────────────────────────
    #[error("Expression evaluation failed: {0}")]
    Evaluation(#[from] ExpressionError),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    // ── Model validation ─────────────────────────────────────────────
    #[error("Duplicate plan item id: {0}")]
    DuplicatePlanItem(PlanItemId),

    #[error("Duplicate sentry id {sentry} on {owner}")]
    DuplicateSentry { owner: String, sentry: SentryId },

    #[error("Parent of {item} must be a stage: {parent}")]
    InvalidParent { item: PlanItemId, parent: PlanItemId },

    #[error("Sentry {sentry} references unknown plan item {source_item}")]
    UnknownOnPartSource {
        sentry: SentryId,
        source_item: PlanItemId,
    },

    #[error("Case definition validation error: {0}")]
    Validation(String),

    // ── Repository ───────────────────────────────────────────────────
    #[error("Concurrent modification of case {id}: expected revision {expected}, found {found}")]
    Conflict {
        id: CaseInstanceId,
        expected: u64,
        found: u64,
    },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl CaseError {
    /// Recoverable errors are surfaced to the caller; the case is untouched
    /// and the operation may be retried or corrected by the calling layer.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::Evaluation(_) | Self::InvariantViolation(_) | Self::Storage(_)
        )
    }

    /// A benign "already terminal" condition (e.g. two racing completions)
    pub fn is_already_terminal(&self) -> bool {
        matches!(self, Self::AlreadyTerminal { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::DefinitionNotFound(_)
                | Self::DefinitionKeyNotFound(_)
                | Self::CaseInstanceNotFound(_)
                | Self::PlanItemInstanceNotFound(_)
                | Self::TaskNotFound(_)
                | Self::PlanItemNotFound(_)
        )
    }
}

/// Result type alias for case operations
pub type CaseResult<T> = Result<T, CaseError>;
