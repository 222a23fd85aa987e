//! Lifecycle states and transitions of plan item and case instances

use serde::{Deserialize, Serialize};

// ── Plan Item State ──────────────────────────────────────────────────

/// The lifecycle state of a plan item instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum PlanItemState {
    /// Exists, waiting for its entry criteria (or for its container to admit it)
    #[default]
    Available,
    /// Entry satisfied, waiting for a manual start
    Enabled,
    /// Manually disabled; settled for completion accounting
    Disabled,
    /// Executing
    Active,
    /// Paused; the state to resume to is kept on the instance
    Suspended,
    /// A prior instance of a repeating item ran; a new round may still start
    WaitingForRepetition,
    /// Finished successfully
    Completed,
    /// Exited, terminated by its container, or removed as an orphan
    Terminated,
}

impl PlanItemState {
    /// Terminal states are absorbing
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Terminated)
    }

    /// Non-terminal states that still satisfy a container's completion requirement
    pub fn is_semi_terminal(&self) -> bool {
        matches!(self, Self::WaitingForRepetition | Self::Disabled)
    }

    /// Terminal or semi-terminal
    pub fn is_settled(&self) -> bool {
        self.is_terminal() || self.is_semi_terminal()
    }

    pub fn is_live(&self) -> bool {
        !self.is_terminal()
    }

    /// Query-facing lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::WaitingForRepetition => "wait_repetition",
            Self::Completed => "completed",
            Self::Terminated => "terminated",
        }
    }
}

impl std::fmt::Display for PlanItemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Case State ───────────────────────────────────────────────────────

/// The lifecycle state of a case instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CaseState {
    #[default]
    Active,
    /// The root container completed
    Completed,
    /// A case-level exit sentry fired or the case was terminated manually
    Terminated,
}

impl CaseState {
    pub fn is_ended(&self) -> bool {
        matches!(self, Self::Completed | Self::Terminated)
    }
}

// ── Transitions ──────────────────────────────────────────────────────

/// A lifecycle transition of a plan item instance.
///
/// Transitions are what sentry on-parts listen for: an on-part names a
/// source plan item and the transition on it that satisfies the part.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PlanItemTransition {
    Create,
    Start,
    Enable,
    Disable,
    ManualStart,
    Complete,
    /// An event listener or milestone occurred
    Occur,
    Terminate,
    /// Terminated by one of its own exit sentries
    Exit,
    /// Terminated because its container ended
    ParentTerminate,
    Suspend,
    Resume,
}

impl PlanItemTransition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Start => "start",
            Self::Enable => "enable",
            Self::Disable => "disable",
            Self::ManualStart => "manualStart",
            Self::Complete => "complete",
            Self::Occur => "occur",
            Self::Terminate => "terminate",
            Self::Exit => "exit",
            Self::ParentTerminate => "parentTerminate",
            Self::Suspend => "suspend",
            Self::Resume => "resume",
        }
    }
}

impl std::fmt::Display for PlanItemTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
