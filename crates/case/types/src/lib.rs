//! Case Model and Runtime Types
//!
//! A case is a loosely ordered plan of work. Instead of a fixed sequence of
//! steps, plan items become active when their **sentries** are satisfied,
//! and containers (stages) complete once the work inside them has settled.
//!
//! # Key Concepts
//!
//! - **CaseDefinition**: The immutable model. A tree of plan items rooted at
//!   the implicit case plan model.
//! - **PlanItemDefinition**: A human task, generic task, stage, milestone or
//!   event listener, with its entry/exit sentries and repetition rule.
//! - **Sentry**: A conjunction of on-parts ("plan item X went through
//!   transition T") plus an optional if-part over case variables.
//! - **CaseInstance**: A running execution, owning an arena of
//!   **PlanItemInstance**s linked by index.
//! - **CaseEffect**: Work requested from collaborators (human tasks, timers)
//!   once an operation commits.
//!
//! # Design Principles
//!
//! 1. Definitions are data. Behavior differences between plan item kinds
//!    live in one table, [`PlanItemKind::behavior`].
//! 2. Instances are plain values. The engine mutates a private copy and
//!    swaps it in atomically.
//! 3. Ended plan item instances stay in the arena for history and queries.

#![deny(unsafe_code)]

mod definition;
mod effect;
mod errors;
mod ids;
mod instance;
mod sentry;
mod state;

pub use definition::*;
pub use effect::*;
pub use errors::*;
pub use ids::*;
pub use instance::*;
pub use sentry::*;
pub use state::*;
