//! The academic workflow engine.
//!
//! This module implements the state machines that move a research proposal
//! and a dissertation book through their lifecycles. The design separates:
//! - **State**: where an entity is (`state::Stage`, derived from the ledger)
//! - **Events**: what happened (`event::WorkflowEvent`)
//! - **Effects**: what to tell the outside world (`effect::Effect`)
//! - **Transition**: pure function `(stage, event) -> (stage, effects)`
//! - **Engine**: the orchestrator that runs transitions against the store
//!   under per-entity locks and evaluates grading completion.

pub mod effect;
pub mod engine;
pub mod event;
pub mod state;
pub mod transition;

pub use effect::{LogNotificationSink, Notification, NotificationSink};
pub use engine::{
    BookSubmission, DefenseRequest, EntityState, GraderMark, GradingSummary, MarkSubmission,
    PersonInput, ProposalSubmission, WorkflowEngine, WorkflowError,
};
pub use event::WorkflowEvent;
pub use state::Stage;
pub use transition::{transition, InvalidTransition, TransitionResult};
