//! Pure transition function for both workflow machines.
//!
//! Takes the entity's kind, its current stage (None until first submission),
//! and an event; returns the new stage plus effects, or a guard failure.
//! This function has no side effects, which is what makes the transition
//! table directly testable against the guards it encodes:
//!
//! | Event | Guard | Resulting stage |
//! |---|---|---|
//! | ProposalSubmitted | no current stage, proposal | Submitted |
//! | FirstGraderAssigned (reviewer/panelist) | Submitted | UnderReview |
//! | ReviewRoundCompleted | UnderReview | GradedPassed / GradedFailed |
//! | DefenseScheduled | GradedPassed | DefenseScheduled |
//! | DefenseVerdictRecorded | DefenseScheduled | DefendedPassed / DefendedFailed |
//! | BookSubmitted | no current stage, book | BookSubmitted |
//! | FirstGraderAssigned (examiner) | BookSubmitted | UnderExamination |
//! | ExaminationRoundCompleted | UnderExamination | ExaminationPassed / ExaminationFailed |
//!
//! Anything else is an `InvalidTransition`, reported with the current stage
//! so the caller can explain the conflict without a second read.

use thiserror::Error;

use super::effect::{Effect, LogLevel, Notification};
use super::event::WorkflowEvent;
use super::state::Stage;
use crate::domain::{EntityId, EntityKind, GraderRole};
use crate::grading::Verdict;

/// Guard failure: the event is not legal from the current stage.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("event {event} is not valid from stage {current:?}")]
pub struct InvalidTransition {
    /// Log summary of the rejected event.
    pub event: String,
    /// The stage the entity was in, `None` if never submitted.
    pub current: Option<Stage>,
}

/// Result of a successful transition.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionResult {
    pub stage: Stage,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    fn new(stage: Stage, effects: Vec<Effect>) -> Self {
        Self { stage, effects }
    }
}

/// Apply `event` to an entity of `kind` currently at `current`.
pub fn transition(
    entity_id: EntityId,
    kind: EntityKind,
    current: Option<Stage>,
    event: WorkflowEvent,
) -> Result<TransitionResult, InvalidTransition> {
    let reject = |event: &WorkflowEvent| InvalidTransition {
        event: event.log_summary(),
        current,
    };

    match (kind, current, &event) {
        // Submission requires a blank ledger: "draft" is the absence of any
        // status record, and a resubmission is a new entity.
        (EntityKind::Proposal, None, WorkflowEvent::ProposalSubmitted) => Ok(
            TransitionResult::new(
                Stage::Submitted,
                vec![Effect::Log {
                    level: LogLevel::Info,
                    message: format!("proposal {} submitted", entity_id),
                }],
            ),
        ),

        (EntityKind::Book, None, WorkflowEvent::BookSubmitted) => Ok(TransitionResult::new(
            Stage::BookSubmitted,
            vec![Effect::Log {
                level: LogLevel::Info,
                message: format!("book {} submitted", entity_id),
            }],
        )),

        // The first reviewer or panelist moves a submitted proposal under
        // review; the first examiner moves a submitted book under
        // examination.
        (
            EntityKind::Proposal,
            Some(Stage::Submitted),
            WorkflowEvent::FirstGraderAssigned {
                role: GraderRole::Reviewer | GraderRole::Panelist,
            },
        ) => Ok(TransitionResult::new(
            Stage::UnderReview,
            vec![Effect::Notify(Notification::ReviewStarted { entity_id })],
        )),

        (
            EntityKind::Book,
            Some(Stage::BookSubmitted),
            WorkflowEvent::FirstGraderAssigned {
                role: GraderRole::Examiner,
            },
        ) => Ok(TransitionResult::new(Stage::UnderExamination, vec![])),

        (
            EntityKind::Proposal,
            Some(Stage::UnderReview),
            WorkflowEvent::ReviewRoundCompleted { outcome },
        ) => {
            let passed = outcome.passed();
            let stage = if passed {
                Stage::GradedPassed
            } else {
                Stage::GradedFailed
            };
            Ok(TransitionResult::new(
                stage,
                vec![Effect::Notify(Notification::GradingCompleted {
                    entity_id,
                    passed,
                })],
            ))
        }

        // Only a passed review can proceed to a defense.
        (EntityKind::Proposal, Some(Stage::GradedPassed), WorkflowEvent::DefenseScheduled) => {
            Ok(TransitionResult::new(Stage::DefenseScheduled, vec![]))
        }

        (
            EntityKind::Proposal,
            Some(Stage::DefenseScheduled),
            WorkflowEvent::DefenseVerdictRecorded { verdict },
        ) => {
            let passed = *verdict != Verdict::Fail;
            let stage = if passed {
                Stage::DefendedPassed
            } else {
                Stage::DefendedFailed
            };
            Ok(TransitionResult::new(
                stage,
                vec![Effect::Notify(Notification::DefenseDecided {
                    entity_id,
                    passed,
                })],
            ))
        }

        (
            EntityKind::Book,
            Some(Stage::UnderExamination),
            WorkflowEvent::ExaminationRoundCompleted { passed },
        ) => {
            let stage = if *passed {
                Stage::ExaminationPassed
            } else {
                Stage::ExaminationFailed
            };
            Ok(TransitionResult::new(
                stage,
                vec![Effect::Notify(Notification::ExaminationCompleted {
                    entity_id,
                    passed: *passed,
                })],
            ))
        }

        _ => Err(reject(&event)),
    }
}
