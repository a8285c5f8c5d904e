//! Workflow stages for proposals and dissertation books.
//!
//! A stage is what the ledger's current status record denotes. "Draft" is
//! deliberately not a stage: an entity that has never been submitted has no
//! status record at all, and the submit transitions require that absence.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::EntityKind;

/// Every workflow stage across both state machines.
///
/// Proposal: `Submitted → UnderReview → GradedPassed|GradedFailed →
/// DefenseScheduled → DefendedPassed|DefendedFailed`.
///
/// Book: `BookSubmitted → UnderExamination →
/// ExaminationPassed|ExaminationFailed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    // Proposal machine
    Submitted,
    UnderReview,
    GradedPassed,
    GradedFailed,
    DefenseScheduled,
    DefendedPassed,
    DefendedFailed,

    // Book machine
    BookSubmitted,
    UnderExamination,
    ExaminationPassed,
    ExaminationFailed,
}

impl Stage {
    /// Which entity kind this stage belongs to.
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Submitted
            | Self::UnderReview
            | Self::GradedPassed
            | Self::GradedFailed
            | Self::DefenseScheduled
            | Self::DefendedPassed
            | Self::DefendedFailed => EntityKind::Proposal,
            Self::BookSubmitted
            | Self::UnderExamination
            | Self::ExaminationPassed
            | Self::ExaminationFailed => EntityKind::Book,
        }
    }

    /// Terminal stages accept no further workflow events.
    ///
    /// A failed review is terminal: resubmission is a new entity, the failed
    /// attempt's ledger stays closed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::GradedFailed
                | Self::DefendedPassed
                | Self::DefendedFailed
                | Self::ExaminationPassed
                | Self::ExaminationFailed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::UnderReview => "under_review",
            Self::GradedPassed => "graded_passed",
            Self::GradedFailed => "graded_failed",
            Self::DefenseScheduled => "defense_scheduled",
            Self::DefendedPassed => "defended_passed",
            Self::DefendedFailed => "defended_failed",
            Self::BookSubmitted => "book_submitted",
            Self::UnderExamination => "under_examination",
            Self::ExaminationPassed => "examination_passed",
            Self::ExaminationFailed => "examination_failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "submitted" => Some(Self::Submitted),
            "under_review" => Some(Self::UnderReview),
            "graded_passed" => Some(Self::GradedPassed),
            "graded_failed" => Some(Self::GradedFailed),
            "defense_scheduled" => Some(Self::DefenseScheduled),
            "defended_passed" => Some(Self::DefendedPassed),
            "defended_failed" => Some(Self::DefendedFailed),
            "book_submitted" => Some(Self::BookSubmitted),
            "under_examination" => Some(Self::UnderExamination),
            "examination_passed" => Some(Self::ExaminationPassed),
            "examination_failed" => Some(Self::ExaminationFailed),
            _ => None,
        }
    }

    /// All stages, in machine order. Used to seed status definitions.
    pub fn all() -> [Stage; 11] {
        [
            Self::Submitted,
            Self::UnderReview,
            Self::GradedPassed,
            Self::GradedFailed,
            Self::DefenseScheduled,
            Self::DefendedPassed,
            Self::DefendedFailed,
            Self::BookSubmitted,
            Self::UnderExamination,
            Self::ExaminationPassed,
            Self::ExaminationFailed,
        ]
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trips() {
        for stage in Stage::all() {
            assert_eq!(Stage::parse(stage.as_str()), Some(stage));
        }
        assert_eq!(Stage::parse("draft"), None);
    }

    #[test]
    fn test_terminal_stages() {
        assert!(!Stage::Submitted.is_terminal());
        assert!(!Stage::UnderReview.is_terminal());
        assert!(!Stage::GradedPassed.is_terminal());
        assert!(!Stage::DefenseScheduled.is_terminal());
        assert!(!Stage::BookSubmitted.is_terminal());
        assert!(!Stage::UnderExamination.is_terminal());

        assert!(Stage::GradedFailed.is_terminal());
        assert!(Stage::DefendedPassed.is_terminal());
        assert!(Stage::DefendedFailed.is_terminal());
        assert!(Stage::ExaminationPassed.is_terminal());
        assert!(Stage::ExaminationFailed.is_terminal());
    }

    #[test]
    fn test_stage_kinds() {
        assert_eq!(Stage::Submitted.kind(), EntityKind::Proposal);
        assert_eq!(Stage::DefendedFailed.kind(), EntityKind::Proposal);
        assert_eq!(Stage::BookSubmitted.kind(), EntityKind::Book);
        assert_eq!(Stage::ExaminationPassed.kind(), EntityKind::Book);
    }
}
