//! Aggregation policies for reviewer verdicts and numeric marks.
//!
//! This module is pure: it knows nothing about storage or HTTP. The engine
//! collects the recorded marks for an entity and asks this module what they
//! add up to. Keeping the policy side-effect-free means the aggregation rules
//! can be tested exhaustively without a store.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Default pass mark for numeric (panelist/examiner) aggregation.
///
/// A mean of exactly the pass mark passes (inclusive threshold).
pub const DEFAULT_PASS_MARK: f64 = 60.0;

/// Qualitative verdict a reviewer (or a defense panel) can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Pass,
    PassWithMinorCorrections,
    PassWithMajorCorrections,
    Fail,
}

impl Verdict {
    /// Parse from the wire form used by the API (`"PASS"`, `"FAIL"`, ...).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PASS" => Some(Self::Pass),
            "PASS_WITH_MINOR_CORRECTIONS" => Some(Self::PassWithMinorCorrections),
            "PASS_WITH_MAJOR_CORRECTIONS" => Some(Self::PassWithMajorCorrections),
            "FAIL" => Some(Self::Fail),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::PassWithMinorCorrections => "PASS_WITH_MINOR_CORRECTIONS",
            Self::PassWithMajorCorrections => "PASS_WITH_MAJOR_CORRECTIONS",
            Self::Fail => "FAIL",
        }
    }

    /// The correction level this verdict demands, if it is a passing verdict.
    pub fn corrections(&self) -> Option<CorrectionLevel> {
        match self {
            Self::Pass => Some(CorrectionLevel::None),
            Self::PassWithMinorCorrections => Some(CorrectionLevel::Minor),
            Self::PassWithMajorCorrections => Some(CorrectionLevel::Major),
            Self::Fail => None,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Correction level demanded by a passing review.
///
/// Ordering matters: when aggregating, the strictest level across all
/// reviewers surfaces as the aggregate (major > minor > none).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionLevel {
    None,
    Minor,
    Major,
}

/// Aggregate outcome of a completed reviewer round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewOutcome {
    Passed { corrections: CorrectionLevel },
    Failed,
}

impl ReviewOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, Self::Passed { .. })
    }
}

impl fmt::Display for ReviewOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed {
                corrections: CorrectionLevel::None,
            } => write!(f, "passed"),
            Self::Passed {
                corrections: CorrectionLevel::Minor,
            } => write!(f, "passed with minor corrections"),
            Self::Passed {
                corrections: CorrectionLevel::Major,
            } => write!(f, "passed with major corrections"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Aggregate outcome of a completed numeric (panelist/examiner) round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumericOutcome {
    /// Arithmetic mean of the recorded grades.
    pub mean: f64,
    /// Whether the mean meets the pass mark (inclusive).
    pub passed: bool,
}

/// Combine reviewer verdicts into a single outcome.
///
/// Any single `FAIL` fails the round regardless of the other verdicts.
/// Otherwise the round passes and the strictest correction level surfaces.
/// Returns `None` for an empty slice: no verdicts means nothing to aggregate,
/// and the caller must not treat that as completion.
pub fn aggregate_verdicts(verdicts: &[Verdict]) -> Option<ReviewOutcome> {
    if verdicts.is_empty() {
        return None;
    }

    let mut strictest = CorrectionLevel::None;
    for verdict in verdicts {
        match verdict.corrections() {
            None => return Some(ReviewOutcome::Failed),
            Some(level) => strictest = strictest.max(level),
        }
    }

    Some(ReviewOutcome::Passed {
        corrections: strictest,
    })
}

/// Combine numeric grades into a mean and a pass/fail against `pass_mark`.
///
/// Returns `None` for an empty slice.
pub fn aggregate_grades(grades: &[f64], pass_mark: f64) -> Option<NumericOutcome> {
    if grades.is_empty() {
        return None;
    }

    let mean = grades.iter().sum::<f64>() / grades.len() as f64;
    Some(NumericOutcome {
        mean,
        passed: mean >= pass_mark,
    })
}

/// Returns true if `grade` is a representable mark (0..=100).
pub fn grade_in_range(grade: f64) -> bool {
    grade.is_finite() && (0.0..=100.0).contains(&grade)
}
