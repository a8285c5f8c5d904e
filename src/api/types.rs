//! Request and response bodies for the REST surface.
//!
//! Wire form is camelCase JSON. Every mutating response embeds the entity's
//! current status so callers can refresh their view without a second read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Defense, Mark, MarkValue, PersonId};
use crate::grading::{CorrectionLevel, ReviewOutcome};
use crate::store::StatusEntry;
use crate::workflow::engine::{EntityState, GraderMark, GradingSummary};
use crate::workflow::PersonInput;

// =============================================================================
// Requests
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitProposalRequest {
    pub title: String,
    pub description: Option<String>,
    pub research_area: Option<String>,
    pub submission_date: Option<DateTime<Utc>>,
    pub student_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBookRequest {
    pub title: String,
    pub submission_date: Option<DateTime<Utc>>,
    pub student_name: Option<String>,
}

/// A person reference: an existing id, or identity fields to find-or-create
/// by email.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonPayload {
    pub id: Option<Uuid>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub institution: Option<String>,
}

impl From<PersonPayload> for PersonInput {
    fn from(p: PersonPayload) -> Self {
        Self {
            id: p.id.map(PersonId),
            name: p.name,
            email: p.email,
            institution: p.institution,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignReviewersRequest {
    pub reviewers: Vec<PersonPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignPanelistsRequest {
    pub panelists: Vec<PersonPayload>,
}

/// Examiners can arrive as full person payloads or as bare person ids
/// (already-registered examiners), with an optional assignment date.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignExaminersRequest {
    #[serde(default)]
    pub examiners: Vec<PersonPayload>,
    #[serde(default)]
    pub examiner_ids: Vec<Uuid>,
    pub assignment_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewerMarkRequest {
    pub verdict: String,
    pub feedback: Option<String>,
    pub submitted_by: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelistMarkRequest {
    pub grade: f64,
    pub feedback: Option<String>,
    pub submitted_by: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExaminerMarkRequest {
    pub mark: f64,
    pub comments: Option<String>,
    pub submitted_by: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleDefenseRequest {
    pub scheduled_date: DateTime<Utc>,
    pub location: String,
    pub chairperson_id: Uuid,
    pub minutes_secretary_id: Uuid,
    pub panelist_ids: Vec<Uuid>,
    pub reviewer_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefenseVerdictRequest {
    pub verdict: String,
    pub comments: Option<String>,
}

// =============================================================================
// Responses
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub name: String,
    pub stage: String,
    pub color: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_duration_days: Option<u32>,
    pub start_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    pub is_current: bool,
}

impl From<&StatusEntry> for StatusView {
    fn from(entry: &StatusEntry) -> Self {
        Self {
            name: entry.definition.name.clone(),
            stage: entry.definition.stage.as_str().to_string(),
            color: entry.definition.color.clone(),
            expected_duration_days: entry.definition.expected_duration_days,
            start_date: entry.record.start_date,
            end_date: entry.record.end_date,
            is_current: entry.record.is_current,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityView {
    pub id: Uuid,
    pub kind: String,
    pub student_id: Uuid,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub research_area: Option<String>,
    pub submission_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defense_date: Option<DateTime<Utc>>,
    pub current_status: Option<StatusView>,
}

impl From<&EntityState> for EntityView {
    fn from(state: &EntityState) -> Self {
        Self {
            id: state.entity.id.0,
            kind: state.entity.kind.as_str().to_string(),
            student_id: state.entity.student_id.0,
            title: state.entity.title.clone(),
            description: state.entity.description.clone(),
            research_area: state.entity.research_area.clone(),
            submission_date: state.entity.submission_date,
            defense_date: state.entity.defense_date,
            current_status: state.current.as_ref().map(StatusView::from),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonView {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub institution: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grade: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    pub graded_by_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_by_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Mark> for MarkView {
    fn from(mark: &Mark) -> Self {
        let (verdict, grade) = match mark.value {
            MarkValue::Verdict(v) => (Some(v.as_str().to_string()), None),
            MarkValue::Grade(g) => (None, Some(g)),
        };
        Self {
            verdict,
            grade,
            feedback: mark.feedback.clone(),
            graded_by_id: mark.graded_by.0,
            submitted_by_id: mark.submitted_by.clone(),
            created_at: mark.created_at,
            updated_at: mark.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentView {
    pub id: Uuid,
    pub role: String,
    pub person: PersonView,
    pub assigned_at: DateTime<Utc>,
    pub mark: Option<MarkView>,
}

impl From<&GraderMark> for AssignmentView {
    fn from(grader: &GraderMark) -> Self {
        Self {
            id: grader.assignment.id.0,
            role: grader.assignment.role.as_str().to_string(),
            person: PersonView {
                id: grader.person.id.0,
                name: grader.person.name.clone(),
                email: grader.person.email.clone(),
                institution: grader.person.institution.clone(),
            },
            assigned_at: grader.assignment.assigned_at,
            mark: grader.mark.as_ref().map(MarkView::from),
        }
    }
}

/// Response to assignment add/remove: the role's full roster plus the entity
/// with its (possibly transitioned) current status.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterResponse {
    pub entity: EntityView,
    pub assignments: Vec<AssignmentView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkResponse {
    pub mark: MarkView,
    pub entity: EntityView,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DefenseView {
    pub id: Uuid,
    pub proposal_id: Uuid,
    pub scheduled_date: DateTime<Utc>,
    pub location: String,
    pub chairperson_id: Uuid,
    pub minutes_secretary_id: Uuid,
    pub panelist_ids: Vec<Uuid>,
    pub reviewer_ids: Vec<Uuid>,
    pub scheduled_in_past: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
}

impl From<&Defense> for DefenseView {
    fn from(defense: &Defense) -> Self {
        Self {
            id: defense.id.0,
            proposal_id: defense.entity_id.0,
            scheduled_date: defense.scheduled_date,
            location: defense.location.clone(),
            chairperson_id: defense.chairperson_id.0,
            minutes_secretary_id: defense.minutes_secretary_id.0,
            panelist_ids: defense.panelist_ids.iter().map(|p| p.0).collect(),
            reviewer_ids: defense.reviewer_ids.iter().map(|p| p.0).collect(),
            scheduled_in_past: defense.scheduled_in_past,
            verdict: defense.verdict.map(|v| v.as_str().to_string()),
            comments: defense.comments.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DefenseResponse {
    pub defense: DefenseView,
    pub entity: EntityView,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewOutcomeView {
    pub passed: bool,
    pub corrections: Option<String>,
}

impl From<ReviewOutcome> for ReviewOutcomeView {
    fn from(outcome: ReviewOutcome) -> Self {
        match outcome {
            ReviewOutcome::Passed { corrections } => Self {
                passed: true,
                corrections: Some(
                    match corrections {
                        CorrectionLevel::None => "none",
                        CorrectionLevel::Minor => "minor",
                        CorrectionLevel::Major => "major",
                    }
                    .to_string(),
                ),
            },
            ReviewOutcome::Failed => Self {
                passed: false,
                corrections: None,
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingSummaryView {
    pub reviewers: Vec<AssignmentView>,
    pub panelists: Vec<AssignmentView>,
    pub examiners: Vec<AssignmentView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewer_outcome: Option<ReviewOutcomeView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub panelist_mean: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub examiner_mean: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub examiner_passed: Option<bool>,
}

impl From<&GradingSummary> for GradingSummaryView {
    fn from(summary: &GradingSummary) -> Self {
        Self {
            reviewers: summary.reviewers.iter().map(AssignmentView::from).collect(),
            panelists: summary.panelists.iter().map(AssignmentView::from).collect(),
            examiners: summary.examiners.iter().map(AssignmentView::from).collect(),
            reviewer_outcome: summary.reviewer_outcome.map(ReviewOutcomeView::from),
            panelist_mean: summary.panelist_mean,
            examiner_mean: summary.examiner_outcome.map(|o| o.mean),
            examiner_passed: summary.examiner_outcome.map(|o| o.passed),
        }
    }
}
