//! Proposal submission and read endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use super::error::ApiResult;
use super::types::{
    EntityView, GradingSummaryView, StatusView, SubmitProposalRequest,
};
use crate::domain::{EntityId, StudentId};
use crate::workflow::ProposalSubmission;
use crate::AppState;

/// `POST /proposals/{studentId}` — submit a proposal for a student.
pub async fn submit_proposal(
    State(state): State<Arc<AppState>>,
    Path(student_id): Path<Uuid>,
    Json(body): Json<SubmitProposalRequest>,
) -> ApiResult<(StatusCode, Json<EntityView>)> {
    let submitted = state
        .engine
        .submit_proposal(
            StudentId(student_id),
            ProposalSubmission {
                title: body.title,
                description: body.description,
                research_area: body.research_area,
                submission_date: body.submission_date,
                student_name: body.student_name,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(EntityView::from(&submitted))))
}

/// `GET /proposals/{proposalId}` — proposal with its current status.
pub async fn get_proposal(
    State(state): State<Arc<AppState>>,
    Path(proposal_id): Path<Uuid>,
) -> ApiResult<Json<EntityView>> {
    let proposal = state.engine.proposal_state(EntityId(proposal_id)).await?;
    Ok(Json(EntityView::from(&proposal)))
}

/// `GET /proposals/{proposalId}/statuses` — full ledger history.
pub async fn get_statuses(
    State(state): State<Arc<AppState>>,
    Path(proposal_id): Path<Uuid>,
) -> ApiResult<Json<Vec<StatusView>>> {
    // Validate the id resolves to a proposal before exposing its ledger.
    state.engine.proposal_state(EntityId(proposal_id)).await?;
    let history = state.engine.status_history(EntityId(proposal_id)).await?;
    Ok(Json(history.iter().map(StatusView::from).collect()))
}

/// `GET /proposals/{proposalId}/grading` — marks and aggregates.
pub async fn get_grading(
    State(state): State<Arc<AppState>>,
    Path(proposal_id): Path<Uuid>,
) -> ApiResult<Json<GradingSummaryView>> {
    state.engine.proposal_state(EntityId(proposal_id)).await?;
    let summary = state.engine.grading_summary(EntityId(proposal_id)).await?;
    Ok(Json(GradingSummaryView::from(&summary)))
}
