//! Mark recording endpoints for reviewers and panelists.
//!
//! Recording against an assignment that already holds a mark updates it in
//! place. When the last outstanding reviewer submits, the response's embedded
//! status reflects the completed review round.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use super::error::ApiResult;
use super::types::{
    EntityView, MarkResponse, MarkView, PanelistMarkRequest, ReviewerMarkRequest,
};
use crate::domain::{EntityId, PersonId};
use crate::workflow::MarkSubmission;
use crate::AppState;

/// `POST /reviewer-marks/{proposalId}/{reviewerId}` — record a verdict.
pub async fn record_reviewer_mark(
    State(state): State<Arc<AppState>>,
    Path((proposal_id, reviewer_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<ReviewerMarkRequest>,
) -> ApiResult<Json<MarkResponse>> {
    let (mark, entity_state) = state
        .engine
        .record_reviewer_verdict(
            EntityId(proposal_id),
            PersonId(reviewer_id),
            &body.verdict,
            MarkSubmission {
                feedback: body.feedback,
                submitted_by: body.submitted_by,
            },
        )
        .await?;
    Ok(Json(MarkResponse {
        mark: MarkView::from(&mark),
        entity: EntityView::from(&entity_state),
    }))
}

/// `POST /panelist-marks/{proposalId}/{panelistId}` — record a numeric grade.
pub async fn record_panelist_mark(
    State(state): State<Arc<AppState>>,
    Path((proposal_id, panelist_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<PanelistMarkRequest>,
) -> ApiResult<Json<MarkResponse>> {
    let (mark, entity_state) = state
        .engine
        .record_panelist_grade(
            EntityId(proposal_id),
            PersonId(panelist_id),
            body.grade,
            MarkSubmission {
                feedback: body.feedback,
                submitted_by: body.submitted_by,
            },
        )
        .await?;
    Ok(Json(MarkResponse {
        mark: MarkView::from(&mark),
        entity: EntityView::from(&entity_state),
    }))
}
