//! Reviewer and panelist assignment endpoints.
//!
//! Adds are idempotent by (proposal, role, email): re-posting the same
//! person returns the existing assignment instead of erroring. Removal is a
//! hard delete that also drops any recorded mark.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use super::error::ApiResult;
use super::types::{
    AssignPanelistsRequest, AssignReviewersRequest, AssignmentView, EntityView, RosterResponse,
};
use crate::domain::{EntityId, GraderRole, PersonId};
use crate::workflow::engine::EntityState;
use crate::AppState;

async fn roster_response(
    state: &AppState,
    entity_state: EntityState,
    role: GraderRole,
) -> ApiResult<Json<RosterResponse>> {
    let graders = state
        .engine
        .list_graders(entity_state.entity.id, role)
        .await?;
    Ok(Json(RosterResponse {
        entity: EntityView::from(&entity_state),
        assignments: graders.iter().map(AssignmentView::from).collect(),
    }))
}

/// `POST /reviewers/{proposalId}` — assign reviewers.
pub async fn assign_reviewers(
    State(state): State<Arc<AppState>>,
    Path(proposal_id): Path<Uuid>,
    Json(body): Json<AssignReviewersRequest>,
) -> ApiResult<Json<RosterResponse>> {
    let (_, entity_state) = state
        .engine
        .assign_graders(
            EntityId(proposal_id),
            GraderRole::Reviewer,
            body.reviewers.into_iter().map(Into::into).collect(),
            None,
        )
        .await?;
    roster_response(&state, entity_state, GraderRole::Reviewer).await
}

/// `DELETE /reviewers/{proposalId}/{reviewerId}` — unassign a reviewer.
pub async fn unassign_reviewer(
    State(state): State<Arc<AppState>>,
    Path((proposal_id, reviewer_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<RosterResponse>> {
    let entity_state = state
        .engine
        .unassign_grader(
            EntityId(proposal_id),
            GraderRole::Reviewer,
            PersonId(reviewer_id),
        )
        .await?;
    roster_response(&state, entity_state, GraderRole::Reviewer).await
}

/// `POST /panelists/{proposalId}` — assign panelists.
pub async fn assign_panelists(
    State(state): State<Arc<AppState>>,
    Path(proposal_id): Path<Uuid>,
    Json(body): Json<AssignPanelistsRequest>,
) -> ApiResult<Json<RosterResponse>> {
    let (_, entity_state) = state
        .engine
        .assign_graders(
            EntityId(proposal_id),
            GraderRole::Panelist,
            body.panelists.into_iter().map(Into::into).collect(),
            None,
        )
        .await?;
    roster_response(&state, entity_state, GraderRole::Panelist).await
}

/// `DELETE /panelists/{proposalId}/{panelistId}` — unassign a panelist.
pub async fn unassign_panelist(
    State(state): State<Arc<AppState>>,
    Path((proposal_id, panelist_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<RosterResponse>> {
    let entity_state = state
        .engine
        .unassign_grader(
            EntityId(proposal_id),
            GraderRole::Panelist,
            PersonId(panelist_id),
        )
        .await?;
    roster_response(&state, entity_state, GraderRole::Panelist).await
}
