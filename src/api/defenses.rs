//! Defense scheduling and verdict endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use super::error::{ApiError, ApiResult};
use super::types::{
    DefenseResponse, DefenseVerdictRequest, DefenseView, EntityView, ScheduleDefenseRequest,
};
use crate::domain::{DefenseId, EntityId, PersonId};
use crate::workflow::DefenseRequest;
use crate::AppState;

/// `POST /proposals/{proposalId}/defenses` — schedule (or re-schedule) the
/// proposal's defense. One defense per proposal: a second call updates it in
/// place until a verdict is recorded.
pub async fn schedule_defense(
    State(state): State<Arc<AppState>>,
    Path(proposal_id): Path<Uuid>,
    Json(body): Json<ScheduleDefenseRequest>,
) -> ApiResult<(StatusCode, Json<DefenseResponse>)> {
    let (defense, entity_state) = state
        .engine
        .schedule_defense(
            EntityId(proposal_id),
            DefenseRequest {
                scheduled_date: body.scheduled_date,
                location: body.location,
                chairperson_id: PersonId(body.chairperson_id),
                minutes_secretary_id: PersonId(body.minutes_secretary_id),
                panelist_ids: body.panelist_ids.into_iter().map(PersonId).collect(),
                reviewer_ids: body.reviewer_ids.into_iter().map(PersonId).collect(),
            },
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(DefenseResponse {
            defense: DefenseView::from(&defense),
            entity: EntityView::from(&entity_state),
        }),
    ))
}

/// `GET /proposals/{proposalId}/defenses` — the proposal's defense, if any.
pub async fn get_defense(
    State(state): State<Arc<AppState>>,
    Path(proposal_id): Path<Uuid>,
) -> ApiResult<Json<DefenseView>> {
    let defense = state
        .engine
        .defense_for_proposal(EntityId(proposal_id))
        .await?
        .ok_or_else(|| ApiError::not_found(format!("no defense for proposal {proposal_id}")))?;
    Ok(Json(DefenseView::from(&defense)))
}

/// `PUT /defenses/{defenseId}` — record the verdict. Decided exactly once;
/// a second call fails with `ALREADY_DECIDED`.
pub async fn record_verdict(
    State(state): State<Arc<AppState>>,
    Path(defense_id): Path<Uuid>,
    Json(body): Json<DefenseVerdictRequest>,
) -> ApiResult<Json<DefenseResponse>> {
    let (defense, entity_state) = state
        .engine
        .record_defense_verdict(DefenseId(defense_id), &body.verdict, body.comments)
        .await?;
    Ok(Json(DefenseResponse {
        defense: DefenseView::from(&defense),
        entity: EntityView::from(&entity_state),
    }))
}
