//! Dissertation book endpoints: submission, examiner assignment, and
//! examiner marks.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use super::error::ApiResult;
use super::types::{
    AssignExaminersRequest, AssignmentView, EntityView, ExaminerMarkRequest, MarkResponse,
    MarkView, RosterResponse, SubmitBookRequest,
};
use crate::domain::{AssignmentId, EntityId, GraderRole, PersonId, StudentId};
use crate::workflow::{BookSubmission, MarkSubmission, PersonInput};
use crate::AppState;

/// `POST /books/{studentId}` — submit a dissertation book for a student.
pub async fn submit_book(
    State(state): State<Arc<AppState>>,
    Path(student_id): Path<Uuid>,
    Json(body): Json<SubmitBookRequest>,
) -> ApiResult<(StatusCode, Json<EntityView>)> {
    let submitted = state
        .engine
        .submit_book(
            StudentId(student_id),
            BookSubmission {
                title: body.title,
                submission_date: body.submission_date,
                student_name: body.student_name,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(EntityView::from(&submitted))))
}

/// `GET /books/{bookId}` — book with its current status.
pub async fn get_book(
    State(state): State<Arc<AppState>>,
    Path(book_id): Path<Uuid>,
) -> ApiResult<Json<EntityView>> {
    let book = state.engine.book_state(EntityId(book_id)).await?;
    Ok(Json(EntityView::from(&book)))
}

/// `POST /books/{bookId}/examiners` — assign examiners, by id or by person
/// payload.
pub async fn assign_examiners(
    State(state): State<Arc<AppState>>,
    Path(book_id): Path<Uuid>,
    Json(body): Json<AssignExaminersRequest>,
) -> ApiResult<Json<RosterResponse>> {
    let mut people: Vec<PersonInput> = body.examiners.into_iter().map(Into::into).collect();
    people.extend(body.examiner_ids.into_iter().map(|id| PersonInput {
        id: Some(PersonId(id)),
        ..PersonInput::default()
    }));

    let (_, entity_state) = state
        .engine
        .assign_graders(
            EntityId(book_id),
            GraderRole::Examiner,
            people,
            body.assignment_date,
        )
        .await?;

    let graders = state
        .engine
        .list_graders(entity_state.entity.id, GraderRole::Examiner)
        .await?;
    Ok(Json(RosterResponse {
        entity: EntityView::from(&entity_state),
        assignments: graders.iter().map(AssignmentView::from).collect(),
    }))
}

/// `PUT /internal-examiner-mark/{assignmentId}` — record an examiner's mark.
pub async fn record_examiner_mark(
    State(state): State<Arc<AppState>>,
    Path(assignment_id): Path<Uuid>,
    Json(body): Json<ExaminerMarkRequest>,
) -> ApiResult<Json<MarkResponse>> {
    let (mark, entity_state) = state
        .engine
        .record_examiner_mark(
            AssignmentId(assignment_id),
            body.mark,
            MarkSubmission {
                feedback: body.comments,
                submitted_by: body.submitted_by,
            },
        )
        .await?;
    Ok(Json(MarkResponse {
        mark: MarkView::from(&mark),
        entity: EntityView::from(&entity_state),
    }))
}
