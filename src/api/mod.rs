//! REST surface of the workflow engine.
//!
//! One module per resource; `router` assembles them. All bodies are JSON and
//! every mutating endpoint returns the updated entity with its current
//! status embedded.

pub mod assignments;
pub mod books;
pub mod defenses;
pub mod error;
pub mod marks;
pub mod proposals;
pub mod types;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{delete, get, post, put};
use axum::Router;
use serde_json::json;

use crate::AppState;

async fn health_check() -> Result<Json<serde_json::Value>, StatusCode> {
    Ok(Json(json!({
        "status": "healthy",
        "service": "gradflow"
    })))
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        // Proposals: submit keys on the student, reads key on the proposal.
        .route(
            "/proposals/{id}",
            post(proposals::submit_proposal).get(proposals::get_proposal),
        )
        .route("/proposals/{id}/statuses", get(proposals::get_statuses))
        .route("/proposals/{id}/grading", get(proposals::get_grading))
        .route(
            "/proposals/{id}/defenses",
            post(defenses::schedule_defense).get(defenses::get_defense),
        )
        .route("/defenses/{id}", put(defenses::record_verdict))
        // Assignment registry
        .route("/reviewers/{proposal_id}", post(assignments::assign_reviewers))
        .route(
            "/reviewers/{proposal_id}/{reviewer_id}",
            delete(assignments::unassign_reviewer),
        )
        .route("/panelists/{proposal_id}", post(assignments::assign_panelists))
        .route(
            "/panelists/{proposal_id}/{panelist_id}",
            delete(assignments::unassign_panelist),
        )
        // Grading
        .route(
            "/reviewer-marks/{proposal_id}/{reviewer_id}",
            post(marks::record_reviewer_mark),
        )
        .route(
            "/panelist-marks/{proposal_id}/{panelist_id}",
            post(marks::record_panelist_mark),
        )
        // Books
        .route("/books/{id}", post(books::submit_book).get(books::get_book))
        .route("/books/{id}/examiners", post(books::assign_examiners))
        .route(
            "/internal-examiner-mark/{assignment_id}",
            put(books::record_examiner_mark),
        )
        .with_state(state)
}
