//! End-to-end REST scenarios over the assembled router.
//!
//! Exercises the full request flow (HTTP -> handlers -> engine -> store)
//! against the in-memory backend, asserting the status/error contract the
//! UI layer depends on: every mutating response embeds the current status,
//! and guard failures report it too.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use gradflow::grading::DEFAULT_PASS_MARK;
use gradflow::store::InMemoryRepository;
use gradflow::workflow::{LogNotificationSink, WorkflowEngine};
use gradflow::AppState;

fn test_router() -> axum::Router {
    let engine = Arc::new(WorkflowEngine::new(
        Arc::new(InMemoryRepository::new()),
        Arc::new(LogNotificationSink),
        DEFAULT_PASS_MARK,
    ));
    gradflow::api::router(Arc::new(AppState::new(engine)))
}

async fn request(
    router: &axum::Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let response = router
        .clone()
        .oneshot(builder.body(body).expect("request build"))
        .await
        .expect("request");

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, value)
}

fn status_name(entity: &Value) -> &str {
    entity["currentStatus"]["name"].as_str().unwrap()
}

async fn submit_proposal(router: &axum::Router) -> String {
    let (status, body) = request(
        router,
        Method::POST,
        &format!("/proposals/{}", Uuid::new_v4()),
        Some(json!({
            "title": "Learned index structures for spatial data",
            "researchArea": "Databases",
            "studentName": "C. Mwangi"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(status_name(&body), "Submitted");
    body["id"].as_str().unwrap().to_string()
}

/// Assign reviewers and return (person_id, assignment_id) pairs in roster
/// order.
async fn assign_reviewers(
    router: &axum::Router,
    proposal_id: &str,
    emails: &[&str],
) -> (Value, Vec<(String, String)>) {
    let reviewers: Vec<Value> = emails
        .iter()
        .map(|email| json!({"name": email.split('@').next().unwrap(), "email": email}))
        .collect();
    let (status, body) = request(
        router,
        Method::POST,
        &format!("/reviewers/{proposal_id}"),
        Some(json!({ "reviewers": reviewers })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let pairs = body["assignments"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| {
            (
                a["person"]["id"].as_str().unwrap().to_string(),
                a["id"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    (body, pairs)
}

#[tokio::test]
async fn test_health() {
    let router = test_router();
    let (status, body) = request(&router, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_unknown_proposal_is_404() {
    let router = test_router();
    let (status, body) = request(
        &router,
        Method::GET,
        &format!("/proposals/{}", Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

/// The core flow: submit, assign two reviewers, grade one (no change),
/// grade the other (review completes), aggregate = major corrections.
#[tokio::test]
async fn test_proposal_review_flow() {
    let router = test_router();
    let proposal_id = submit_proposal(&router).await;

    let (roster, reviewers) = assign_reviewers(
        &router,
        &proposal_id,
        &["okello@example.ac.ug", "nansubuga@example.ac.ug"],
    )
    .await;
    assert_eq!(status_name(&roster["entity"]), "Under Review");
    assert_eq!(reviewers.len(), 2);

    let (status, body) = request(
        &router,
        Method::POST,
        &format!("/reviewer-marks/{proposal_id}/{}", reviewers[0].0),
        Some(json!({"verdict": "PASS", "feedback": "Strong proposal"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(status_name(&body["entity"]), "Under Review");

    let (status, body) = request(
        &router,
        Method::POST,
        &format!("/reviewer-marks/{proposal_id}/{}", reviewers[1].0),
        Some(json!({"verdict": "PASS_WITH_MAJOR_CORRECTIONS"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(status_name(&body["entity"]), "Graded - Passed");

    let (status, grading) = request(
        &router,
        Method::GET,
        &format!("/proposals/{proposal_id}/grading"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(grading["reviewerOutcome"]["passed"], true);
    assert_eq!(grading["reviewerOutcome"]["corrections"], "major");

    let (status, history) = request(
        &router,
        Method::GET,
        &format!("/proposals/{proposal_id}/statuses"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = history
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Submitted", "Under Review", "Graded - Passed"]);
    let current: Vec<bool> = history
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["isCurrent"].as_bool().unwrap())
        .collect();
    assert_eq!(current, vec![false, false, true]);
}

#[tokio::test]
async fn test_reviewer_assignment_is_idempotent() {
    let router = test_router();
    let proposal_id = submit_proposal(&router).await;

    let (_, first) = assign_reviewers(&router, &proposal_id, &["dup@example.org"]).await;
    let (roster, second) = assign_reviewers(&router, &proposal_id, &["dup@example.org"]).await;

    assert_eq!(roster["assignments"].as_array().unwrap().len(), 1);
    assert_eq!(first[0].1, second[0].1, "same assignment id on re-add");
}

#[tokio::test]
async fn test_invalid_verdict_is_422() {
    let router = test_router();
    let proposal_id = submit_proposal(&router).await;
    let (_, reviewers) = assign_reviewers(&router, &proposal_id, &["r@example.org"]).await;

    let (status, body) = request(
        &router,
        Method::POST,
        &format!("/reviewer-marks/{proposal_id}/{}", reviewers[0].0),
        Some(json!({"verdict": "STRONG_ACCEPT"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "INVALID_VERDICT");
}

/// Scheduling a defense on a proposal that is merely submitted must fail
/// with the current status embedded in the error.
#[tokio::test]
async fn test_defense_on_unreviewed_proposal_conflicts() {
    let router = test_router();

    // Mint persons on a throwaway proposal so the roster ids resolve.
    let helper_id = submit_proposal(&router).await;
    let (_, people) = assign_reviewers(
        &router,
        &helper_id,
        &["chair@example.org", "secretary@example.org"],
    )
    .await;

    let proposal_id = submit_proposal(&router).await;
    let (status, body) = request(
        &router,
        Method::POST,
        &format!("/proposals/{proposal_id}/defenses"),
        Some(json!({
            "scheduledDate": (Utc::now() + Duration::days(30)).to_rfc3339(),
            "location": "Senate Boardroom",
            "chairpersonId": people[0].0,
            "minutesSecretaryId": people[1].0,
            "panelistIds": [people[0].0],
            "reviewerIds": [people[1].0],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INVALID_TRANSITION");
    assert_eq!(body["currentStatus"], "Submitted");
}

#[tokio::test]
async fn test_defense_verdict_recorded_once() {
    let router = test_router();
    let proposal_id = submit_proposal(&router).await;
    let (_, reviewers) = assign_reviewers(
        &router,
        &proposal_id,
        &["r1@example.org", "r2@example.org"],
    )
    .await;
    for (person_id, _) in &reviewers {
        let (status, _) = request(
            &router,
            Method::POST,
            &format!("/reviewer-marks/{proposal_id}/{person_id}"),
            Some(json!({"verdict": "PASS"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = request(
        &router,
        Method::POST,
        &format!("/proposals/{proposal_id}/defenses"),
        Some(json!({
            "scheduledDate": (Utc::now() + Duration::days(21)).to_rfc3339(),
            "location": "Block B, Room 12",
            "chairpersonId": reviewers[0].0,
            "minutesSecretaryId": reviewers[1].0,
            "panelistIds": [reviewers[0].0],
            "reviewerIds": [reviewers[1].0],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(status_name(&body["entity"]), "Defense Scheduled");
    let defense_id = body["defense"]["id"].as_str().unwrap().to_string();

    let (status, body) = request(
        &router,
        Method::PUT,
        &format!("/defenses/{defense_id}"),
        Some(json!({"verdict": "PASS", "comments": "Convincing defense"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(status_name(&body["entity"]), "Defended - Passed");
    assert_eq!(body["defense"]["verdict"], "PASS");

    let (status, body) = request(
        &router,
        Method::PUT,
        &format!("/defenses/{defense_id}"),
        Some(json!({"verdict": "FAIL"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "ALREADY_DECIDED");
}

/// Book flow boundary case: 55 and 65 mean exactly 60, which passes on the
/// inclusive threshold.
#[tokio::test]
async fn test_book_examination_flow() {
    let router = test_router();

    let (status, body) = request(
        &router,
        Method::POST,
        &format!("/books/{}", Uuid::new_v4()),
        Some(json!({"title": "Dissertation: learned spatial indexes"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(status_name(&body), "Book Submitted");
    let book_id = body["id"].as_str().unwrap().to_string();

    let (status, body) = request(
        &router,
        Method::POST,
        &format!("/books/{book_id}/examiners"),
        Some(json!({
            "examiners": [
                {"name": "Internal Examiner", "email": "internal@example.ac.ug"},
                {"name": "External Examiner", "email": "external@example.org"}
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(status_name(&body["entity"]), "Under Examination");
    let assignment_ids: Vec<String> = body["assignments"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(assignment_ids.len(), 2);

    let (status, body) = request(
        &router,
        Method::PUT,
        &format!("/internal-examiner-mark/{}", assignment_ids[0]),
        Some(json!({"mark": 55.0, "comments": "Adequate literature review"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(status_name(&body["entity"]), "Under Examination");

    let (status, body) = request(
        &router,
        Method::PUT,
        &format!("/internal-examiner-mark/{}", assignment_ids[1]),
        Some(json!({"mark": 65.0})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(status_name(&body["entity"]), "Examination - Passed");

    let (status, grading) = request(
        &router,
        Method::GET,
        &format!("/proposals/{book_id}/grading"),
        None,
    )
    .await;
    // The grading view is proposal-scoped; a book id must not resolve there.
    assert_eq!(status, StatusCode::NOT_FOUND);
    let _ = grading;
}

#[tokio::test]
async fn test_unassign_reviewer_drops_mark_and_roster_entry() {
    let router = test_router();
    let proposal_id = submit_proposal(&router).await;
    let (_, reviewers) = assign_reviewers(
        &router,
        &proposal_id,
        &["r1@example.org", "r2@example.org"],
    )
    .await;

    let (status, _) = request(
        &router,
        Method::POST,
        &format!("/reviewer-marks/{proposal_id}/{}", reviewers[0].0),
        Some(json!({"verdict": "PASS"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = request(
        &router,
        Method::DELETE,
        &format!("/reviewers/{proposal_id}/{}", reviewers[0].0),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let roster = body["assignments"].as_array().unwrap();
    assert_eq!(roster.len(), 1);
    // Still under review: removal does not complete the round.
    assert_eq!(status_name(&body["entity"]), "Under Review");
}
