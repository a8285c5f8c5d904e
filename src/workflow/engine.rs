//! The workflow orchestrator.
//!
//! `WorkflowEngine` receives the operations the REST layer exposes (submit,
//! assign, grade, schedule, record-verdict) and coordinates the status
//! ledger, assignment registry, grading aggregation, and defense scheduling
//! against the repository.
//!
//! # Locking discipline
//!
//! Every status-affecting operation takes a per-entity async mutex before
//! re-reading the current status, validating the transition guard, and
//! writing the superseding record. This is what stops two concurrent mark
//! submissions from both observing "not yet complete" and each appending a
//! completion transition. Plain reads do not take the lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

use super::effect::{execute_effects, Effect, Notification, NotificationSink};
use super::event::WorkflowEvent;
use super::state::Stage;
use super::transition::transition;
use crate::domain::{
    Assignment, AssignmentId, Defense, DefenseId, EntityId, EntityKind, GraderRole, Mark,
    MarkValue, Person, PersonId, Role, Student, StudentId, TrackableEntity,
};
use crate::grading::{
    aggregate_grades, aggregate_verdicts, grade_in_range, NumericOutcome, ReviewOutcome, Verdict,
};
use crate::store::{Repository, StatusEntry, StoreError};

/// Errors surfaced by workflow operations.
///
/// `InvalidTransition` carries the entity's current status name so the API
/// can explain the conflict to the caller without a second round trip.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{resource} {id} not found")]
    NotFound { resource: &'static str, id: String },

    #[error("invalid transition: {event} is not allowed from status {current:?}")]
    InvalidTransition {
        event: String,
        /// Display name of the current status, `None` if never submitted.
        current: Option<String>,
    },

    #[error("invalid verdict '{value}'")]
    InvalidVerdict { value: String },

    #[error("invalid grade {value}: must be between 0 and 100")]
    InvalidGrade { value: f64 },

    #[error("defense {0} already has a recorded verdict")]
    AlreadyDecided(DefenseId),

    #[error("defense requires at least one {role}")]
    EmptyRoster { role: &'static str },

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WorkflowError {
    fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }
}

/// An entity together with its current status, as every mutating operation
/// returns it.
#[derive(Debug, Clone)]
pub struct EntityState {
    pub entity: TrackableEntity,
    pub current: Option<StatusEntry>,
}

/// An assignment joined with its person and recorded mark, for listings and
/// the grading summary.
#[derive(Debug, Clone)]
pub struct GraderMark {
    pub assignment: Assignment,
    pub person: Person,
    pub mark: Option<Mark>,
}

/// Marks and aggregates for one entity.
#[derive(Debug, Clone)]
pub struct GradingSummary {
    pub reviewers: Vec<GraderMark>,
    pub panelists: Vec<GraderMark>,
    pub examiners: Vec<GraderMark>,
    /// Aggregate reviewer outcome, present only once every reviewer has
    /// submitted.
    pub reviewer_outcome: Option<ReviewOutcome>,
    /// Mean over the panelist grades recorded so far (partial means allowed;
    /// panelist marks never gate a transition).
    pub panelist_mean: Option<f64>,
    /// Aggregate examiner outcome, present only once every examiner has
    /// submitted.
    pub examiner_outcome: Option<NumericOutcome>,
}

/// Fields for a proposal submission.
#[derive(Debug, Clone)]
pub struct ProposalSubmission {
    pub title: String,
    pub description: Option<String>,
    pub research_area: Option<String>,
    pub submission_date: Option<DateTime<Utc>>,
    /// Used when the student is not yet registered; student management
    /// proper lives outside this service.
    pub student_name: Option<String>,
}

/// Fields for a book submission.
#[derive(Debug, Clone)]
pub struct BookSubmission {
    pub title: String,
    pub submission_date: Option<DateTime<Utc>>,
    pub student_name: Option<String>,
}

/// A person reference in an assignment request: either an existing person id
/// or enough identity (email, optionally name/institution) to find-or-create
/// one.
#[derive(Debug, Clone, Default)]
pub struct PersonInput {
    pub id: Option<PersonId>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub institution: Option<String>,
}

/// Fields for scheduling (or re-scheduling) a defense.
#[derive(Debug, Clone)]
pub struct DefenseRequest {
    pub scheduled_date: DateTime<Utc>,
    pub location: String,
    pub chairperson_id: PersonId,
    pub minutes_secretary_id: PersonId,
    pub panelist_ids: Vec<PersonId>,
    pub reviewer_ids: Vec<PersonId>,
}

/// Fields for recording a mark.
#[derive(Debug, Clone)]
pub struct MarkSubmission {
    pub feedback: Option<String>,
    pub submitted_by: Option<String>,
}

pub struct WorkflowEngine {
    repo: Arc<dyn Repository>,
    sink: Arc<dyn NotificationSink>,
    pass_mark: f64,
    locks: Mutex<HashMap<EntityId, Arc<tokio::sync::Mutex<()>>>>,
}

impl WorkflowEngine {
    pub fn new(
        repo: Arc<dyn Repository>,
        sink: Arc<dyn NotificationSink>,
        pass_mark: f64,
    ) -> Self {
        Self {
            repo,
            sink,
            pass_mark,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Serialize status-affecting work per entity.
    async fn lock_entity(&self, id: EntityId) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().expect("mutex poisoned");
            locks
                .entry(id)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Fetch an entity, optionally requiring a kind. The `resource` name is
    /// what a kind mismatch or absence reports ("proposal" rather than a
    /// generic "entity").
    async fn require_entity(
        &self,
        id: EntityId,
        kind: Option<EntityKind>,
        resource: &'static str,
    ) -> Result<TrackableEntity, WorkflowError> {
        let entity = self
            .repo
            .get_entity(id)
            .await?
            .ok_or_else(|| WorkflowError::not_found(resource, id))?;
        if let Some(kind) = kind {
            if entity.kind != kind {
                return Err(WorkflowError::not_found(resource, id));
            }
        }
        Ok(entity)
    }

    /// Run the transition function for `event`, append the resulting status
    /// record, and execute the effects. Must be called with the entity lock
    /// held.
    async fn apply_event(
        &self,
        entity: &TrackableEntity,
        current: Option<&StatusEntry>,
        event: WorkflowEvent,
        at: DateTime<Utc>,
    ) -> Result<StatusEntry, WorkflowError> {
        let summary = event.log_summary();
        let result = transition(entity.id, entity.kind, current.map(StatusEntry::stage), event)
            .map_err(|e| WorkflowError::InvalidTransition {
                event: e.event,
                current: current.map(|c| c.definition.name.clone()),
            })?;

        let definition = self.repo.definition_for_stage(result.stage).await?;
        let record = self
            .repo
            .append_status(entity.id, definition.id, at)
            .await?;

        info!(
            entity = %entity.id,
            event = %summary,
            stage = %result.stage,
            "workflow transition applied"
        );
        execute_effects(self.sink.as_ref(), result.effects).await;

        Ok(StatusEntry { record, definition })
    }

    async fn state_of(&self, entity: TrackableEntity) -> Result<EntityState, WorkflowError> {
        let current = self.repo.current_status(entity.id).await?;
        Ok(EntityState { entity, current })
    }

    /// Find or create the person referenced by `input` and make sure it
    /// carries `role`. Granting a role never duplicates identity: lookups go
    /// by id first, then by email.
    async fn resolve_person(
        &self,
        input: &PersonInput,
        role: Role,
    ) -> Result<Person, WorkflowError> {
        if let Some(id) = input.id {
            let mut person = self
                .repo
                .get_person(id)
                .await?
                .ok_or_else(|| WorkflowError::not_found("person", id))?;
            if person.grant_role(role) {
                self.repo.update_person(person.clone()).await?;
            }
            return Ok(person);
        }

        let email = input
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| {
                WorkflowError::Validation("person reference needs an id or an email".to_string())
            })?;

        if let Some(mut person) = self.repo.person_by_email(email).await? {
            if person.grant_role(role) {
                self.repo.update_person(person.clone()).await?;
            }
            return Ok(person);
        }

        let name = input
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(email);
        let mut person = Person::new(name, email);
        person.institution = input.institution.clone();
        person.grant_role(role);
        self.repo.insert_person(person.clone()).await?;
        Ok(person)
    }

    async fn ensure_student(
        &self,
        id: StudentId,
        name: Option<&str>,
    ) -> Result<Student, WorkflowError> {
        if let Some(student) = self.repo.get_student(id).await? {
            return Ok(student);
        }
        let student = Student {
            id,
            name: name.unwrap_or("(unregistered student)").to_string(),
            registration_no: None,
        };
        self.repo.upsert_student(student.clone()).await?;
        Ok(student)
    }

    // =========================================================================
    // Submission
    // =========================================================================

    pub async fn submit_proposal(
        &self,
        student_id: StudentId,
        submission: ProposalSubmission,
    ) -> Result<EntityState, WorkflowError> {
        if submission.title.trim().is_empty() {
            return Err(WorkflowError::Validation("title must not be empty".to_string()));
        }
        self.ensure_student(student_id, submission.student_name.as_deref())
            .await?;

        let now = Utc::now();
        let entity = TrackableEntity {
            id: EntityId::new(),
            kind: EntityKind::Proposal,
            student_id,
            title: submission.title,
            description: submission.description,
            research_area: submission.research_area,
            submission_date: submission.submission_date.unwrap_or(now),
            defense_date: None,
        };
        self.repo.insert_entity(entity.clone()).await?;

        let _guard = self.lock_entity(entity.id).await;
        let entry = self
            .apply_event(&entity, None, WorkflowEvent::ProposalSubmitted, now)
            .await?;
        Ok(EntityState {
            entity,
            current: Some(entry),
        })
    }

    pub async fn submit_book(
        &self,
        student_id: StudentId,
        submission: BookSubmission,
    ) -> Result<EntityState, WorkflowError> {
        if submission.title.trim().is_empty() {
            return Err(WorkflowError::Validation("title must not be empty".to_string()));
        }
        self.ensure_student(student_id, submission.student_name.as_deref())
            .await?;

        let now = Utc::now();
        let entity = TrackableEntity {
            id: EntityId::new(),
            kind: EntityKind::Book,
            student_id,
            title: submission.title,
            description: None,
            research_area: None,
            submission_date: submission.submission_date.unwrap_or(now),
            defense_date: None,
        };
        self.repo.insert_entity(entity.clone()).await?;

        let _guard = self.lock_entity(entity.id).await;
        let entry = self
            .apply_event(&entity, None, WorkflowEvent::BookSubmitted, now)
            .await?;
        Ok(EntityState {
            entity,
            current: Some(entry),
        })
    }

    // =========================================================================
    // Assignment registry
    // =========================================================================

    /// Assign graders to an entity. Idempotent by (entity, role, email):
    /// re-assigning a person resolves to the existing assignment instead of
    /// erroring. Assigning the first grader to a freshly submitted entity
    /// fires the review/examination transition.
    pub async fn assign_graders(
        &self,
        entity_id: EntityId,
        role: GraderRole,
        people: Vec<PersonInput>,
        assigned_at: Option<DateTime<Utc>>,
    ) -> Result<(Vec<Assignment>, EntityState), WorkflowError> {
        if people.is_empty() {
            return Err(WorkflowError::Validation(
                "at least one person is required".to_string(),
            ));
        }

        let (kind, resource) = entity_kind_for_role(role);
        let _guard = self.lock_entity(entity_id).await;
        let entity = self.require_entity(entity_id, Some(kind), resource).await?;
        let current = self.repo.current_status(entity_id).await?;

        if let Some(entry) = &current {
            if entry.stage().is_terminal() {
                return Err(WorkflowError::InvalidTransition {
                    event: format!("FirstGraderAssigned {{ role: {role} }}"),
                    current: Some(entry.definition.name.clone()),
                });
            }
        }

        let at = assigned_at.unwrap_or_else(Utc::now);
        let mut assignments = Vec::with_capacity(people.len());
        let mut created_any = false;
        for input in &people {
            let person = self.resolve_person(input, role.into()).await?;
            if let Some(existing) = self
                .repo
                .find_assignment(entity_id, role, person.id)
                .await?
            {
                // Deliberately coalesced, never a DuplicatePerson error.
                assignments.push(existing);
                continue;
            }
            let assignment = Assignment {
                id: AssignmentId::new(),
                entity_id,
                role,
                person_id: person.id,
                assigned_at: at,
            };
            self.repo.insert_assignment(assignment.clone()).await?;
            assignments.push(assignment);
            created_any = true;
        }

        let pre_review = matches!(
            current.as_ref().map(StatusEntry::stage),
            Some(Stage::Submitted) | Some(Stage::BookSubmitted)
        );
        let current = if created_any && pre_review {
            Some(
                self.apply_event(
                    &entity,
                    current.as_ref(),
                    WorkflowEvent::FirstGraderAssigned { role },
                    at,
                )
                .await?,
            )
        } else {
            current
        };

        Ok((assignments, EntityState { entity, current }))
    }

    /// Remove a person's assignment under `role`. Hard delete; the cascade
    /// also removes any recorded mark, so grading must be re-entered against
    /// a re-assignment. No transition is evaluated here.
    pub async fn unassign_grader(
        &self,
        entity_id: EntityId,
        role: GraderRole,
        person_id: PersonId,
    ) -> Result<EntityState, WorkflowError> {
        let (kind, resource) = entity_kind_for_role(role);
        let _guard = self.lock_entity(entity_id).await;
        let entity = self.require_entity(entity_id, Some(kind), resource).await?;

        let assignment = self
            .repo
            .find_assignment(entity_id, role, person_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("assignment", person_id))?;
        self.repo
            .delete_assignment(entity_id, assignment.id)
            .await?;

        self.state_of(entity).await
    }

    /// Assignments for an entity under one role, joined with person and mark.
    pub async fn list_graders(
        &self,
        entity_id: EntityId,
        role: GraderRole,
    ) -> Result<Vec<GraderMark>, WorkflowError> {
        let (kind, resource) = entity_kind_for_role(role);
        let entity = self.require_entity(entity_id, Some(kind), resource).await?;
        self.grader_marks(entity.id, role).await
    }

    async fn grader_marks(
        &self,
        entity_id: EntityId,
        role: GraderRole,
    ) -> Result<Vec<GraderMark>, WorkflowError> {
        let assignments = self.repo.list_assignments(entity_id, Some(role)).await?;
        let mut out = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            let person = self
                .repo
                .get_person(assignment.person_id)
                .await?
                .ok_or_else(|| WorkflowError::not_found("person", assignment.person_id))?;
            let mark = self.repo.get_mark(entity_id, assignment.id).await?;
            out.push(GraderMark {
                assignment,
                person,
                mark,
            });
        }
        Ok(out)
    }

    // =========================================================================
    // Grading aggregator
    // =========================================================================

    /// Record a reviewer's verdict against a proposal. Recording twice
    /// updates the existing mark. When the last outstanding reviewer submits,
    /// the review round completes and the graded status is appended.
    pub async fn record_reviewer_verdict(
        &self,
        entity_id: EntityId,
        person_id: PersonId,
        verdict: &str,
        submission: MarkSubmission,
    ) -> Result<(Mark, EntityState), WorkflowError> {
        let verdict = Verdict::parse(verdict).ok_or_else(|| WorkflowError::InvalidVerdict {
            value: verdict.to_string(),
        })?;

        let _guard = self.lock_entity(entity_id).await;
        let entity = self
            .require_entity(entity_id, Some(EntityKind::Proposal), "proposal")
            .await?;
        let assignment = self
            .repo
            .find_assignment(entity_id, GraderRole::Reviewer, person_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("assignment", person_id))?;

        let mark = self
            .upsert_mark_value(&assignment, MarkValue::Verdict(verdict), submission)
            .await?;

        let current = self.maybe_complete_reviews(&entity).await?;
        Ok((mark, EntityState { entity, current }))
    }

    /// Record a panelist's numeric grade against a proposal. Panelist marks
    /// never trigger a transition; their mean is surfaced in the grading
    /// summary.
    pub async fn record_panelist_grade(
        &self,
        entity_id: EntityId,
        person_id: PersonId,
        grade: f64,
        submission: MarkSubmission,
    ) -> Result<(Mark, EntityState), WorkflowError> {
        if !grade_in_range(grade) {
            return Err(WorkflowError::InvalidGrade { value: grade });
        }

        let _guard = self.lock_entity(entity_id).await;
        let entity = self
            .require_entity(entity_id, Some(EntityKind::Proposal), "proposal")
            .await?;
        let assignment = self
            .repo
            .find_assignment(entity_id, GraderRole::Panelist, person_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("assignment", person_id))?;

        let mark = self
            .upsert_mark_value(&assignment, MarkValue::Grade(grade), submission)
            .await?;
        let state = self.state_of(entity).await?;
        Ok((mark, state))
    }

    /// Record an examiner's grade against a book, addressed by assignment id.
    /// When the last outstanding examiner submits, the examination round
    /// completes: mean against the pass mark, inclusive.
    pub async fn record_examiner_mark(
        &self,
        assignment_id: AssignmentId,
        grade: f64,
        submission: MarkSubmission,
    ) -> Result<(Mark, EntityState), WorkflowError> {
        if !grade_in_range(grade) {
            return Err(WorkflowError::InvalidGrade { value: grade });
        }

        let assignment = self
            .repo
            .get_assignment(assignment_id)
            .await?
            .filter(|a| a.role == GraderRole::Examiner)
            .ok_or_else(|| WorkflowError::not_found("assignment", assignment_id))?;

        let _guard = self.lock_entity(assignment.entity_id).await;
        let entity = self
            .require_entity(assignment.entity_id, Some(EntityKind::Book), "book")
            .await?;

        let mark = self
            .upsert_mark_value(&assignment, MarkValue::Grade(grade), submission)
            .await?;

        let current = self.maybe_complete_examination(&entity).await?;
        Ok((mark, EntityState { entity, current }))
    }

    /// Insert or update the mark for one assignment, preserving `created_at`
    /// across updates.
    async fn upsert_mark_value(
        &self,
        assignment: &Assignment,
        value: MarkValue,
        submission: MarkSubmission,
    ) -> Result<Mark, WorkflowError> {
        let now = Utc::now();
        let existing = self
            .repo
            .get_mark(assignment.entity_id, assignment.id)
            .await?;
        let mark = match existing {
            Some(existing) => Mark {
                value,
                feedback: submission.feedback,
                submitted_by: submission.submitted_by,
                updated_at: now,
                ..existing
            },
            None => Mark {
                entity_id: assignment.entity_id,
                assignment_id: assignment.id,
                value,
                feedback: submission.feedback,
                graded_by: assignment.person_id,
                submitted_by: submission.submitted_by,
                created_at: now,
                updated_at: now,
            },
        };
        self.repo.upsert_mark(mark.clone()).await?;
        Ok(mark)
    }

    /// Evaluate reviewer completion under the entity lock. Fires the graded
    /// transition only while the entity is under review; later mark updates
    /// leave the status alone.
    async fn maybe_complete_reviews(
        &self,
        entity: &TrackableEntity,
    ) -> Result<Option<StatusEntry>, WorkflowError> {
        let current = self.repo.current_status(entity.id).await?;
        if current.as_ref().map(StatusEntry::stage) != Some(Stage::UnderReview) {
            return Ok(current);
        }

        let reviewers = self
            .repo
            .list_assignments(entity.id, Some(GraderRole::Reviewer))
            .await?;
        let mut verdicts = Vec::with_capacity(reviewers.len());
        for assignment in &reviewers {
            match self.repo.get_mark(entity.id, assignment.id).await? {
                Some(Mark {
                    value: MarkValue::Verdict(v),
                    ..
                }) => verdicts.push(v),
                _ => return Ok(current), // partial completion: stable, no change
            }
        }

        let Some(outcome) = aggregate_verdicts(&verdicts) else {
            return Ok(current);
        };
        let entry = self
            .apply_event(
                entity,
                current.as_ref(),
                WorkflowEvent::ReviewRoundCompleted { outcome },
                Utc::now(),
            )
            .await?;
        Ok(Some(entry))
    }

    /// Evaluate examiner completion under the entity lock.
    async fn maybe_complete_examination(
        &self,
        entity: &TrackableEntity,
    ) -> Result<Option<StatusEntry>, WorkflowError> {
        let current = self.repo.current_status(entity.id).await?;
        if current.as_ref().map(StatusEntry::stage) != Some(Stage::UnderExamination) {
            return Ok(current);
        }

        let examiners = self
            .repo
            .list_assignments(entity.id, Some(GraderRole::Examiner))
            .await?;
        let mut grades = Vec::with_capacity(examiners.len());
        for assignment in &examiners {
            match self.repo.get_mark(entity.id, assignment.id).await? {
                Some(Mark {
                    value: MarkValue::Grade(g),
                    ..
                }) => grades.push(g),
                _ => return Ok(current),
            }
        }

        let Some(outcome) = aggregate_grades(&grades, self.pass_mark) else {
            return Ok(current);
        };
        let entry = self
            .apply_event(
                entity,
                current.as_ref(),
                WorkflowEvent::ExaminationRoundCompleted {
                    passed: outcome.passed,
                },
                Utc::now(),
            )
            .await?;
        Ok(Some(entry))
    }

    // =========================================================================
    // Defense scheduler
    // =========================================================================

    /// Schedule (or re-schedule) the defense for a proposal. One defense per
    /// proposal: a second call updates date, location, and roster in place
    /// until the verdict is recorded, after which re-scheduling fails.
    pub async fn schedule_defense(
        &self,
        entity_id: EntityId,
        request: DefenseRequest,
    ) -> Result<(Defense, EntityState), WorkflowError> {
        if request.panelist_ids.is_empty() {
            return Err(WorkflowError::EmptyRoster { role: "panelist" });
        }
        if request.reviewer_ids.is_empty() {
            return Err(WorkflowError::EmptyRoster { role: "reviewer" });
        }
        if request.location.trim().is_empty() {
            return Err(WorkflowError::Validation(
                "location must not be empty".to_string(),
            ));
        }

        let _guard = self.lock_entity(entity_id).await;
        let entity = self
            .require_entity(entity_id, Some(EntityKind::Proposal), "proposal")
            .await?;

        // Validate the officiating pair before any write.
        let chairperson = self
            .repo
            .get_person(request.chairperson_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("person", request.chairperson_id))?;
        let secretary = self
            .repo
            .get_person(request.minutes_secretary_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("person", request.minutes_secretary_id))?;

        let existing = self.repo.defense_for_entity(entity_id).await?;
        if let Some(existing) = &existing {
            if existing.is_decided() {
                return Err(WorkflowError::AlreadyDecided(existing.id));
            }
        }

        // A past-dated defense is accepted but flagged.
        let scheduled_in_past = request.scheduled_date < entity.submission_date;
        if scheduled_in_past {
            warn!(
                entity = %entity_id,
                scheduled = %request.scheduled_date,
                submitted = %entity.submission_date,
                "defense scheduled before the submission date"
            );
        }

        let current = self.repo.current_status(entity_id).await?;
        let current = if existing.is_none() {
            Some(
                self.apply_event(
                    &entity,
                    current.as_ref(),
                    WorkflowEvent::DefenseScheduled,
                    Utc::now(),
                )
                .await?,
            )
        } else {
            current
        };

        for (mut person, role) in [
            (chairperson, Role::Chairperson),
            (secretary, Role::MinutesSecretary),
        ] {
            if person.grant_role(role) {
                self.repo.update_person(person).await?;
            }
        }

        let defense = Defense {
            id: existing.as_ref().map(|d| d.id).unwrap_or_default(),
            entity_id,
            scheduled_date: request.scheduled_date,
            location: request.location,
            chairperson_id: request.chairperson_id,
            minutes_secretary_id: request.minutes_secretary_id,
            panelist_ids: request.panelist_ids,
            reviewer_ids: request.reviewer_ids,
            scheduled_in_past,
            verdict: None,
            comments: None,
        };
        self.repo.upsert_defense(defense.clone()).await?;
        self.repo
            .set_defense_date(entity_id, defense.scheduled_date)
            .await?;

        execute_effects(
            self.sink.as_ref(),
            vec![Effect::Notify(Notification::DefenseScheduled {
                entity_id,
                scheduled_date: defense.scheduled_date,
            })],
        )
        .await;

        let mut entity = entity;
        entity.defense_date = Some(defense.scheduled_date);
        Ok((defense, EntityState { entity, current }))
    }

    /// Record the verdict of a convened defense. Decided exactly once.
    pub async fn record_defense_verdict(
        &self,
        defense_id: DefenseId,
        verdict: &str,
        comments: Option<String>,
    ) -> Result<(Defense, EntityState), WorkflowError> {
        let verdict = Verdict::parse(verdict).ok_or_else(|| WorkflowError::InvalidVerdict {
            value: verdict.to_string(),
        })?;

        let defense = self
            .repo
            .get_defense(defense_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("defense", defense_id))?;

        let _guard = self.lock_entity(defense.entity_id).await;
        // Re-read under the lock: a concurrent call may have decided it.
        let defense = self
            .repo
            .get_defense(defense_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("defense", defense_id))?;
        if defense.is_decided() {
            return Err(WorkflowError::AlreadyDecided(defense_id));
        }

        let entity = self
            .require_entity(defense.entity_id, Some(EntityKind::Proposal), "proposal")
            .await?;
        let current = self.repo.current_status(entity.id).await?;
        let entry = self
            .apply_event(
                &entity,
                current.as_ref(),
                WorkflowEvent::DefenseVerdictRecorded { verdict },
                Utc::now(),
            )
            .await?;

        let defense = Defense {
            verdict: Some(verdict),
            comments,
            ..defense
        };
        self.repo.upsert_defense(defense.clone()).await?;

        Ok((
            defense,
            EntityState {
                entity,
                current: Some(entry),
            },
        ))
    }

    // =========================================================================
    // Read side
    // =========================================================================

    pub async fn proposal_state(&self, id: EntityId) -> Result<EntityState, WorkflowError> {
        let entity = self
            .require_entity(id, Some(EntityKind::Proposal), "proposal")
            .await?;
        self.state_of(entity).await
    }

    pub async fn book_state(&self, id: EntityId) -> Result<EntityState, WorkflowError> {
        let entity = self
            .require_entity(id, Some(EntityKind::Book), "book")
            .await?;
        self.state_of(entity).await
    }

    pub async fn status_history(
        &self,
        id: EntityId,
    ) -> Result<Vec<StatusEntry>, WorkflowError> {
        self.require_entity(id, None, "entity").await?;
        Ok(self.repo.status_history(id).await?)
    }

    /// Marks and aggregates for an entity. Aggregates only appear once the
    /// corresponding role is fully graded (except the panelist mean, which is
    /// informational and allows partial data).
    pub async fn grading_summary(
        &self,
        entity_id: EntityId,
    ) -> Result<GradingSummary, WorkflowError> {
        self.require_entity(entity_id, None, "entity").await?;

        let reviewers = self.grader_marks(entity_id, GraderRole::Reviewer).await?;
        let panelists = self.grader_marks(entity_id, GraderRole::Panelist).await?;
        let examiners = self.grader_marks(entity_id, GraderRole::Examiner).await?;

        let reviewer_verdicts: Vec<Verdict> = reviewers
            .iter()
            .filter_map(|g| match &g.mark {
                Some(Mark {
                    value: MarkValue::Verdict(v),
                    ..
                }) => Some(*v),
                _ => None,
            })
            .collect();
        let reviewer_outcome = if !reviewers.is_empty() && reviewer_verdicts.len() == reviewers.len()
        {
            aggregate_verdicts(&reviewer_verdicts)
        } else {
            None
        };

        let panelist_grades: Vec<f64> = panelists
            .iter()
            .filter_map(|g| match &g.mark {
                Some(Mark {
                    value: MarkValue::Grade(grade),
                    ..
                }) => Some(*grade),
                _ => None,
            })
            .collect();
        let panelist_mean =
            aggregate_grades(&panelist_grades, self.pass_mark).map(|outcome| outcome.mean);

        let examiner_grades: Vec<f64> = examiners
            .iter()
            .filter_map(|g| match &g.mark {
                Some(Mark {
                    value: MarkValue::Grade(grade),
                    ..
                }) => Some(*grade),
                _ => None,
            })
            .collect();
        let examiner_outcome = if !examiners.is_empty() && examiner_grades.len() == examiners.len()
        {
            aggregate_grades(&examiner_grades, self.pass_mark)
        } else {
            None
        };

        Ok(GradingSummary {
            reviewers,
            panelists,
            examiners,
            reviewer_outcome,
            panelist_mean,
            examiner_outcome,
        })
    }

    pub async fn defense_for_proposal(
        &self,
        entity_id: EntityId,
    ) -> Result<Option<Defense>, WorkflowError> {
        self.require_entity(entity_id, Some(EntityKind::Proposal), "proposal")
            .await?;
        Ok(self.repo.defense_for_entity(entity_id).await?)
    }
}

/// Which entity kind a grader role belongs to, and the resource name used in
/// error messages.
fn entity_kind_for_role(role: GraderRole) -> (EntityKind, &'static str) {
    match role {
        GraderRole::Reviewer | GraderRole::Panelist => (EntityKind::Proposal, "proposal"),
        GraderRole::Examiner => (EntityKind::Book, "book"),
    }
}
