//! Repository abstraction for workflow persistence.
//!
//! The `Repository` trait hides the storage backend from the engine. Two
//! implementations exist: an in-memory store (tests, ephemeral deployments)
//! and a SQLite store (durable). Both seed the same immutable status
//! definitions so every workflow stage resolves to exactly one definition.
//!
//! The one operation with atomicity requirements is `append_status`: closing
//! the previous current record and inserting the new one must be indivisible
//! with respect to concurrent callers on the same entity, or the "at most
//! one current status" invariant breaks.

mod memory;
mod sqlite;

pub use memory::InMemoryRepository;
pub use sqlite::SqliteRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{
    Assignment, AssignmentId, Defense, DefenseId, EntityId, GraderRole, Mark, Person, PersonId,
    StatusDefinition, StatusDefinitionId, StatusRecord, Student, StudentId, TrackableEntity,
};
use crate::workflow::state::Stage;

/// Errors surfaced by repository implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),

    #[error("unknown status definition {0}")]
    UnknownStatus(StatusDefinitionId),

    #[error("storage error during {operation}: {message}")]
    Storage {
        operation: &'static str,
        message: String,
    },
}

impl StoreError {
    pub fn storage(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Storage {
            operation,
            message: message.into(),
        }
    }
}

/// A status record joined with its definition, as the API serves it.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusEntry {
    pub record: StatusRecord,
    pub definition: StatusDefinition,
}

impl StatusEntry {
    pub fn stage(&self) -> Stage {
        self.definition.stage
    }
}

/// Storage backend for the workflow engine.
#[async_trait]
pub trait Repository: Send + Sync {
    // =========================================================================
    // Reference data
    // =========================================================================

    /// Resolve the seeded definition for a stage. Every stage has exactly one.
    async fn definition_for_stage(&self, stage: Stage) -> Result<StatusDefinition, StoreError>;

    // =========================================================================
    // Students
    // =========================================================================

    async fn upsert_student(&self, student: Student) -> Result<(), StoreError>;
    async fn get_student(&self, id: StudentId) -> Result<Option<Student>, StoreError>;

    // =========================================================================
    // Persons
    // =========================================================================

    async fn insert_person(&self, person: Person) -> Result<(), StoreError>;
    /// Replace a person record (used for role grants).
    async fn update_person(&self, person: Person) -> Result<(), StoreError>;
    async fn get_person(&self, id: PersonId) -> Result<Option<Person>, StoreError>;
    async fn person_by_email(&self, email: &str) -> Result<Option<Person>, StoreError>;

    // =========================================================================
    // Trackable entities
    // =========================================================================

    async fn insert_entity(&self, entity: TrackableEntity) -> Result<(), StoreError>;
    async fn get_entity(&self, id: EntityId) -> Result<Option<TrackableEntity>, StoreError>;
    async fn set_defense_date(
        &self,
        id: EntityId,
        date: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    // =========================================================================
    // Status ledger
    // =========================================================================

    /// Append a status record, superseding the current one if present.
    ///
    /// Atomically: the existing current record (if any) gets `end_date = at`
    /// and `is_current = false`; the new record is inserted with
    /// `start_date = at` and `is_current = true`.
    ///
    /// Fails with `UnknownEntity` / `UnknownStatus` when either reference is
    /// absent.
    async fn append_status(
        &self,
        entity_id: EntityId,
        definition_id: StatusDefinitionId,
        at: DateTime<Utc>,
    ) -> Result<StatusRecord, StoreError>;

    /// The single current status entry, or `None` for a never-submitted
    /// entity.
    async fn current_status(&self, entity_id: EntityId)
        -> Result<Option<StatusEntry>, StoreError>;

    /// Full history in insertion (chronological) order.
    async fn status_history(&self, entity_id: EntityId) -> Result<Vec<StatusEntry>, StoreError>;

    // =========================================================================
    // Assignments
    // =========================================================================

    async fn insert_assignment(&self, assignment: Assignment) -> Result<(), StoreError>;
    async fn get_assignment(&self, id: AssignmentId) -> Result<Option<Assignment>, StoreError>;
    /// Locate an assignment by its natural key (entity, role, person).
    async fn find_assignment(
        &self,
        entity_id: EntityId,
        role: GraderRole,
        person_id: PersonId,
    ) -> Result<Option<Assignment>, StoreError>;
    /// Assignments for an entity in creation order, optionally filtered by
    /// role.
    async fn list_assignments(
        &self,
        entity_id: EntityId,
        role: Option<GraderRole>,
    ) -> Result<Vec<Assignment>, StoreError>;
    /// Hard-delete an assignment and cascade its mark. Returns the deleted
    /// assignment, or `None` if it did not exist for that entity.
    async fn delete_assignment(
        &self,
        entity_id: EntityId,
        assignment_id: AssignmentId,
    ) -> Result<Option<Assignment>, StoreError>;

    // =========================================================================
    // Marks
    // =========================================================================

    /// Insert or replace the mark for (entity, assignment).
    async fn upsert_mark(&self, mark: Mark) -> Result<(), StoreError>;
    async fn get_mark(
        &self,
        entity_id: EntityId,
        assignment_id: AssignmentId,
    ) -> Result<Option<Mark>, StoreError>;
    async fn list_marks(&self, entity_id: EntityId) -> Result<Vec<Mark>, StoreError>;

    // =========================================================================
    // Defenses
    // =========================================================================

    /// Insert or replace the defense record (one per entity).
    async fn upsert_defense(&self, defense: Defense) -> Result<(), StoreError>;
    async fn get_defense(&self, id: DefenseId) -> Result<Option<Defense>, StoreError>;
    async fn defense_for_entity(
        &self,
        entity_id: EntityId,
    ) -> Result<Option<Defense>, StoreError>;
}

/// The immutable status definition seed.
///
/// Display names and colors follow the faculty-facing UI; expected durations
/// feed the SLA hint next to the current status.
pub(crate) fn seed_definitions() -> Vec<StatusDefinition> {
    fn def(
        stage: Stage,
        name: &str,
        color: &str,
        expected_duration_days: Option<u32>,
    ) -> StatusDefinition {
        StatusDefinition {
            id: StatusDefinitionId::new(),
            stage,
            name: name.to_string(),
            color: color.to_string(),
            expected_duration_days,
        }
    }

    vec![
        def(Stage::Submitted, "Submitted", "#3b82f6", Some(14)),
        def(Stage::UnderReview, "Under Review", "#f59e0b", Some(60)),
        def(Stage::GradedPassed, "Graded - Passed", "#22c55e", None),
        def(Stage::GradedFailed, "Graded - Failed", "#ef4444", None),
        def(
            Stage::DefenseScheduled,
            "Defense Scheduled",
            "#8b5cf6",
            Some(30),
        ),
        def(Stage::DefendedPassed, "Defended - Passed", "#16a34a", None),
        def(Stage::DefendedFailed, "Defended - Failed", "#dc2626", None),
        def(Stage::BookSubmitted, "Book Submitted", "#3b82f6", Some(14)),
        def(
            Stage::UnderExamination,
            "Under Examination",
            "#f59e0b",
            Some(90),
        ),
        def(
            Stage::ExaminationPassed,
            "Examination - Passed",
            "#16a34a",
            None,
        ),
        def(
            Stage::ExaminationFailed,
            "Examination - Failed",
            "#dc2626",
            None,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_covers_every_stage_exactly_once() {
        let defs = seed_definitions();
        for stage in Stage::all() {
            assert_eq!(
                defs.iter().filter(|d| d.stage == stage).count(),
                1,
                "stage {stage} must have exactly one seeded definition"
            );
        }
        assert_eq!(defs.len(), Stage::all().len());
    }
}
