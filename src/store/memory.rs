//! In-memory implementation of `Repository`.
//!
//! All collections live behind a single `RwLock`, so `append_status` runs as
//! one write-lock section and the supersede-then-insert pair is atomic. State
//! is lost on restart; use the SQLite backend for durability.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{seed_definitions, Repository, StatusEntry, StoreError};
use crate::domain::{
    Assignment, AssignmentId, Defense, DefenseId, EntityId, GraderRole, Mark, Person, PersonId,
    StatusDefinition, StatusDefinitionId, StatusRecord, StatusRecordId, Student, StudentId,
    TrackableEntity,
};
use crate::workflow::state::Stage;

#[derive(Default)]
struct Inner {
    students: HashMap<StudentId, Student>,
    persons: HashMap<PersonId, Person>,
    entities: HashMap<EntityId, TrackableEntity>,
    definitions: Vec<StatusDefinition>,
    /// Insertion order is chronological order for each entity.
    statuses: Vec<StatusRecord>,
    /// Creation order preserved.
    assignments: Vec<Assignment>,
    marks: HashMap<(EntityId, AssignmentId), Mark>,
    defenses: HashMap<DefenseId, Defense>,
}

pub struct InMemoryRepository {
    inner: RwLock<Inner>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        let inner = Inner {
            definitions: seed_definitions(),
            ..Inner::default()
        };
        Self {
            inner: RwLock::new(inner),
        }
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn definition_by_id(&self, id: StatusDefinitionId) -> Option<&StatusDefinition> {
        self.definitions.iter().find(|d| d.id == id)
    }

    fn entry(&self, record: &StatusRecord) -> Option<StatusEntry> {
        self.definition_by_id(record.definition_id)
            .map(|definition| StatusEntry {
                record: record.clone(),
                definition: definition.clone(),
            })
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn definition_for_stage(&self, stage: Stage) -> Result<StatusDefinition, StoreError> {
        let inner = self.inner.read().await;
        inner
            .definitions
            .iter()
            .find(|d| d.stage == stage)
            .cloned()
            .ok_or_else(|| StoreError::storage("definition_for_stage", format!("stage {stage}")))
    }

    async fn upsert_student(&self, student: Student) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.students.insert(student.id, student);
        Ok(())
    }

    async fn get_student(&self, id: StudentId) -> Result<Option<Student>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.students.get(&id).cloned())
    }

    async fn insert_person(&self, person: Person) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.persons.insert(person.id, person);
        Ok(())
    }

    async fn update_person(&self, person: Person) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.persons.insert(person.id, person);
        Ok(())
    }

    async fn get_person(&self, id: PersonId) -> Result<Option<Person>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.persons.get(&id).cloned())
    }

    async fn person_by_email(&self, email: &str) -> Result<Option<Person>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .persons
            .values()
            .find(|p| p.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn insert_entity(&self, entity: TrackableEntity) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.entities.insert(entity.id, entity);
        Ok(())
    }

    async fn get_entity(&self, id: EntityId) -> Result<Option<TrackableEntity>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.entities.get(&id).cloned())
    }

    async fn set_defense_date(
        &self,
        id: EntityId,
        date: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let entity = inner
            .entities
            .get_mut(&id)
            .ok_or(StoreError::UnknownEntity(id))?;
        entity.defense_date = Some(date);
        Ok(())
    }

    async fn append_status(
        &self,
        entity_id: EntityId,
        definition_id: StatusDefinitionId,
        at: DateTime<Utc>,
    ) -> Result<StatusRecord, StoreError> {
        let mut inner = self.inner.write().await;

        if !inner.entities.contains_key(&entity_id) {
            return Err(StoreError::UnknownEntity(entity_id));
        }
        if inner.definition_by_id(definition_id).is_none() {
            return Err(StoreError::UnknownStatus(definition_id));
        }

        // Close the previous current record under the same write lock that
        // inserts the successor.
        for record in inner
            .statuses
            .iter_mut()
            .filter(|r| r.entity_id == entity_id && r.is_current)
        {
            record.is_current = false;
            record.end_date = Some(at);
        }

        let record = StatusRecord {
            id: StatusRecordId::new(),
            entity_id,
            definition_id,
            start_date: at,
            end_date: None,
            is_current: true,
        };
        inner.statuses.push(record.clone());
        Ok(record)
    }

    async fn current_status(
        &self,
        entity_id: EntityId,
    ) -> Result<Option<StatusEntry>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .statuses
            .iter()
            .find(|r| r.entity_id == entity_id && r.is_current)
            .and_then(|r| inner.entry(r)))
    }

    async fn status_history(&self, entity_id: EntityId) -> Result<Vec<StatusEntry>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .statuses
            .iter()
            .filter(|r| r.entity_id == entity_id)
            .filter_map(|r| inner.entry(r))
            .collect())
    }

    async fn insert_assignment(&self, assignment: Assignment) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.assignments.push(assignment);
        Ok(())
    }

    async fn get_assignment(&self, id: AssignmentId) -> Result<Option<Assignment>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.assignments.iter().find(|a| a.id == id).cloned())
    }

    async fn find_assignment(
        &self,
        entity_id: EntityId,
        role: GraderRole,
        person_id: PersonId,
    ) -> Result<Option<Assignment>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .assignments
            .iter()
            .find(|a| a.entity_id == entity_id && a.role == role && a.person_id == person_id)
            .cloned())
    }

    async fn list_assignments(
        &self,
        entity_id: EntityId,
        role: Option<GraderRole>,
    ) -> Result<Vec<Assignment>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .assignments
            .iter()
            .filter(|a| a.entity_id == entity_id && role.is_none_or(|r| a.role == r))
            .cloned()
            .collect())
    }

    async fn delete_assignment(
        &self,
        entity_id: EntityId,
        assignment_id: AssignmentId,
    ) -> Result<Option<Assignment>, StoreError> {
        let mut inner = self.inner.write().await;
        let position = inner
            .assignments
            .iter()
            .position(|a| a.id == assignment_id && a.entity_id == entity_id);

        match position {
            Some(idx) => {
                let removed = inner.assignments.remove(idx);
                // Cascade: grading must be re-entered against a re-assignment.
                inner.marks.remove(&(entity_id, assignment_id));
                Ok(Some(removed))
            }
            None => Ok(None),
        }
    }

    async fn upsert_mark(&self, mark: Mark) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner
            .marks
            .insert((mark.entity_id, mark.assignment_id), mark);
        Ok(())
    }

    async fn get_mark(
        &self,
        entity_id: EntityId,
        assignment_id: AssignmentId,
    ) -> Result<Option<Mark>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.marks.get(&(entity_id, assignment_id)).cloned())
    }

    async fn list_marks(&self, entity_id: EntityId) -> Result<Vec<Mark>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .marks
            .values()
            .filter(|m| m.entity_id == entity_id)
            .cloned()
            .collect())
    }

    async fn upsert_defense(&self, defense: Defense) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.defenses.insert(defense.id, defense);
        Ok(())
    }

    async fn get_defense(&self, id: DefenseId) -> Result<Option<Defense>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.defenses.get(&id).cloned())
    }

    async fn defense_for_entity(
        &self,
        entity_id: EntityId,
    ) -> Result<Option<Defense>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .defenses
            .values()
            .find(|d| d.entity_id == entity_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EntityKind;
    use proptest::prelude::*;

    fn test_entity(id: EntityId) -> TrackableEntity {
        TrackableEntity {
            id,
            kind: EntityKind::Proposal,
            student_id: StudentId::new(),
            title: "Adaptive irrigation scheduling".to_string(),
            description: None,
            research_area: None,
            submission_date: Utc::now(),
            defense_date: None,
        }
    }

    #[tokio::test]
    async fn test_append_status_unknown_entity() {
        let repo = InMemoryRepository::new();
        let def = repo.definition_for_stage(Stage::Submitted).await.unwrap();

        let err = repo
            .append_status(EntityId::new(), def.id, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownEntity(_)));
    }

    #[tokio::test]
    async fn test_append_status_unknown_definition() {
        let repo = InMemoryRepository::new();
        let entity_id = EntityId::new();
        repo.insert_entity(test_entity(entity_id)).await.unwrap();

        let err = repo
            .append_status(entity_id, StatusDefinitionId::new(), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownStatus(_)));
    }

    #[tokio::test]
    async fn test_append_status_supersedes_previous() {
        let repo = InMemoryRepository::new();
        let entity_id = EntityId::new();
        repo.insert_entity(test_entity(entity_id)).await.unwrap();

        let submitted = repo.definition_for_stage(Stage::Submitted).await.unwrap();
        let under_review = repo.definition_for_stage(Stage::UnderReview).await.unwrap();

        let t1 = Utc::now();
        let first = repo.append_status(entity_id, submitted.id, t1).await.unwrap();
        assert!(first.is_current);

        let t2 = t1 + chrono::Duration::days(3);
        let second = repo
            .append_status(entity_id, under_review.id, t2)
            .await
            .unwrap();
        assert!(second.is_current);

        let history = repo.status_history(entity_id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(!history[0].record.is_current);
        assert_eq!(history[0].record.end_date, Some(t2));
        assert_eq!(history[1].record.start_date, t2);

        let current = repo.current_status(entity_id).await.unwrap().unwrap();
        assert_eq!(current.record.id, second.id);
        assert_eq!(current.stage(), Stage::UnderReview);
    }

    #[tokio::test]
    async fn test_current_status_none_before_submission() {
        let repo = InMemoryRepository::new();
        let entity_id = EntityId::new();
        repo.insert_entity(test_entity(entity_id)).await.unwrap();

        assert!(repo.current_status(entity_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_assignment_cascades_mark() {
        let repo = InMemoryRepository::new();
        let entity_id = EntityId::new();
        repo.insert_entity(test_entity(entity_id)).await.unwrap();

        let assignment = Assignment {
            id: AssignmentId::new(),
            entity_id,
            role: GraderRole::Reviewer,
            person_id: PersonId::new(),
            assigned_at: Utc::now(),
        };
        repo.insert_assignment(assignment.clone()).await.unwrap();

        let mark = Mark {
            entity_id,
            assignment_id: assignment.id,
            value: crate::domain::MarkValue::Grade(72.0),
            feedback: None,
            graded_by: assignment.person_id,
            submitted_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        repo.upsert_mark(mark).await.unwrap();

        let removed = repo
            .delete_assignment(entity_id, assignment.id)
            .await
            .unwrap();
        assert!(removed.is_some());
        assert!(repo
            .get_mark(entity_id, assignment.id)
            .await
            .unwrap()
            .is_none());

        // Deleting again is a no-op.
        assert!(repo
            .delete_assignment(entity_id, assignment.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_delete_assignment_checks_entity_ownership() {
        let repo = InMemoryRepository::new();
        let entity_id = EntityId::new();
        repo.insert_entity(test_entity(entity_id)).await.unwrap();

        let assignment = Assignment {
            id: AssignmentId::new(),
            entity_id,
            role: GraderRole::Panelist,
            person_id: PersonId::new(),
            assigned_at: Utc::now(),
        };
        repo.insert_assignment(assignment.clone()).await.unwrap();

        // Wrong entity: must not delete.
        let removed = repo
            .delete_assignment(EntityId::new(), assignment.id)
            .await
            .unwrap();
        assert!(removed.is_none());
        assert!(repo.get_assignment(assignment.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_list_assignments_preserves_creation_order_and_filters() {
        let repo = InMemoryRepository::new();
        let entity_id = EntityId::new();
        repo.insert_entity(test_entity(entity_id)).await.unwrap();

        let mut ids = Vec::new();
        for role in [GraderRole::Reviewer, GraderRole::Panelist, GraderRole::Reviewer] {
            let assignment = Assignment {
                id: AssignmentId::new(),
                entity_id,
                role,
                person_id: PersonId::new(),
                assigned_at: Utc::now(),
            };
            ids.push(assignment.id);
            repo.insert_assignment(assignment).await.unwrap();
        }

        let all = repo.list_assignments(entity_id, None).await.unwrap();
        assert_eq!(all.iter().map(|a| a.id).collect::<Vec<_>>(), ids);

        let reviewers = repo
            .list_assignments(entity_id, Some(GraderRole::Reviewer))
            .await
            .unwrap();
        assert_eq!(reviewers.len(), 2);
        assert_eq!(reviewers[0].id, ids[0]);
        assert_eq!(reviewers[1].id, ids[2]);
    }

    #[tokio::test]
    async fn test_person_by_email_is_case_insensitive() {
        let repo = InMemoryRepository::new();
        let person = Person::new("Dr. Nansubuga", "Nansubuga@example.ac.ug");
        repo.insert_person(person.clone()).await.unwrap();

        let found = repo
            .person_by_email("nansubuga@example.ac.ug")
            .await
            .unwrap();
        assert_eq!(found.map(|p| p.id), Some(person.id));
    }

    proptest! {
        /// Property: after any sequence of appends across entities, each
        /// entity has at most one current record, and every superseded
        /// record's end_date equals its successor's start_date.
        #[test]
        fn ledger_invariants_hold(appends in proptest::collection::vec((0usize..4, 0usize..11), 1..40)) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .build()
                .unwrap();
            rt.block_on(async {
                let repo = InMemoryRepository::new();
                let stages = Stage::all();

                let entity_ids: Vec<EntityId> =
                    (0..4).map(|_| EntityId::new()).collect();
                for id in &entity_ids {
                    repo.insert_entity(test_entity(*id)).await.unwrap();
                }

                let base = Utc::now();
                for (step, (entity_idx, stage_idx)) in appends.iter().enumerate() {
                    let entity_id = entity_ids[*entity_idx];
                    let def = repo
                        .definition_for_stage(stages[*stage_idx])
                        .await
                        .unwrap();
                    let at = base + chrono::Duration::seconds(step as i64);
                    repo.append_status(entity_id, def.id, at).await.unwrap();
                }

                for entity_id in &entity_ids {
                    let history = repo.status_history(*entity_id).await.unwrap();
                    let current_count = history
                        .iter()
                        .filter(|e| e.record.is_current)
                        .count();
                    assert!(
                        current_count <= 1,
                        "entity {} has {} current records",
                        entity_id,
                        current_count
                    );

                    for window in history.windows(2) {
                        assert_eq!(
                            window[0].record.end_date,
                            Some(window[1].record.start_date),
                            "superseded record must end when its successor starts"
                        );
                    }

                    if let Some(last) = history.last() {
                        assert!(last.record.is_current);
                        assert!(last.record.end_date.is_none());
                    }
                }
            });
        }
    }
}
