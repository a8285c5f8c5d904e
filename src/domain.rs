//! Core domain types: people, trackable entities, assignments, marks,
//! defenses, and the status ledger records.
//!
//! Identifiers are newtypes over `Uuid` to prevent mixing id spaces.
//! Everything here is plain data; the workflow rules live in `workflow`
//! and the aggregation policies in `grading`.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::grading::Verdict;
use crate::workflow::state::Stage;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_id!(
    /// Identifier of a trackable entity (proposal or book).
    EntityId
);
uuid_id!(
    /// Identifier of a student.
    StudentId
);
uuid_id!(
    /// Identifier of a person (academic contact, any role).
    PersonId
);
uuid_id!(
    /// Identifier of a grader assignment.
    AssignmentId
);
uuid_id!(
    /// Identifier of a defense record.
    DefenseId
);
uuid_id!(
    /// Identifier of a status definition.
    StatusDefinitionId
);
uuid_id!(
    /// Identifier of a status record in the ledger.
    StatusRecordId
);

/// Roles a person can hold. A single person may hold several; granting a
/// role never duplicates the person's identity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Reviewer,
    Panelist,
    Examiner,
    Chairperson,
    MinutesSecretary,
    StaffMember,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reviewer => "reviewer",
            Self::Panelist => "panelist",
            Self::Examiner => "examiner",
            Self::Chairperson => "chairperson",
            Self::MinutesSecretary => "minutes_secretary",
            Self::StaffMember => "staff_member",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The subset of roles that can hold a grading assignment against an entity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum GraderRole {
    Reviewer,
    Panelist,
    Examiner,
}

impl GraderRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reviewer => "reviewer",
            Self::Panelist => "panelist",
            Self::Examiner => "examiner",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reviewer" => Some(Self::Reviewer),
            "panelist" => Some(Self::Panelist),
            "examiner" => Some(Self::Examiner),
            _ => None,
        }
    }
}

impl From<GraderRole> for Role {
    fn from(role: GraderRole) -> Self {
        match role {
            GraderRole::Reviewer => Role::Reviewer,
            GraderRole::Panelist => Role::Panelist,
            GraderRole::Examiner => Role::Examiner,
        }
    }
}

impl fmt::Display for GraderRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An internal or external academic contact.
///
/// Identity is deduplicated by email: assigning "the same" reviewer twice
/// resolves to one `Person` with one or more role grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: PersonId,
    pub name: String,
    pub email: String,
    pub institution: Option<String>,
    pub roles: BTreeSet<Role>,
}

impl Person {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: PersonId::new(),
            name: name.into(),
            email: email.into(),
            institution: None,
            roles: BTreeSet::new(),
        }
    }

    /// Grant a role. Idempotent; returns true if the role was newly granted.
    pub fn grant_role(&mut self, role: Role) -> bool {
        self.roles.insert(role)
    }
}

/// A student owning proposals and books.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: StudentId,
    pub name: String,
    pub registration_no: Option<String>,
}

/// Which kind of trackable entity this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Proposal,
    Book,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proposal => "proposal",
            Self::Book => "book",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "proposal" => Some(Self::Proposal),
            "book" => Some(Self::Book),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A proposal or dissertation book moving through the workflow.
///
/// The entity itself carries only descriptive fields; its workflow position
/// is derived from the status ledger (`StatusRecord`s appended over time).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackableEntity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub student_id: StudentId,
    pub title: String,
    pub description: Option<String>,
    pub research_area: Option<String>,
    pub submission_date: DateTime<Utc>,
    pub defense_date: Option<DateTime<Utc>>,
}

/// Immutable reference data describing one named workflow status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusDefinition {
    pub id: StatusDefinitionId,
    /// The workflow stage this definition renders.
    pub stage: Stage,
    /// Display name, e.g. "Graded - Passed".
    pub name: String,
    /// Display color (hex).
    pub color: String,
    /// Expected days in this status, for SLA display.
    pub expected_duration_days: Option<u32>,
}

/// One entry in an entity's append-only status ledger.
///
/// Records are never deleted, only superseded: when a new record becomes
/// current, the previous current record receives an `end_date` equal to the
/// new record's `start_date` and loses its `is_current` flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub id: StatusRecordId,
    pub entity_id: EntityId,
    pub definition_id: StatusDefinitionId,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub is_current: bool,
}

/// A grader assignment linking a person to an entity under one role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub entity_id: EntityId,
    pub role: GraderRole,
    pub person_id: PersonId,
    pub assigned_at: DateTime<Utc>,
}

/// The value of a mark: a qualitative verdict (reviewers, defenses) or a
/// numeric grade out of 100 (panelists, examiners).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum MarkValue {
    Verdict(Verdict),
    Grade(f64),
}

/// A recorded mark against one assignment.
///
/// At most one mark exists per (entity, assignment) pair; recording again
/// updates the existing mark in place, refreshing `updated_at` while
/// preserving `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mark {
    pub entity_id: EntityId,
    pub assignment_id: AssignmentId,
    pub value: MarkValue,
    pub feedback: Option<String>,
    /// The assignment's person: who graded.
    pub graded_by: PersonId,
    /// The acting faculty member who entered the mark, when known.
    /// Opaque because session handling is outside this service.
    pub submitted_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A scheduled defense for a proposal.
///
/// The roster fields are a snapshot of who was invited at scheduling time,
/// not live references to the assignment registry. One defense exists per
/// proposal; re-scheduling updates it in place until a verdict is recorded,
/// after which it is immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Defense {
    pub id: DefenseId,
    pub entity_id: EntityId,
    pub scheduled_date: DateTime<Utc>,
    pub location: String,
    pub chairperson_id: PersonId,
    pub minutes_secretary_id: PersonId,
    pub panelist_ids: Vec<PersonId>,
    pub reviewer_ids: Vec<PersonId>,
    /// Set when the scheduled date precedes the proposal's submission date.
    /// Accepted but flagged so the caller can surface a warning.
    pub scheduled_in_past: bool,
    pub verdict: Option<Verdict>,
    pub comments: Option<String>,
}

impl Defense {
    /// A defense is decided once a verdict has been recorded.
    pub fn is_decided(&self) -> bool {
        self.verdict.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_distinct() {
        let a = EntityId::new();
        let b = EntityId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_grant_role_is_idempotent() {
        let mut person = Person::new("Dr. Okello", "okello@example.ac.ug");
        assert!(person.grant_role(Role::Reviewer));
        assert!(!person.grant_role(Role::Reviewer));
        assert!(person.grant_role(Role::Panelist));
        assert_eq!(person.roles.len(), 2);
    }

    #[test]
    fn test_grader_role_parse_round_trips() {
        for role in [GraderRole::Reviewer, GraderRole::Panelist, GraderRole::Examiner] {
            assert_eq!(GraderRole::parse(role.as_str()), Some(role));
        }
        assert_eq!(GraderRole::parse("chairperson"), None);
    }

    #[test]
    fn test_defense_decided() {
        let mut defense = Defense {
            id: DefenseId::new(),
            entity_id: EntityId::new(),
            scheduled_date: Utc::now(),
            location: "Senate Boardroom".to_string(),
            chairperson_id: PersonId::new(),
            minutes_secretary_id: PersonId::new(),
            panelist_ids: vec![PersonId::new()],
            reviewer_ids: vec![PersonId::new()],
            scheduled_in_past: false,
            verdict: None,
            comments: None,
        };
        assert!(!defense.is_decided());
        defense.verdict = Some(Verdict::Pass);
        assert!(defense.is_decided());
    }
}
