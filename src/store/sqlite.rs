//! SQLite implementation of `Repository`.
//!
//! Durable storage that survives service restarts. Uses a
//! `Mutex<Connection>` because `rusqlite::Connection` is not `Sync`; all
//! operations run under `tokio::task::spawn_blocking` so the async runtime
//! is never blocked on disk I/O.
//!
//! # Schema versioning
//!
//! The database uses SQLite's `user_version` pragma. When the schema
//! changes, increment `SCHEMA_VERSION` and add a migration arm in
//! `run_migrations`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{seed_definitions, Repository, StatusEntry, StoreError};
use crate::domain::{
    Assignment, AssignmentId, Defense, DefenseId, EntityId, EntityKind, GraderRole, Mark,
    MarkValue, Person, PersonId, StatusDefinition, StatusDefinitionId, StatusRecord,
    StatusRecordId, Student, StudentId, TrackableEntity,
};
use crate::grading::Verdict;
use crate::workflow::state::Stage;

/// Current schema version. Increment when making schema changes.
const SCHEMA_VERSION: i32 = 1;

pub struct SqliteRepository {
    conn: Arc<Mutex<Connection>>,
}

fn sql_err(operation: &'static str) -> impl Fn(rusqlite::Error) -> StoreError {
    move |e| StoreError::storage(operation, e.to_string())
}

fn uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn json_col<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    serde_json::from_str(&s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

impl SqliteRepository {
    /// Open (or create) the database at `path` and bring the schema up to
    /// date.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::storage(
                        "create database directory",
                        format!("{}: {}", parent.display(), e),
                    )
                })?;
            }
        }

        let conn = Connection::open(path_ref).map_err(sql_err("open database"))?;
        Self::from_connection(conn, false)
    }

    /// In-memory database, for tests.
    pub fn new_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(sql_err("open in-memory database"))?;
        Self::from_connection(conn, true)
    }

    fn from_connection(conn: Connection, in_memory: bool) -> Result<Self, StoreError> {
        // WAL for crash safety and concurrent readers. SQLite can silently
        // refuse WAL on filesystems without shared-memory support, so verify
        // what we actually got. In-memory databases report "memory".
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(sql_err("set journal_mode"))?;
        let journal_mode_ok = journal_mode.eq_ignore_ascii_case("wal")
            || (in_memory && journal_mode.eq_ignore_ascii_case("memory"));
        if !journal_mode_ok {
            return Err(StoreError::storage(
                "configure journal_mode",
                format!("expected WAL, SQLite returned '{journal_mode}'"),
            ));
        }

        conn.execute_batch(
            "PRAGMA synchronous = FULL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(sql_err("configure pragmas"))?;

        Self::init_schema(&conn)?;
        Self::seed(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        let current_version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .map_err(sql_err("read schema version"))?;

        if current_version > SCHEMA_VERSION {
            return Err(StoreError::storage(
                "check schema version",
                format!(
                    "database schema version {current_version} is newer than supported \
                     version {SCHEMA_VERSION}; upgrade the service"
                ),
            ));
        }

        if current_version < SCHEMA_VERSION {
            Self::run_migrations(conn, current_version)?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)
                .map_err(sql_err("update schema version"))?;
        }

        Ok(())
    }

    fn run_migrations(conn: &Connection, from_version: i32) -> Result<(), StoreError> {
        if from_version < 1 {
            conn.execute_batch(
                "CREATE TABLE students (
                     id TEXT PRIMARY KEY,
                     name TEXT NOT NULL,
                     registration_no TEXT
                 );

                 CREATE TABLE persons (
                     id TEXT PRIMARY KEY,
                     name TEXT NOT NULL,
                     email TEXT NOT NULL UNIQUE COLLATE NOCASE,
                     institution TEXT,
                     roles TEXT NOT NULL
                 );

                 CREATE TABLE entities (
                     id TEXT PRIMARY KEY,
                     kind TEXT NOT NULL,
                     student_id TEXT NOT NULL REFERENCES students(id),
                     title TEXT NOT NULL,
                     description TEXT,
                     research_area TEXT,
                     submission_date TEXT NOT NULL,
                     defense_date TEXT
                 );

                 CREATE TABLE status_definitions (
                     id TEXT PRIMARY KEY,
                     stage TEXT NOT NULL UNIQUE,
                     name TEXT NOT NULL,
                     color TEXT NOT NULL,
                     expected_duration_days INTEGER
                 );

                 CREATE TABLE status_records (
                     id TEXT PRIMARY KEY,
                     entity_id TEXT NOT NULL REFERENCES entities(id),
                     definition_id TEXT NOT NULL REFERENCES status_definitions(id),
                     start_date TEXT NOT NULL,
                     end_date TEXT,
                     is_current INTEGER NOT NULL
                 );
                 CREATE INDEX idx_status_records_entity
                     ON status_records(entity_id);

                 CREATE TABLE assignments (
                     id TEXT PRIMARY KEY,
                     entity_id TEXT NOT NULL REFERENCES entities(id),
                     role TEXT NOT NULL,
                     person_id TEXT NOT NULL REFERENCES persons(id),
                     assigned_at TEXT NOT NULL,
                     UNIQUE(entity_id, role, person_id)
                 );

                 CREATE TABLE marks (
                     entity_id TEXT NOT NULL,
                     assignment_id TEXT NOT NULL,
                     value_kind TEXT NOT NULL,
                     verdict TEXT,
                     grade REAL,
                     feedback TEXT,
                     graded_by TEXT NOT NULL,
                     submitted_by TEXT,
                     created_at TEXT NOT NULL,
                     updated_at TEXT NOT NULL,
                     PRIMARY KEY (entity_id, assignment_id)
                 );

                 CREATE TABLE defenses (
                     id TEXT PRIMARY KEY,
                     entity_id TEXT NOT NULL UNIQUE REFERENCES entities(id),
                     scheduled_date TEXT NOT NULL,
                     location TEXT NOT NULL,
                     chairperson_id TEXT NOT NULL,
                     minutes_secretary_id TEXT NOT NULL,
                     panelist_ids TEXT NOT NULL,
                     reviewer_ids TEXT NOT NULL,
                     scheduled_in_past INTEGER NOT NULL,
                     verdict TEXT,
                     comments TEXT
                 );",
            )
            .map_err(sql_err("create schema"))?;
        }

        Ok(())
    }

    /// Insert the seeded status definitions, keyed by stage. Re-running
    /// against an existing database is a no-op: the ids minted on first seed
    /// stay stable for the lifetime of the database.
    fn seed(conn: &Connection) -> Result<(), StoreError> {
        for def in seed_definitions() {
            conn.execute(
                "INSERT OR IGNORE INTO status_definitions
                     (id, stage, name, color, expected_duration_days)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    def.id.0.to_string(),
                    def.stage.as_str(),
                    def.name,
                    def.color,
                    def.expected_duration_days,
                ],
            )
            .map_err(sql_err("seed status definitions"))?;
        }
        Ok(())
    }

    /// Run a closure against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, operation: &'static str, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().expect("mutex poisoned");
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::storage(operation, e.to_string()))?
    }
}

fn read_definition(row: &Row<'_>) -> rusqlite::Result<StatusDefinition> {
    let stage_str: String = row.get(1)?;
    let stage = Stage::parse(&stage_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown stage '{stage_str}'").into(),
        )
    })?;
    Ok(StatusDefinition {
        id: StatusDefinitionId(uuid_col(row, 0)?),
        stage,
        name: row.get(2)?,
        color: row.get(3)?,
        expected_duration_days: row.get(4)?,
    })
}

fn read_entity(row: &Row<'_>) -> rusqlite::Result<TrackableEntity> {
    let kind_str: String = row.get(1)?;
    let kind = EntityKind::parse(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown entity kind '{kind_str}'").into(),
        )
    })?;
    Ok(TrackableEntity {
        id: EntityId(uuid_col(row, 0)?),
        kind,
        student_id: StudentId(uuid_col(row, 2)?),
        title: row.get(3)?,
        description: row.get(4)?,
        research_area: row.get(5)?,
        submission_date: row.get(6)?,
        defense_date: row.get(7)?,
    })
}

fn read_assignment(row: &Row<'_>) -> rusqlite::Result<Assignment> {
    let role_str: String = row.get(2)?;
    let role = GraderRole::parse(&role_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown grader role '{role_str}'").into(),
        )
    })?;
    Ok(Assignment {
        id: AssignmentId(uuid_col(row, 0)?),
        entity_id: EntityId(uuid_col(row, 1)?),
        role,
        person_id: PersonId(uuid_col(row, 3)?),
        assigned_at: row.get(4)?,
    })
}

fn read_mark(row: &Row<'_>) -> rusqlite::Result<Mark> {
    let value_kind: String = row.get(2)?;
    let value = match value_kind.as_str() {
        "verdict" => {
            let verdict_str: String = row.get(3)?;
            let verdict = Verdict::parse(&verdict_str).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    3,
                    rusqlite::types::Type::Text,
                    format!("unknown verdict '{verdict_str}'").into(),
                )
            })?;
            MarkValue::Verdict(verdict)
        }
        "grade" => MarkValue::Grade(row.get(4)?),
        other => {
            return Err(rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                format!("unknown mark value kind '{other}'").into(),
            ))
        }
    };
    Ok(Mark {
        entity_id: EntityId(uuid_col(row, 0)?),
        assignment_id: AssignmentId(uuid_col(row, 1)?),
        value,
        feedback: row.get(5)?,
        graded_by: PersonId(uuid_col(row, 6)?),
        submitted_by: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn read_defense(row: &Row<'_>) -> rusqlite::Result<Defense> {
    let verdict: Option<String> = row.get(9)?;
    let verdict = match verdict {
        Some(s) => Some(Verdict::parse(&s).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                9,
                rusqlite::types::Type::Text,
                format!("unknown verdict '{s}'").into(),
            )
        })?),
        None => None,
    };
    let panelist_ids: Vec<Uuid> = json_col(row, 6)?;
    let reviewer_ids: Vec<Uuid> = json_col(row, 7)?;
    Ok(Defense {
        id: DefenseId(uuid_col(row, 0)?),
        entity_id: EntityId(uuid_col(row, 1)?),
        scheduled_date: row.get(2)?,
        location: row.get(3)?,
        chairperson_id: PersonId(uuid_col(row, 4)?),
        minutes_secretary_id: PersonId(uuid_col(row, 5)?),
        panelist_ids: panelist_ids.into_iter().map(PersonId).collect(),
        reviewer_ids: reviewer_ids.into_iter().map(PersonId).collect(),
        scheduled_in_past: row.get(8)?,
        verdict,
        comments: row.get(10)?,
    })
}

const SELECT_DEFINITION: &str =
    "SELECT id, stage, name, color, expected_duration_days FROM status_definitions";
const SELECT_ENTITY: &str = "SELECT id, kind, student_id, title, description, research_area, \
                             submission_date, defense_date FROM entities";
const SELECT_ASSIGNMENT: &str =
    "SELECT id, entity_id, role, person_id, assigned_at FROM assignments";
const SELECT_MARK: &str = "SELECT entity_id, assignment_id, value_kind, verdict, grade, \
                           feedback, graded_by, submitted_by, created_at, updated_at FROM marks";
const SELECT_DEFENSE: &str =
    "SELECT id, entity_id, scheduled_date, location, chairperson_id, minutes_secretary_id, \
     panelist_ids, reviewer_ids, scheduled_in_past, verdict, comments FROM defenses";

#[async_trait]
impl Repository for SqliteRepository {
    async fn definition_for_stage(&self, stage: Stage) -> Result<StatusDefinition, StoreError> {
        self.with_conn("definition_for_stage", move |conn| {
            conn.query_row(
                &format!("{SELECT_DEFINITION} WHERE stage = ?1"),
                params![stage.as_str()],
                read_definition,
            )
            .map_err(sql_err("definition_for_stage"))
        })
        .await
    }

    async fn upsert_student(&self, student: Student) -> Result<(), StoreError> {
        self.with_conn("upsert_student", move |conn| {
            conn.execute(
                "INSERT INTO students (id, name, registration_no) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET
                     name = excluded.name,
                     registration_no = excluded.registration_no",
                params![
                    student.id.0.to_string(),
                    student.name,
                    student.registration_no
                ],
            )
            .map_err(sql_err("upsert_student"))?;
            Ok(())
        })
        .await
    }

    async fn get_student(&self, id: StudentId) -> Result<Option<Student>, StoreError> {
        self.with_conn("get_student", move |conn| {
            conn.query_row(
                "SELECT id, name, registration_no FROM students WHERE id = ?1",
                params![id.0.to_string()],
                |row| {
                    Ok(Student {
                        id: StudentId(uuid_col(row, 0)?),
                        name: row.get(1)?,
                        registration_no: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(sql_err("get_student"))
        })
        .await
    }

    async fn insert_person(&self, person: Person) -> Result<(), StoreError> {
        self.with_conn("insert_person", move |conn| {
            let roles = serde_json::to_string(&person.roles)
                .map_err(|e| StoreError::storage("insert_person", e.to_string()))?;
            conn.execute(
                "INSERT INTO persons (id, name, email, institution, roles)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    person.id.0.to_string(),
                    person.name,
                    person.email,
                    person.institution,
                    roles
                ],
            )
            .map_err(sql_err("insert_person"))?;
            Ok(())
        })
        .await
    }

    async fn update_person(&self, person: Person) -> Result<(), StoreError> {
        self.with_conn("update_person", move |conn| {
            let roles = serde_json::to_string(&person.roles)
                .map_err(|e| StoreError::storage("update_person", e.to_string()))?;
            conn.execute(
                "UPDATE persons SET name = ?2, email = ?3, institution = ?4, roles = ?5
                 WHERE id = ?1",
                params![
                    person.id.0.to_string(),
                    person.name,
                    person.email,
                    person.institution,
                    roles
                ],
            )
            .map_err(sql_err("update_person"))?;
            Ok(())
        })
        .await
    }

    async fn get_person(&self, id: PersonId) -> Result<Option<Person>, StoreError> {
        self.with_conn("get_person", move |conn| {
            conn.query_row(
                "SELECT id, name, email, institution, roles FROM persons WHERE id = ?1",
                params![id.0.to_string()],
                read_person,
            )
            .optional()
            .map_err(sql_err("get_person"))
        })
        .await
    }

    async fn person_by_email(&self, email: &str) -> Result<Option<Person>, StoreError> {
        let email = email.to_string();
        self.with_conn("person_by_email", move |conn| {
            conn.query_row(
                "SELECT id, name, email, institution, roles FROM persons
                 WHERE email = ?1 COLLATE NOCASE",
                params![email],
                read_person,
            )
            .optional()
            .map_err(sql_err("person_by_email"))
        })
        .await
    }

    async fn insert_entity(&self, entity: TrackableEntity) -> Result<(), StoreError> {
        self.with_conn("insert_entity", move |conn| {
            conn.execute(
                "INSERT INTO entities
                     (id, kind, student_id, title, description, research_area,
                      submission_date, defense_date)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    entity.id.0.to_string(),
                    entity.kind.as_str(),
                    entity.student_id.0.to_string(),
                    entity.title,
                    entity.description,
                    entity.research_area,
                    entity.submission_date,
                    entity.defense_date,
                ],
            )
            .map_err(sql_err("insert_entity"))?;
            Ok(())
        })
        .await
    }

    async fn get_entity(&self, id: EntityId) -> Result<Option<TrackableEntity>, StoreError> {
        self.with_conn("get_entity", move |conn| {
            conn.query_row(
                &format!("{SELECT_ENTITY} WHERE id = ?1"),
                params![id.0.to_string()],
                read_entity,
            )
            .optional()
            .map_err(sql_err("get_entity"))
        })
        .await
    }

    async fn set_defense_date(
        &self,
        id: EntityId,
        date: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.with_conn("set_defense_date", move |conn| {
            let changed = conn
                .execute(
                    "UPDATE entities SET defense_date = ?2 WHERE id = ?1",
                    params![id.0.to_string(), date],
                )
                .map_err(sql_err("set_defense_date"))?;
            if changed == 0 {
                return Err(StoreError::UnknownEntity(id));
            }
            Ok(())
        })
        .await
    }

    async fn append_status(
        &self,
        entity_id: EntityId,
        definition_id: StatusDefinitionId,
        at: DateTime<Utc>,
    ) -> Result<StatusRecord, StoreError> {
        self.with_conn("append_status", move |conn| {
            // Supersede and insert in one transaction: this pair is what
            // keeps "at most one current record" true under concurrency.
            let tx = conn.transaction().map_err(sql_err("append_status"))?;

            let entity_exists: bool = tx
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM entities WHERE id = ?1)",
                    params![entity_id.0.to_string()],
                    |row| row.get(0),
                )
                .map_err(sql_err("append_status"))?;
            if !entity_exists {
                return Err(StoreError::UnknownEntity(entity_id));
            }

            let definition_exists: bool = tx
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM status_definitions WHERE id = ?1)",
                    params![definition_id.0.to_string()],
                    |row| row.get(0),
                )
                .map_err(sql_err("append_status"))?;
            if !definition_exists {
                return Err(StoreError::UnknownStatus(definition_id));
            }

            tx.execute(
                "UPDATE status_records SET is_current = 0, end_date = ?2
                 WHERE entity_id = ?1 AND is_current = 1",
                params![entity_id.0.to_string(), at],
            )
            .map_err(sql_err("append_status"))?;

            let record = StatusRecord {
                id: StatusRecordId::new(),
                entity_id,
                definition_id,
                start_date: at,
                end_date: None,
                is_current: true,
            };
            tx.execute(
                "INSERT INTO status_records
                     (id, entity_id, definition_id, start_date, end_date, is_current)
                 VALUES (?1, ?2, ?3, ?4, NULL, 1)",
                params![
                    record.id.0.to_string(),
                    entity_id.0.to_string(),
                    definition_id.0.to_string(),
                    at,
                ],
            )
            .map_err(sql_err("append_status"))?;

            tx.commit().map_err(sql_err("append_status"))?;
            Ok(record)
        })
        .await
    }

    async fn current_status(
        &self,
        entity_id: EntityId,
    ) -> Result<Option<StatusEntry>, StoreError> {
        self.with_conn("current_status", move |conn| {
            conn.query_row(
                "SELECT r.id, r.entity_id, r.definition_id, r.start_date, r.end_date,
                        r.is_current,
                        d.id, d.stage, d.name, d.color, d.expected_duration_days
                 FROM status_records r
                 JOIN status_definitions d ON d.id = r.definition_id
                 WHERE r.entity_id = ?1 AND r.is_current = 1",
                params![entity_id.0.to_string()],
                read_status_entry,
            )
            .optional()
            .map_err(sql_err("current_status"))
        })
        .await
    }

    async fn status_history(&self, entity_id: EntityId) -> Result<Vec<StatusEntry>, StoreError> {
        self.with_conn("status_history", move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT r.id, r.entity_id, r.definition_id, r.start_date, r.end_date,
                            r.is_current,
                            d.id, d.stage, d.name, d.color, d.expected_duration_days
                     FROM status_records r
                     JOIN status_definitions d ON d.id = r.definition_id
                     WHERE r.entity_id = ?1
                     ORDER BY r.rowid",
                )
                .map_err(sql_err("status_history"))?;
            let rows = stmt
                .query_map(params![entity_id.0.to_string()], read_status_entry)
                .map_err(sql_err("status_history"))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(sql_err("status_history"))
        })
        .await
    }

    async fn insert_assignment(&self, assignment: Assignment) -> Result<(), StoreError> {
        self.with_conn("insert_assignment", move |conn| {
            conn.execute(
                "INSERT INTO assignments (id, entity_id, role, person_id, assigned_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    assignment.id.0.to_string(),
                    assignment.entity_id.0.to_string(),
                    assignment.role.as_str(),
                    assignment.person_id.0.to_string(),
                    assignment.assigned_at,
                ],
            )
            .map_err(sql_err("insert_assignment"))?;
            Ok(())
        })
        .await
    }

    async fn get_assignment(&self, id: AssignmentId) -> Result<Option<Assignment>, StoreError> {
        self.with_conn("get_assignment", move |conn| {
            conn.query_row(
                &format!("{SELECT_ASSIGNMENT} WHERE id = ?1"),
                params![id.0.to_string()],
                read_assignment,
            )
            .optional()
            .map_err(sql_err("get_assignment"))
        })
        .await
    }

    async fn find_assignment(
        &self,
        entity_id: EntityId,
        role: GraderRole,
        person_id: PersonId,
    ) -> Result<Option<Assignment>, StoreError> {
        self.with_conn("find_assignment", move |conn| {
            conn.query_row(
                &format!(
                    "{SELECT_ASSIGNMENT} WHERE entity_id = ?1 AND role = ?2 AND person_id = ?3"
                ),
                params![
                    entity_id.0.to_string(),
                    role.as_str(),
                    person_id.0.to_string()
                ],
                read_assignment,
            )
            .optional()
            .map_err(sql_err("find_assignment"))
        })
        .await
    }

    async fn list_assignments(
        &self,
        entity_id: EntityId,
        role: Option<GraderRole>,
    ) -> Result<Vec<Assignment>, StoreError> {
        self.with_conn("list_assignments", move |conn| {
            let entity = entity_id.0.to_string();
            match role {
                Some(role) => {
                    let mut stmt = conn
                        .prepare(&format!(
                            "{SELECT_ASSIGNMENT} WHERE entity_id = ?1 AND role = ?2 \
                             ORDER BY rowid"
                        ))
                        .map_err(sql_err("list_assignments"))?;
                    let rows = stmt
                        .query_map(params![entity, role.as_str()], read_assignment)
                        .map_err(sql_err("list_assignments"))?;
                    rows.collect::<Result<Vec<_>, _>>()
                        .map_err(sql_err("list_assignments"))
                }
                None => {
                    let mut stmt = conn
                        .prepare(&format!(
                            "{SELECT_ASSIGNMENT} WHERE entity_id = ?1 ORDER BY rowid"
                        ))
                        .map_err(sql_err("list_assignments"))?;
                    let rows = stmt
                        .query_map(params![entity], read_assignment)
                        .map_err(sql_err("list_assignments"))?;
                    rows.collect::<Result<Vec<_>, _>>()
                        .map_err(sql_err("list_assignments"))
                }
            }
        })
        .await
    }

    async fn delete_assignment(
        &self,
        entity_id: EntityId,
        assignment_id: AssignmentId,
    ) -> Result<Option<Assignment>, StoreError> {
        self.with_conn("delete_assignment", move |conn| {
            let tx = conn.transaction().map_err(sql_err("delete_assignment"))?;

            let existing = tx
                .query_row(
                    &format!("{SELECT_ASSIGNMENT} WHERE id = ?1 AND entity_id = ?2"),
                    params![assignment_id.0.to_string(), entity_id.0.to_string()],
                    read_assignment,
                )
                .optional()
                .map_err(sql_err("delete_assignment"))?;

            let Some(existing) = existing else {
                return Ok(None);
            };

            tx.execute(
                "DELETE FROM assignments WHERE id = ?1",
                params![assignment_id.0.to_string()],
            )
            .map_err(sql_err("delete_assignment"))?;
            // Cascade: grading must be re-entered against a re-assignment.
            tx.execute(
                "DELETE FROM marks WHERE entity_id = ?1 AND assignment_id = ?2",
                params![entity_id.0.to_string(), assignment_id.0.to_string()],
            )
            .map_err(sql_err("delete_assignment"))?;

            tx.commit().map_err(sql_err("delete_assignment"))?;
            Ok(Some(existing))
        })
        .await
    }

    async fn upsert_mark(&self, mark: Mark) -> Result<(), StoreError> {
        self.with_conn("upsert_mark", move |conn| {
            let (value_kind, verdict, grade) = match mark.value {
                MarkValue::Verdict(v) => ("verdict", Some(v.as_str()), None),
                MarkValue::Grade(g) => ("grade", None, Some(g)),
            };
            conn.execute(
                "INSERT INTO marks
                     (entity_id, assignment_id, value_kind, verdict, grade, feedback,
                      graded_by, submitted_by, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(entity_id, assignment_id) DO UPDATE SET
                     value_kind = excluded.value_kind,
                     verdict = excluded.verdict,
                     grade = excluded.grade,
                     feedback = excluded.feedback,
                     graded_by = excluded.graded_by,
                     submitted_by = excluded.submitted_by,
                     updated_at = excluded.updated_at",
                params![
                    mark.entity_id.0.to_string(),
                    mark.assignment_id.0.to_string(),
                    value_kind,
                    verdict,
                    grade,
                    mark.feedback,
                    mark.graded_by.0.to_string(),
                    mark.submitted_by,
                    mark.created_at,
                    mark.updated_at,
                ],
            )
            .map_err(sql_err("upsert_mark"))?;
            Ok(())
        })
        .await
    }

    async fn get_mark(
        &self,
        entity_id: EntityId,
        assignment_id: AssignmentId,
    ) -> Result<Option<Mark>, StoreError> {
        self.with_conn("get_mark", move |conn| {
            conn.query_row(
                &format!("{SELECT_MARK} WHERE entity_id = ?1 AND assignment_id = ?2"),
                params![entity_id.0.to_string(), assignment_id.0.to_string()],
                read_mark,
            )
            .optional()
            .map_err(sql_err("get_mark"))
        })
        .await
    }

    async fn list_marks(&self, entity_id: EntityId) -> Result<Vec<Mark>, StoreError> {
        self.with_conn("list_marks", move |conn| {
            let mut stmt = conn
                .prepare(&format!("{SELECT_MARK} WHERE entity_id = ?1 ORDER BY rowid"))
                .map_err(sql_err("list_marks"))?;
            let rows = stmt
                .query_map(params![entity_id.0.to_string()], read_mark)
                .map_err(sql_err("list_marks"))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(sql_err("list_marks"))
        })
        .await
    }

    async fn upsert_defense(&self, defense: Defense) -> Result<(), StoreError> {
        self.with_conn("upsert_defense", move |conn| {
            let panelists = serde_json::to_string(
                &defense.panelist_ids.iter().map(|p| p.0).collect::<Vec<_>>(),
            )
            .map_err(|e| StoreError::storage("upsert_defense", e.to_string()))?;
            let reviewers = serde_json::to_string(
                &defense.reviewer_ids.iter().map(|p| p.0).collect::<Vec<_>>(),
            )
            .map_err(|e| StoreError::storage("upsert_defense", e.to_string()))?;

            conn.execute(
                "INSERT INTO defenses
                     (id, entity_id, scheduled_date, location, chairperson_id,
                      minutes_secretary_id, panelist_ids, reviewer_ids,
                      scheduled_in_past, verdict, comments)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(entity_id) DO UPDATE SET
                     scheduled_date = excluded.scheduled_date,
                     location = excluded.location,
                     chairperson_id = excluded.chairperson_id,
                     minutes_secretary_id = excluded.minutes_secretary_id,
                     panelist_ids = excluded.panelist_ids,
                     reviewer_ids = excluded.reviewer_ids,
                     scheduled_in_past = excluded.scheduled_in_past,
                     verdict = excluded.verdict,
                     comments = excluded.comments",
                params![
                    defense.id.0.to_string(),
                    defense.entity_id.0.to_string(),
                    defense.scheduled_date,
                    defense.location,
                    defense.chairperson_id.0.to_string(),
                    defense.minutes_secretary_id.0.to_string(),
                    panelists,
                    reviewers,
                    defense.scheduled_in_past,
                    defense.verdict.map(|v| v.as_str()),
                    defense.comments,
                ],
            )
            .map_err(sql_err("upsert_defense"))?;
            Ok(())
        })
        .await
    }

    async fn get_defense(&self, id: DefenseId) -> Result<Option<Defense>, StoreError> {
        self.with_conn("get_defense", move |conn| {
            conn.query_row(
                &format!("{SELECT_DEFENSE} WHERE id = ?1"),
                params![id.0.to_string()],
                read_defense,
            )
            .optional()
            .map_err(sql_err("get_defense"))
        })
        .await
    }

    async fn defense_for_entity(
        &self,
        entity_id: EntityId,
    ) -> Result<Option<Defense>, StoreError> {
        self.with_conn("defense_for_entity", move |conn| {
            conn.query_row(
                &format!("{SELECT_DEFENSE} WHERE entity_id = ?1"),
                params![entity_id.0.to_string()],
                read_defense,
            )
            .optional()
            .map_err(sql_err("defense_for_entity"))
        })
        .await
    }
}

fn read_person(row: &Row<'_>) -> rusqlite::Result<Person> {
    Ok(Person {
        id: PersonId(uuid_col(row, 0)?),
        name: row.get(1)?,
        email: row.get(2)?,
        institution: row.get(3)?,
        roles: json_col(row, 4)?,
    })
}

fn read_status_entry(row: &Row<'_>) -> rusqlite::Result<StatusEntry> {
    let record = StatusRecord {
        id: StatusRecordId(uuid_col(row, 0)?),
        entity_id: EntityId(uuid_col(row, 1)?),
        definition_id: StatusDefinitionId(uuid_col(row, 2)?),
        start_date: row.get(3)?,
        end_date: row.get(4)?,
        is_current: row.get(5)?,
    };
    let stage_str: String = row.get(7)?;
    let stage = Stage::parse(&stage_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            7,
            rusqlite::types::Type::Text,
            format!("unknown stage '{stage_str}'").into(),
        )
    })?;
    let definition = StatusDefinition {
        id: StatusDefinitionId(uuid_col(row, 6)?),
        stage,
        name: row.get(8)?,
        color: row.get(9)?,
        expected_duration_days: row.get(10)?,
    };
    Ok(StatusEntry { record, definition })
}
