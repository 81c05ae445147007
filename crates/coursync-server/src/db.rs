//! The authoritative remote store.
//!
//! Records are scoped by `user_id` and soft-deleted through `deleted_at`.
//! The document tables are the ones the client uses, so document handling
//! goes through [`coursync_store::DocumentManager`] on this connection.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use coursync_shared::protocol::{AssignmentRecord, CourseRecord};
use coursync_shared::types::{
    format_timestamp, parse_timestamp, AssignmentField, AssignmentFields, CourseField,
    CourseFields, UserId,
};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::error::ServerError;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS courses (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id          INTEGER NOT NULL,
    local_id         INTEGER,
    external_id      TEXT NOT NULL UNIQUE,
    code             TEXT NOT NULL,
    name             TEXT NOT NULL,
    duration         TEXT,
    room_number      TEXT,
    color            TEXT,
    start_date       TEXT,
    end_date         TEXT,
    credits          INTEGER,
    schedule         TEXT,
    semester         TEXT,
    instructor       TEXT,
    instructor_email TEXT,
    deleted_at       TEXT,
    updated_at       TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_courses_live_code
    ON courses(user_id, code) WHERE deleted_at IS NULL;

CREATE TABLE IF NOT EXISTS assignments (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id     INTEGER NOT NULL,
    local_id    INTEGER,
    external_id TEXT NOT NULL UNIQUE,
    title       TEXT NOT NULL,
    todo        TEXT,
    deadline    TEXT,
    link        TEXT,
    course_code TEXT NOT NULL,
    type_name   TEXT,
    status_name TEXT,
    priority    TEXT,
    completed   INTEGER NOT NULL DEFAULT 0,
    deleted_at  TEXT,
    updated_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_assignments_user ON assignments(user_id);
"#;

const COURSE_COLUMNS: &str = "id, external_id, local_id, code, name, duration, room_number, color,
     start_date, end_date, credits, schedule, semester, instructor, instructor_email";

const ASSIGNMENT_COLUMNS: &str = "id, external_id, local_id, title, todo, deadline, link,
     course_code, type_name, status_name, priority, completed";

/// Which record table a change addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Courses,
    Assignments,
}

impl Table {
    fn name(&self) -> &'static str {
        match self {
            Self::Courses => "courses",
            Self::Assignments => "assignments",
        }
    }
}

/// Identity of a live record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordKey {
    pub id: i64,
    pub user_id: UserId,
    pub external_id: String,
}

pub struct RemoteDb {
    conn: Mutex<Connection>,
}

impl RemoteDb {
    pub fn open(path: &Path) -> Result<Self, ServerError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, ServerError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, ServerError> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA_SQL)?;
        conn.execute_batch(coursync_store::documents::SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` with exclusive access to the connection.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, ServerError>,
    ) -> Result<T, ServerError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        f(&conn)
    }

    // -----------------------------------------------------------------------
    // Courses
    // -----------------------------------------------------------------------

    pub fn insert_course(
        &self,
        user_id: UserId,
        local_id: Option<i64>,
        external_id: &str,
        f: &CourseFields,
    ) -> Result<CourseRecord, ServerError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO courses (user_id, local_id, external_id, code, name, duration,
                                      room_number, color, start_date, end_date, credits,
                                      schedule, semester, instructor, instructor_email, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    user_id.0,
                    local_id,
                    external_id,
                    f.code,
                    f.name,
                    f.duration,
                    f.room_number,
                    f.color,
                    f.start_date,
                    f.end_date,
                    f.credits,
                    f.schedule,
                    f.semester,
                    f.instructor,
                    f.instructor_email,
                    format_timestamp(&Utc::now()),
                ],
            )?;
            course_by_id(conn, conn.last_insert_rowid())
        })
    }

    pub fn list_courses(&self, user_id: UserId) -> Result<Vec<CourseRecord>, ServerError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COURSE_COLUMNS} FROM courses
                 WHERE user_id = ?1 AND deleted_at IS NULL ORDER BY code"
            ))?;
            let rows = stmt.query_map(params![user_id.0], row_to_course)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    pub fn course(&self, id: i64) -> Result<CourseRecord, ServerError> {
        self.with_conn(|conn| course_by_id(conn, id))
    }

    pub fn course_code_exists(&self, user_id: UserId, code: &str) -> Result<bool, ServerError> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT 1 FROM courses WHERE user_id = ?1 AND code = ?2 AND deleted_at IS NULL",
                    params![user_id.0, code],
                    |_| Ok(()),
                )
                .optional()?
                .is_some())
        })
    }

    /// Soft-delete the live assignments filed under a course code and return
    /// their ids.
    pub fn soft_delete_course_assignments(
        &self,
        user_id: UserId,
        code: &str,
    ) -> Result<Vec<i64>, ServerError> {
        self.with_conn(|conn| {
            let ids = {
                let mut stmt = conn.prepare(
                    "SELECT id FROM assignments
                     WHERE user_id = ?1 AND course_code = ?2 AND deleted_at IS NULL",
                )?;
                let rows = stmt.query_map(params![user_id.0, code], |row| row.get::<_, i64>(0))?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };
            conn.execute(
                "UPDATE assignments SET deleted_at = ?1, updated_at = ?1
                 WHERE user_id = ?2 AND course_code = ?3 AND deleted_at IS NULL",
                params![format_timestamp(&Utc::now()), user_id.0, code],
            )?;
            Ok(ids)
        })
    }

    // -----------------------------------------------------------------------
    // Assignments
    // -----------------------------------------------------------------------

    pub fn insert_assignment(
        &self,
        user_id: UserId,
        local_id: Option<i64>,
        external_id: &str,
        f: &AssignmentFields,
    ) -> Result<AssignmentRecord, ServerError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO assignments (user_id, local_id, external_id, title, todo, deadline,
                                          link, course_code, type_name, status_name, priority,
                                          completed, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    user_id.0,
                    local_id,
                    external_id,
                    f.title,
                    f.todo,
                    f.deadline.as_ref().map(format_timestamp),
                    f.link,
                    f.course_code,
                    f.type_name,
                    f.status_name,
                    f.priority,
                    f.completed,
                    format_timestamp(&Utc::now()),
                ],
            )?;
            assignment_by_id(conn, conn.last_insert_rowid())
        })
    }

    pub fn list_assignments(&self, user_id: UserId) -> Result<Vec<AssignmentRecord>, ServerError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ASSIGNMENT_COLUMNS} FROM assignments
                 WHERE user_id = ?1 AND deleted_at IS NULL
                 ORDER BY deadline IS NULL, deadline, id"
            ))?;
            let rows = stmt.query_map(params![user_id.0], row_to_assignment)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    pub fn assignment(&self, id: i64) -> Result<AssignmentRecord, ServerError> {
        self.with_conn(|conn| assignment_by_id(conn, id))
    }

    // -----------------------------------------------------------------------
    // Shared
    // -----------------------------------------------------------------------

    /// Live record owned by `user_id`, by remote id.
    pub fn owned(&self, table: Table, user_id: UserId, id: i64) -> Result<RecordKey, ServerError> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT id, user_id, external_id FROM {} WHERE id = ?1 AND user_id = ?2
                     AND deleted_at IS NULL",
                    table.name()
                ),
                params![id, user_id.0],
                row_to_key,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    ServerError::NotFound(format!("{} {id}", table.name()))
                }
                other => other.into(),
            })
        })
    }

    /// Live record by external id, regardless of owner.
    pub fn by_external_id(
        &self,
        table: Table,
        external_id: &str,
    ) -> Result<Option<RecordKey>, ServerError> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT id, user_id, external_id FROM {} WHERE external_id = ?1
                         AND deleted_at IS NULL",
                        table.name()
                    ),
                    params![external_id],
                    row_to_key,
                )
                .optional()?)
        })
    }

    /// Write one normalized column value. `column` must come from
    /// [`AssignmentField`] or [`CourseField`].
    pub fn update_column(
        &self,
        table: Table,
        id: i64,
        column: &'static str,
        value: &Value,
    ) -> Result<(), ServerError> {
        self.with_conn(|conn| {
            let affected = conn.execute(
                &format!(
                    "UPDATE {} SET {column} = ?1, updated_at = ?2 WHERE id = ?3
                     AND deleted_at IS NULL",
                    table.name()
                ),
                params![json_to_sql(value), format_timestamp(&Utc::now()), id],
            )?;
            if affected == 0 {
                return Err(ServerError::NotFound(format!("{} {id}", table.name())));
            }
            Ok(())
        })
    }

    /// Mark a record deleted. Returns `false` when it already was.
    pub fn soft_delete(&self, table: Table, id: i64) -> Result<bool, ServerError> {
        self.with_conn(|conn| {
            let now = format_timestamp(&Utc::now());
            let affected = conn.execute(
                &format!(
                    "UPDATE {} SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2
                     AND deleted_at IS NULL",
                    table.name()
                ),
                params![now, id],
            )?;
            Ok(affected > 0)
        })
    }
}

/// Parse an assignment column name, for callers holding raw input.
pub fn assignment_column(column: &str, value: &Value) -> Result<(&'static str, Value), ServerError> {
    let field: AssignmentField = column.parse()?;
    Ok((field.column(), field.normalize(value)?))
}

pub fn course_column(column: &str, value: &Value) -> Result<(&'static str, Value), ServerError> {
    let field: CourseField = column.parse()?;
    Ok((field.column(), field.normalize(value)?))
}

fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => n.as_i64().map(SqlValue::Integer).unwrap_or(SqlValue::Null),
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn course_by_id(conn: &Connection, id: i64) -> Result<CourseRecord, ServerError> {
    Ok(conn.query_row(
        &format!("SELECT {COURSE_COLUMNS} FROM courses WHERE id = ?1"),
        params![id],
        row_to_course,
    )?)
}

fn assignment_by_id(conn: &Connection, id: i64) -> Result<AssignmentRecord, ServerError> {
    Ok(conn.query_row(
        &format!("SELECT {ASSIGNMENT_COLUMNS} FROM assignments WHERE id = ?1"),
        params![id],
        row_to_assignment,
    )?)
}

fn row_to_key(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecordKey> {
    Ok(RecordKey {
        id: row.get(0)?,
        user_id: UserId(row.get(1)?),
        external_id: row.get(2)?,
    })
}

fn row_to_course(row: &rusqlite::Row<'_>) -> rusqlite::Result<CourseRecord> {
    Ok(CourseRecord {
        id: row.get(0)?,
        external_id: row.get(1)?,
        local_id: row.get(2)?,
        fields: CourseFields {
            code: row.get(3)?,
            name: row.get(4)?,
            duration: row.get(5)?,
            room_number: row.get(6)?,
            color: row.get(7)?,
            start_date: row.get(8)?,
            end_date: row.get(9)?,
            credits: row.get(10)?,
            schedule: row.get(11)?,
            semester: row.get(12)?,
            instructor: row.get(13)?,
            instructor_email: row.get(14)?,
        },
    })
}

fn row_to_assignment(row: &rusqlite::Row<'_>) -> rusqlite::Result<AssignmentRecord> {
    let deadline: Option<String> = row.get(5)?;
    Ok(AssignmentRecord {
        id: row.get(0)?,
        external_id: row.get(1)?,
        local_id: row.get(2)?,
        fields: AssignmentFields {
            title: row.get(3)?,
            todo: row.get(4)?,
            deadline: deadline.as_deref().and_then(parse_timestamp),
            link: row.get(6)?,
            course_code: row.get(7)?,
            type_name: row.get(8)?,
            status_name: row.get(9)?,
            priority: row.get(10)?,
            completed: row.get(11)?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields() -> AssignmentFields {
        AssignmentFields {
            title: "Essay".into(),
            course_code: "HIST2".into(),
            ..Default::default()
        }
    }

    #[test]
    fn records_are_scoped_by_user() {
        let db = RemoteDb::open_in_memory().unwrap();
        let a = db
            .insert_assignment(UserId(1), Some(4), "page-1", &fields())
            .unwrap();
        db.insert_assignment(UserId(2), None, "page-2", &fields())
            .unwrap();

        let mine = db.list_assignments(UserId(1)).unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].local_id, Some(4));
        assert!(db.owned(Table::Assignments, UserId(2), a.id).is_err());
    }

    #[test]
    fn soft_delete_hides_record() {
        let db = RemoteDb::open_in_memory().unwrap();
        let a = db
            .insert_assignment(UserId(1), None, "page-1", &fields())
            .unwrap();

        assert!(db.soft_delete(Table::Assignments, a.id).unwrap());
        assert!(!db.soft_delete(Table::Assignments, a.id).unwrap());
        assert!(db.list_assignments(UserId(1)).unwrap().is_empty());
        assert!(db
            .by_external_id(Table::Assignments, "page-1")
            .unwrap()
            .is_none());
    }

    #[test]
    fn update_column_normalizes_input() {
        let db = RemoteDb::open_in_memory().unwrap();
        let a = db
            .insert_assignment(UserId(1), None, "page-1", &fields())
            .unwrap();

        let (column, value) = assignment_column("deadline", &json!("2024-06-01")).unwrap();
        db.update_column(Table::Assignments, a.id, column, &value)
            .unwrap();

        let a = db.assignment(a.id).unwrap();
        assert_eq!(a.fields.deadline, parse_timestamp("2024-06-01"));
        assert!(assignment_column("user_id", &json!(2)).is_err());
    }

    #[test]
    fn course_assignments_are_deleted_together() {
        let db = RemoteDb::open_in_memory().unwrap();
        let a = db
            .insert_assignment(UserId(1), None, "page-1", &fields())
            .unwrap();
        db.insert_assignment(UserId(2), None, "page-2", &fields())
            .unwrap();

        let ids = db.soft_delete_course_assignments(UserId(1), "HIST2").unwrap();
        assert_eq!(ids, vec![a.id]);
        assert!(db.list_assignments(UserId(1)).unwrap().is_empty());
        assert_eq!(db.list_assignments(UserId(2)).unwrap().len(), 1);
    }

    #[test]
    fn course_codes_are_reusable_after_delete() {
        let db = RemoteDb::open_in_memory().unwrap();
        let course = CourseFields {
            code: "CS101".into(),
            name: "Intro".into(),
            ..Default::default()
        };
        let first = db.insert_course(UserId(1), None, "c-1", &course).unwrap();
        assert!(db.insert_course(UserId(1), None, "c-2", &course).is_err());

        db.soft_delete(Table::Courses, first.id).unwrap();
        assert!(db.insert_course(UserId(1), None, "c-3", &course).is_ok());
    }
}
