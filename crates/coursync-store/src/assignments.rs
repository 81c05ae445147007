use chrono::Utc;
use coursync_shared::protocol::AssignmentRecord;
use coursync_shared::types::{format_timestamp, AssignmentField, AssignmentFields, SyncStatus};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::courses;
use crate::error::{Result, StoreError};
use crate::models::{Assignment, SyncState};
use crate::rows;

const COLUMNS: &str = "id, course_id, title, todo, deadline, link, course_code, type_name,
     status_name, priority, completed, sync_status, remote_id, external_id, updated_at";

/// Resolve the local course an assignment belongs to.
fn course_id_for(conn: &Connection, course_code: &str) -> Result<i64> {
    courses::find_by_code(conn, course_code)?
        .map(|c| c.id)
        .ok_or_else(|| StoreError::UnknownCourse(course_code.to_string()))
}

/// Insert a locally created assignment. Fails with
/// [`StoreError::UnknownCourse`] when its course code has no local course.
pub fn insert_pending(conn: &Connection, fields: &AssignmentFields) -> Result<Assignment> {
    let course_id = course_id_for(conn, &fields.course_code)?;
    insert(conn, course_id, fields, &SyncState::Pending)
}

pub fn insert_synced(conn: &Connection, record: &AssignmentRecord) -> Result<Assignment> {
    let course_id = course_id_for(conn, &record.fields.course_code)?;
    insert(
        conn,
        course_id,
        &record.fields,
        &SyncState::Synced {
            remote_id: record.id,
            external_id: record.external_id.clone(),
        },
    )
}

fn insert(
    conn: &Connection,
    course_id: i64,
    f: &AssignmentFields,
    sync: &SyncState,
) -> Result<Assignment> {
    conn.execute(
        "INSERT INTO assignments (course_id, title, todo, deadline, link, course_code, type_name,
                                  status_name, priority, completed, sync_status, remote_id,
                                  external_id, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            course_id,
            f.title,
            f.todo,
            f.deadline.as_ref().map(format_timestamp),
            f.link,
            f.course_code,
            f.type_name,
            f.status_name,
            f.priority,
            f.completed,
            sync.status().as_str(),
            sync.remote_id(),
            sync.external_id(),
            format_timestamp(&Utc::now()),
        ],
    )?;
    get(conn, conn.last_insert_rowid())
}

pub fn get(conn: &Connection, id: i64) -> Result<Assignment> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM assignments WHERE id = ?1"),
        params![id],
        row_to_assignment,
    )
    .map_err(StoreError::from_query)
}

pub fn find_by_external_id(conn: &Connection, external_id: &str) -> Result<Option<Assignment>> {
    Ok(conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM assignments WHERE external_id = ?1"),
            params![external_id],
            row_to_assignment,
        )
        .optional()?)
}

pub fn find_by_remote_id(conn: &Connection, remote_id: i64) -> Result<Option<Assignment>> {
    Ok(conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM assignments WHERE remote_id = ?1"),
            params![remote_id],
            row_to_assignment,
        )
        .optional()?)
}

/// All assignments, soonest deadline first. Undated ones sort last.
pub fn list(conn: &Connection) -> Result<Vec<Assignment>> {
    query_list(
        conn,
        &format!(
            "SELECT {COLUMNS} FROM assignments
             ORDER BY deadline IS NULL, deadline, id"
        ),
        params![],
    )
}

pub fn list_for_course(conn: &Connection, course_id: i64) -> Result<Vec<Assignment>> {
    query_list(
        conn,
        &format!(
            "SELECT {COLUMNS} FROM assignments WHERE course_id = ?1
             ORDER BY deadline IS NULL, deadline, id"
        ),
        params![course_id],
    )
}

pub fn list_pending(conn: &Connection) -> Result<Vec<Assignment>> {
    query_list(
        conn,
        &format!("SELECT {COLUMNS} FROM assignments WHERE sync_status = ?1 ORDER BY id"),
        params![SyncStatus::Pending.as_str()],
    )
}

fn query_list(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<Assignment>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, row_to_assignment)?;

    let mut assignments = Vec::new();
    for row in rows {
        assignments.push(row?);
    }
    Ok(assignments)
}

/// Record the ids returned by the create round trip.
///
/// Only a pending row can be marked; a synced one yields
/// [`StoreError::AlreadySynced`] and is left untouched. A push notification
/// for the same external id can land before the round trip finishes and
/// insert its own synced copy; that copy is removed first so the locally
/// created row keeps its identity.
pub fn mark_synced(conn: &Connection, id: i64, remote_id: i64, external_id: &str) -> Result<()> {
    rows::ensure_pending(conn, "assignments", id)?;

    let removed = conn.execute(
        "DELETE FROM assignments WHERE id != ?1 AND (external_id = ?2 OR remote_id = ?3)",
        params![id, external_id, remote_id],
    )?;
    if removed > 0 {
        tracing::debug!(id, external_id, removed, "dropped pushed duplicate assignment");
    }

    let affected = conn.execute(
        "UPDATE assignments SET sync_status = ?1, remote_id = ?2, external_id = ?3, updated_at = ?4
         WHERE id = ?5 AND sync_status = ?6",
        params![
            SyncStatus::Synced.as_str(),
            remote_id,
            external_id,
            format_timestamp(&Utc::now()),
            id,
            SyncStatus::Pending.as_str(),
        ],
    )?;
    if affected == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

/// Last-writer-wins overwrite with a remote snapshot. The row ends up synced.
pub fn overwrite(conn: &Connection, id: i64, record: &AssignmentRecord) -> Result<()> {
    let f = &record.fields;
    let course_id = course_id_for(conn, &f.course_code)?;
    let affected = conn.execute(
        "UPDATE assignments SET course_id = ?1, title = ?2, todo = ?3, deadline = ?4, link = ?5,
                course_code = ?6, type_name = ?7, status_name = ?8, priority = ?9,
                completed = ?10, sync_status = ?11, remote_id = ?12, external_id = ?13,
                updated_at = ?14
         WHERE id = ?15",
        params![
            course_id,
            f.title,
            f.todo,
            f.deadline.as_ref().map(format_timestamp),
            f.link,
            f.course_code,
            f.type_name,
            f.status_name,
            f.priority,
            f.completed,
            SyncStatus::Synced.as_str(),
            record.id,
            record.external_id,
            format_timestamp(&Utc::now()),
            id,
        ],
    )?;
    if affected == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

/// Set one column. The value must already be normalized for `field`.
/// Moving an assignment to another course code re-links it to that course.
pub fn update_field(
    conn: &Connection,
    id: i64,
    field: AssignmentField,
    value: &Value,
) -> Result<()> {
    if field == AssignmentField::CourseCode {
        let code = value.as_str().unwrap_or_default();
        let course_id = course_id_for(conn, code)?;
        conn.execute(
            "UPDATE assignments SET course_id = ?1 WHERE id = ?2",
            params![course_id, id],
        )?;
    }

    let sql = format!(
        "UPDATE assignments SET {} = ?1, updated_at = ?2 WHERE id = ?3",
        field.column()
    );
    let affected = conn.execute(
        &sql,
        params![rows::json_to_sql(value), format_timestamp(&Utc::now()), id],
    )?;
    if affected == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

pub fn delete(conn: &Connection, id: i64) -> Result<bool> {
    let affected = conn.execute("DELETE FROM assignments WHERE id = ?1", params![id])?;
    Ok(affected > 0)
}

fn row_to_assignment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Assignment> {
    let deadline: Option<String> = row.get(4)?;
    let status: String = row.get(11)?;
    let sync = rows::sync_state(11, &status, row.get(12)?, row.get(13)?)?;
    let updated_at: String = row.get(14)?;

    Ok(Assignment {
        id: row.get(0)?,
        course_id: row.get(1)?,
        fields: AssignmentFields {
            title: row.get(2)?,
            todo: row.get(3)?,
            deadline: rows::optional_timestamp(4, deadline)?,
            link: row.get(5)?,
            course_code: row.get(6)?,
            type_name: row.get(7)?,
            status_name: row.get(8)?,
            priority: row.get(9)?,
            completed: row.get(10)?,
        },
        sync,
        updated_at: rows::timestamp(14, &updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{assignment_fields, course_fields};
    use crate::Database;
    use coursync_shared::types::parse_timestamp;
    use serde_json::json;

    fn db_with_course(code: &str) -> Database {
        let db = Database::open_in_memory().unwrap();
        courses::insert_pending(db.conn(), &course_fields(code)).unwrap();
        db
    }

    #[test]
    fn insert_requires_known_course() {
        let db = Database::open_in_memory().unwrap();
        let err = insert_pending(db.conn(), &assignment_fields("Lab", "NOPE")).unwrap_err();
        assert!(matches!(err, StoreError::UnknownCourse(code) if code == "NOPE"));
    }

    #[test]
    fn pending_then_synced() {
        let db = db_with_course("CS101");
        let a = insert_pending(db.conn(), &assignment_fields("Lab 1", "CS101")).unwrap();
        assert_eq!(a.sync, SyncState::Pending);

        mark_synced(db.conn(), a.id, 11, "page-11").unwrap();
        let a = get(db.conn(), a.id).unwrap();
        assert_eq!(a.sync.remote_id(), Some(11));
        assert_eq!(a.sync.external_id(), Some("page-11"));
    }

    #[test]
    fn mark_synced_drops_pushed_duplicate() {
        let db = db_with_course("CS101");
        let local = insert_pending(db.conn(), &assignment_fields("Lab 1", "CS101")).unwrap();
        let pushed = insert_synced(
            db.conn(),
            &AssignmentRecord {
                id: 11,
                external_id: "page-11".into(),
                local_id: Some(local.id),
                fields: assignment_fields("Lab 1", "CS101"),
            },
        )
        .unwrap();

        mark_synced(db.conn(), local.id, 11, "page-11").unwrap();

        assert!(matches!(get(db.conn(), pushed.id), Err(StoreError::NotFound)));
        assert_eq!(list(db.conn()).unwrap().len(), 1);
        assert_eq!(
            find_by_external_id(db.conn(), "page-11").unwrap().map(|a| a.id),
            Some(local.id)
        );
    }

    #[test]
    fn second_mark_synced_keeps_first_ids() {
        let db = db_with_course("CS101");
        let a = insert_pending(db.conn(), &assignment_fields("Lab 1", "CS101")).unwrap();

        mark_synced(db.conn(), a.id, 11, "page-11").unwrap();
        let err = mark_synced(db.conn(), a.id, 12, "page-12").unwrap_err();
        assert!(matches!(err, StoreError::AlreadySynced { id, .. } if id == a.id));

        let a = get(db.conn(), a.id).unwrap();
        assert_eq!(a.sync.remote_id(), Some(11));
        assert_eq!(a.sync.external_id(), Some("page-11"));
    }

    #[test]
    fn mark_synced_of_missing_row_is_not_found() {
        let db = db_with_course("CS101");
        let err = mark_synced(db.conn(), 99, 11, "page-11").unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[test]
    fn deadline_update_round_trips() {
        let db = db_with_course("CS101");
        let a = insert_pending(db.conn(), &assignment_fields("Lab 1", "CS101")).unwrap();

        let value = AssignmentField::Deadline.normalize(&json!("2024-06-01")).unwrap();
        update_field(db.conn(), a.id, AssignmentField::Deadline, &value).unwrap();

        let a = get(db.conn(), a.id).unwrap();
        assert_eq!(a.fields.deadline, parse_timestamp("2024-06-01"));
        assert_eq!(a.fields.get(AssignmentField::Deadline), value);
    }

    #[test]
    fn course_code_update_relinks() {
        let db = db_with_course("CS101");
        let other = courses::insert_pending(db.conn(), &course_fields("MA201")).unwrap();
        let a = insert_pending(db.conn(), &assignment_fields("Lab 1", "CS101")).unwrap();

        update_field(db.conn(), a.id, AssignmentField::CourseCode, &json!("MA201")).unwrap();
        assert_eq!(get(db.conn(), a.id).unwrap().course_id, other.id);

        let err = update_field(db.conn(), a.id, AssignmentField::CourseCode, &json!("ZZ9"));
        assert!(matches!(err, Err(StoreError::UnknownCourse(_))));
    }

    #[test]
    fn list_orders_by_deadline() {
        let db = db_with_course("CS101");
        let mut late = assignment_fields("Late", "CS101");
        late.deadline = parse_timestamp("2024-09-01");
        let mut early = assignment_fields("Early", "CS101");
        early.deadline = parse_timestamp("2024-03-01");
        insert_pending(db.conn(), &assignment_fields("Undated", "CS101")).unwrap();
        insert_pending(db.conn(), &late).unwrap();
        insert_pending(db.conn(), &early).unwrap();

        let titles: Vec<_> = list(db.conn())
            .unwrap()
            .into_iter()
            .map(|a| a.fields.title)
            .collect();
        assert_eq!(titles, ["Early", "Late", "Undated"]);
    }
}
