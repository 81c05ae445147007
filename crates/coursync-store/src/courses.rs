use chrono::Utc;
use coursync_shared::protocol::CourseRecord;
use coursync_shared::types::{format_timestamp, CourseField, CourseFields, SyncStatus};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::models::{Course, SyncState};
use crate::rows;

const COLUMNS: &str = "id, code, name, duration, room_number, color, start_date, end_date, credits,
     schedule, semester, instructor, instructor_email, sync_status, remote_id, external_id,
     updated_at";

/// Insert a locally created course. It starts out pending.
pub fn insert_pending(conn: &Connection, fields: &CourseFields) -> Result<Course> {
    insert(conn, fields, &SyncState::Pending)
}

/// Insert a course that already exists remotely.
pub fn insert_synced(conn: &Connection, record: &CourseRecord) -> Result<Course> {
    insert(
        conn,
        &record.fields,
        &SyncState::Synced {
            remote_id: record.id,
            external_id: record.external_id.clone(),
        },
    )
}

fn insert(conn: &Connection, fields: &CourseFields, sync: &SyncState) -> Result<Course> {
    conn.execute(
        "INSERT INTO courses (code, name, duration, room_number, color, start_date, end_date,
                              credits, schedule, semester, instructor, instructor_email,
                              sync_status, remote_id, external_id, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            fields.code,
            fields.name,
            fields.duration,
            fields.room_number,
            fields.color,
            fields.start_date,
            fields.end_date,
            fields.credits,
            fields.schedule,
            fields.semester,
            fields.instructor,
            fields.instructor_email,
            sync.status().as_str(),
            sync.remote_id(),
            sync.external_id(),
            format_timestamp(&Utc::now()),
        ],
    )?;
    get(conn, conn.last_insert_rowid())
}

pub fn get(conn: &Connection, id: i64) -> Result<Course> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM courses WHERE id = ?1"),
        params![id],
        row_to_course,
    )
    .map_err(StoreError::from_query)
}

pub fn find_by_code(conn: &Connection, code: &str) -> Result<Option<Course>> {
    Ok(conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM courses WHERE code = ?1"),
            params![code],
            row_to_course,
        )
        .optional()?)
}

pub fn find_by_external_id(conn: &Connection, external_id: &str) -> Result<Option<Course>> {
    Ok(conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM courses WHERE external_id = ?1"),
            params![external_id],
            row_to_course,
        )
        .optional()?)
}

pub fn list(conn: &Connection) -> Result<Vec<Course>> {
    let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM courses ORDER BY code"))?;
    let rows = stmt.query_map([], row_to_course)?;

    let mut courses = Vec::new();
    for row in rows {
        courses.push(row?);
    }
    Ok(courses)
}

pub fn list_pending(conn: &Connection) -> Result<Vec<Course>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM courses WHERE sync_status = ?1 ORDER BY id"
    ))?;
    let rows = stmt.query_map(params![SyncStatus::Pending.as_str()], row_to_course)?;

    let mut courses = Vec::new();
    for row in rows {
        courses.push(row?);
    }
    Ok(courses)
}

/// Record the ids returned by the create round trip. A course that is no
/// longer pending yields [`StoreError::AlreadySynced`].
pub fn mark_synced(conn: &Connection, id: i64, remote_id: i64, external_id: &str) -> Result<()> {
    rows::ensure_pending(conn, "courses", id)?;
    let affected = conn.execute(
        "UPDATE courses SET sync_status = ?1, remote_id = ?2, external_id = ?3, updated_at = ?4
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
pub fn overwrite(conn: &Connection, id: i64, record: &CourseRecord) -> Result<()> {
    let f = &record.fields;
    let affected = conn.execute(
        "UPDATE courses SET code = ?1, name = ?2, duration = ?3, room_number = ?4, color = ?5,
                start_date = ?6, end_date = ?7, credits = ?8, schedule = ?9, semester = ?10,
                instructor = ?11, instructor_email = ?12, sync_status = ?13, remote_id = ?14,
                external_id = ?15, updated_at = ?16
         WHERE id = ?17",
        params![
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
pub fn update_field(conn: &Connection, id: i64, field: CourseField, value: &Value) -> Result<()> {
    // The column name comes from the closed `CourseField` set.
    let sql = format!(
        "UPDATE courses SET {} = ?1, updated_at = ?2 WHERE id = ?3",
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
    let affected = conn.execute("DELETE FROM courses WHERE id = ?1", params![id])?;
    Ok(affected > 0)
}

fn row_to_course(row: &rusqlite::Row<'_>) -> rusqlite::Result<Course> {
    let status: String = row.get(13)?;
    let sync = rows::sync_state(13, &status, row.get(14)?, row.get(15)?)?;
    let updated_at: String = row.get(16)?;

    Ok(Course {
        id: row.get(0)?,
        fields: CourseFields {
            code: row.get(1)?,
            name: row.get(2)?,
            duration: row.get(3)?,
            room_number: row.get(4)?,
            color: row.get(5)?,
            start_date: row.get(6)?,
            end_date: row.get(7)?,
            credits: row.get(8)?,
            schedule: row.get(9)?,
            semester: row.get(10)?,
            instructor: row.get(11)?,
            instructor_email: row.get(12)?,
        },
        sync,
        updated_at: rows::timestamp(16, &updated_at)?,
    })
}
