//! v001 -- Initial schema creation.
//!
//! Creates the record tables `courses` and `assignments` plus the document
//! tables shared with the server (see [`crate::documents::SCHEMA_SQL`]).

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Courses
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS courses (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    code             TEXT NOT NULL UNIQUE,        -- natural key
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
    remote_id        INTEGER,
    external_id      TEXT UNIQUE,
    sync_status      TEXT NOT NULL DEFAULT 'pending'
                     CHECK (sync_status IN ('pending', 'synced')),
    updated_at       TEXT NOT NULL,               -- RFC-3339

    CHECK (
        (sync_status = 'synced'  AND remote_id IS NOT NULL AND external_id IS NOT NULL) OR
        (sync_status = 'pending' AND remote_id IS NULL     AND external_id IS NULL)
    )
);

-- ----------------------------------------------------------------
-- Assignments
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS assignments (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    course_id   INTEGER NOT NULL,
    title       TEXT NOT NULL,
    todo        TEXT,
    deadline    TEXT,                             -- RFC-3339, UTC
    link        TEXT,
    course_code TEXT NOT NULL,
    type_name   TEXT,
    status_name TEXT,
    priority    TEXT,
    completed   INTEGER NOT NULL DEFAULT 0,
    remote_id   INTEGER UNIQUE,
    external_id TEXT UNIQUE,                      -- natural key once synced
    sync_status TEXT NOT NULL DEFAULT 'pending'
                CHECK (sync_status IN ('pending', 'synced')),
    updated_at  TEXT NOT NULL,

    CHECK (
        (sync_status = 'synced'  AND remote_id IS NOT NULL AND external_id IS NOT NULL) OR
        (sync_status = 'pending' AND remote_id IS NULL     AND external_id IS NULL)
    ),
    FOREIGN KEY (course_id) REFERENCES courses(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_assignments_course ON assignments(course_id);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)?;
    conn.execute_batch(crate::documents::SCHEMA_SQL)
}
