use rusqlite::Connection;

const UP_SQL: &str = r#"
-- Column edits made while a record is still pending, replayed after the
-- create round trip.
CREATE TABLE IF NOT EXISTS pending_updates (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    entity      TEXT NOT NULL CHECK (entity IN ('assignment', 'course')),
    local_id    INTEGER NOT NULL,
    column_name TEXT NOT NULL,
    value_json  TEXT NOT NULL,
    queued_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_pending_updates_record ON pending_updates(entity, local_id, id);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
