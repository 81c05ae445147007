use rusqlite::Connection;

const UP_SQL: &str = r#"
-- Server-side id of each document that reached the server. Local only;
-- the server has no use for it.
CREATE TABLE IF NOT EXISTS document_mirrors (
    document_id INTEGER PRIMARY KEY NOT NULL,
    remote_id   INTEGER NOT NULL,
    mirrored_at TEXT NOT NULL,

    FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
