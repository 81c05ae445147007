//! Document metadata rows and version chains.
//!
//! The same tables back the local store and the server, so the schema is
//! exported as [`SCHEMA_SQL`]. Both sides name their assignment table
//! `assignments`.

use std::collections::HashSet;

use chrono::Utc;
use coursync_shared::types::{format_timestamp, DocumentType, UserId};
use rusqlite::types::Type;
use rusqlite::{params, Connection};

use crate::error::{Result, StoreError};
use crate::models::{Document, NewDocument};
use crate::rows;

pub const SCHEMA_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Documents
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS documents (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id        INTEGER NOT NULL,
    assignment_id  INTEGER NOT NULL,
    doc_type       TEXT NOT NULL CHECK (doc_type IN ('support', 'submission')),
    file_name      TEXT NOT NULL,
    file_path      TEXT NOT NULL UNIQUE,       -- relative to the document root
    file_size      INTEGER NOT NULL,
    mime_type      TEXT NOT NULL,
    content_hash   TEXT NOT NULL,              -- hex BLAKE3
    version        INTEGER NOT NULL DEFAULT 1,
    parent_id      INTEGER,                    -- chain root, NULL on the root
    has_local_file INTEGER NOT NULL DEFAULT 1,
    created_at     TEXT NOT NULL,

    UNIQUE (parent_id, version),
    FOREIGN KEY (assignment_id) REFERENCES assignments(id) ON DELETE CASCADE,
    FOREIGN KEY (parent_id) REFERENCES documents(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_documents_assignment ON documents(assignment_id);
CREATE INDEX IF NOT EXISTS idx_documents_user ON documents(user_id);

-- ----------------------------------------------------------------
-- Storage quota cache
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS storage_quota (
    user_id        INTEGER PRIMARY KEY NOT NULL,
    total_size     INTEGER NOT NULL,
    document_count INTEGER NOT NULL,
    calculated_at  TEXT NOT NULL
);
"#;

const COLUMNS: &str = "id, user_id, assignment_id, doc_type, file_name, file_path, file_size,
     mime_type, content_hash, version, parent_id, has_local_file, created_at";

pub fn insert(conn: &Connection, doc: &NewDocument) -> Result<Document> {
    conn.execute(
        "INSERT INTO documents (user_id, assignment_id, doc_type, file_name, file_path, file_size,
                                mime_type, content_hash, version, parent_id, has_local_file,
                                created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 1, ?11)",
        params![
            doc.user_id.0,
            doc.assignment_id,
            doc.doc_type.as_str(),
            doc.file_name,
            doc.file_path,
            doc.file_size as i64,
            doc.mime_type,
            doc.content_hash,
            doc.version,
            doc.parent_id,
            format_timestamp(&Utc::now()),
        ],
    )?;
    get(conn, conn.last_insert_rowid())
}

pub fn get(conn: &Connection, id: i64) -> Result<Document> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM documents WHERE id = ?1"),
        params![id],
        row_to_document,
    )
    .map_err(StoreError::from_query)
}

/// Every version of every document of an assignment, oldest first.
pub fn list_for_assignment(conn: &Connection, assignment_id: i64) -> Result<Vec<Document>> {
    query_list(
        conn,
        &format!(
            "SELECT {COLUMNS} FROM documents WHERE assignment_id = ?1
             ORDER BY COALESCE(parent_id, id), version"
        ),
        params![assignment_id],
    )
}

/// Newest version of each chain of an assignment, optionally filtered by type.
pub fn list_latest(
    conn: &Connection,
    assignment_id: i64,
    doc_type: Option<DocumentType>,
) -> Result<Vec<Document>> {
    query_list(
        conn,
        &format!(
            "SELECT {COLUMNS} FROM documents d
             WHERE d.assignment_id = ?1
               AND (?2 IS NULL OR d.doc_type = ?2)
               AND d.version = (
                   SELECT MAX(v.version) FROM documents v
                   WHERE COALESCE(v.parent_id, v.id) = COALESCE(d.parent_id, d.id)
               )
             ORDER BY d.created_at DESC, d.id DESC"
        ),
        params![assignment_id, doc_type.map(|t| t.as_str())],
    )
}

/// Root and all versions of a chain, by ascending version.
pub fn chain_members(conn: &Connection, root_id: i64) -> Result<Vec<Document>> {
    query_list(
        conn,
        &format!(
            "SELECT {COLUMNS} FROM documents WHERE id = ?1 OR parent_id = ?1 ORDER BY version"
        ),
        params![root_id],
    )
}

pub fn max_chain_version(conn: &Connection, root_id: i64) -> Result<i64> {
    let max: Option<i64> = conn.query_row(
        "SELECT MAX(version) FROM documents WHERE id = ?1 OR parent_id = ?1",
        params![root_id],
        |row| row.get(0),
    )?;
    max.ok_or(StoreError::NotFound)
}

/// Bytes held by an assignment's documents with a local payload.
pub fn assignment_usage(conn: &Connection, assignment_id: i64) -> Result<u64> {
    let total: i64 = conn.query_row(
        "SELECT COALESCE(SUM(file_size), 0) FROM documents
         WHERE assignment_id = ?1 AND has_local_file = 1",
        params![assignment_id],
        |row| row.get(0),
    )?;
    Ok(total.max(0) as u64)
}

/// Total bytes and document count of a user's local payloads.
pub fn user_usage(conn: &Connection, user_id: UserId) -> Result<(u64, u64)> {
    let (total, count): (i64, i64) = conn.query_row(
        "SELECT COALESCE(SUM(file_size), 0), COUNT(*) FROM documents
         WHERE user_id = ?1 AND has_local_file = 1",
        params![user_id.0],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok((total.max(0) as u64, count.max(0) as u64))
}

/// Delete a single row. Versions pointing at it go too (FK cascade).
pub fn delete(conn: &Connection, id: i64) -> Result<bool> {
    let affected = conn.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
    Ok(affected > 0)
}

/// Delete every document of the listed assignments and return their payload
/// paths so the caller can remove the files once the transaction commits.
pub fn delete_for_assignments(conn: &Connection, assignment_ids: &[i64]) -> Result<Vec<String>> {
    let mut paths = Vec::new();
    for assignment_id in assignment_ids {
        let mut stmt =
            conn.prepare("SELECT file_path FROM documents WHERE assignment_id = ?1")?;
        let rows = stmt.query_map(params![assignment_id], |row| row.get::<_, String>(0))?;
        for row in rows {
            paths.push(row?);
        }
        conn.execute(
            "DELETE FROM documents WHERE assignment_id = ?1",
            params![assignment_id],
        )?;
    }
    Ok(paths)
}

/// Distinct owners of the documents of the listed assignments.
pub fn owners_of(conn: &Connection, assignment_ids: &[i64]) -> Result<Vec<UserId>> {
    let mut owners = Vec::new();
    for assignment_id in assignment_ids {
        let mut stmt =
            conn.prepare("SELECT DISTINCT user_id FROM documents WHERE assignment_id = ?1")?;
        let rows = stmt.query_map(params![assignment_id], |row| row.get::<_, i64>(0))?;
        for row in rows {
            let user = UserId(row?);
            if !owners.contains(&user) {
                owners.push(user);
            }
        }
    }
    Ok(owners)
}

/// Every payload path referenced by a row.
pub fn all_file_paths(conn: &Connection) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT file_path FROM documents")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

    let mut paths = HashSet::new();
    for row in rows {
        paths.insert(row?);
    }
    Ok(paths)
}

fn query_list(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<Document>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, row_to_document)?;

    let mut docs = Vec::new();
    for row in rows {
        docs.push(row?);
    }
    Ok(docs)
}

fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
    let doc_type: String = row.get(3)?;
    let file_size: i64 = row.get(6)?;
    let created_at: String = row.get(12)?;

    Ok(Document {
        id: row.get(0)?,
        user_id: UserId(row.get(1)?),
        assignment_id: row.get(2)?,
        doc_type: doc_type
            .parse()
            .map_err(|e| rows::conversion_error(3, Type::Text, e))?,
        file_name: row.get(4)?,
        file_path: row.get(5)?,
        file_size: file_size.max(0) as u64,
        mime_type: row.get(7)?,
        content_hash: row.get(8)?,
        version: row.get(9)?,
        parent_id: row.get(10)?,
        has_local_file: row.get(11)?,
        created_at: rows::timestamp(12, &created_at)?,
    })
}
