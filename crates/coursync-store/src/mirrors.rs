//! Server ids of mirrored documents.
//!
//! A new local version is mirrored onto the server chain of its root, so
//! the root's server id has to be remembered once its upload succeeds.

use chrono::Utc;
use coursync_shared::types::format_timestamp;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;

/// Remember that local document `document_id` is `remote_id` on the server.
pub fn record(conn: &Connection, document_id: i64, remote_id: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO document_mirrors (document_id, remote_id, mirrored_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(document_id) DO UPDATE SET remote_id = excluded.remote_id,
                                                mirrored_at = excluded.mirrored_at",
        params![document_id, remote_id, format_timestamp(&Utc::now())],
    )?;
    Ok(())
}

pub fn remote_id(conn: &Connection, document_id: i64) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT remote_id FROM document_mirrors WHERE document_id = ?1",
            params![document_id],
            |row| row.get(0),
        )
        .optional()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewDocument;
    use crate::testutil::seed_assignment;
    use crate::{documents, Database};
    use coursync_shared::types::{DocumentType, UserId};

    fn insert_doc(db: &Database, assignment_id: i64, path: &str) -> i64 {
        documents::insert(
            db.conn(),
            &NewDocument {
                user_id: UserId(1),
                assignment_id,
                doc_type: DocumentType::Submission,
                file_name: "report.pdf".into(),
                file_path: path.into(),
                file_size: 5,
                mime_type: "application/pdf".into(),
                content_hash: "00".into(),
                version: 1,
                parent_id: None,
            },
        )
        .unwrap()
        .id
    }

    #[test]
    fn record_then_overwrite() {
        let db = Database::open_in_memory().unwrap();
        let assignment = seed_assignment(&db, "CS101", "Lab");
        let id = insert_doc(&db, assignment.id, "a/report.pdf");

        assert_eq!(remote_id(db.conn(), id).unwrap(), None);
        record(db.conn(), id, 7).unwrap();
        record(db.conn(), id, 8).unwrap();
        assert_eq!(remote_id(db.conn(), id).unwrap(), Some(8));
    }

    #[test]
    fn deleting_the_document_drops_its_mirror() {
        let db = Database::open_in_memory().unwrap();
        let assignment = seed_assignment(&db, "CS101", "Lab");
        let id = insert_doc(&db, assignment.id, "a/report.pdf");
        record(db.conn(), id, 7).unwrap();

        documents::delete(db.conn(), id).unwrap();
        assert_eq!(remote_id(db.conn(), id).unwrap(), None);
    }
}
