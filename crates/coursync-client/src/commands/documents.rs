//! Document commands. Payloads are stored locally first; uploads against a
//! synced assignment are mirrored to the server on a best-effort basis.

use coursync_shared::types::DocumentType;
use coursync_store::{assignments, documents, mirrors, Document, FilePayload, UploadRequest};
use tracing::{info, warn};

use crate::error::Result;
use crate::state::{lock_store, Session};

pub async fn upload(
    session: &Session,
    assignment_id: i64,
    doc_type: DocumentType,
    file_name: &str,
    bytes: &[u8],
) -> Result<Document> {
    let manager = session.documents()?;
    let (document, remote_id) = {
        let db = lock_store(session.store()?)?;
        let assignment = assignments::get(db.conn(), assignment_id)?;
        let document = manager.upload(
            db.conn(),
            &UploadRequest {
                user_id: session.user_id(),
                assignment_id,
                doc_type,
                file: FilePayload { file_name, bytes },
            },
        )?;
        (document, assignment.sync.remote_id())
    };

    if let Some(assignment_remote_id) = remote_id {
        mirror(session, &document, Target::Root { assignment_remote_id }, bytes).await;
    }
    Ok(document)
}

/// Append a version to the chain `parent_id` belongs to. The version is
/// mirrored onto the server copy of the same chain, which needs the chain
/// root to have been mirrored first.
pub async fn new_version(
    session: &Session,
    parent_id: i64,
    file_name: &str,
    bytes: &[u8],
) -> Result<Document> {
    let manager = session.documents()?;
    let (document, target) = {
        let db = lock_store(session.store()?)?;
        let document = manager.new_version(
            db.conn(),
            session.user_id(),
            parent_id,
            &FilePayload { file_name, bytes },
        )?;
        let synced = assignments::get(db.conn(), document.assignment_id)?
            .sync
            .is_synced();
        let root_id = document.root_id();
        let target = match mirrors::remote_id(db.conn(), root_id)? {
            Some(parent_remote_id) if synced => Some(Target::Version { parent_remote_id }),
            None if synced => {
                warn!(
                    id = document.id,
                    root_id,
                    "chain root never reached the server, version not mirrored"
                );
                None
            }
            _ => None,
        };
        (document, target)
    };

    if let Some(target) = target {
        mirror(session, &document, target, bytes).await;
    }
    Ok(document)
}

/// Where on the server a local document lands.
enum Target {
    /// A new chain under the remote copy of the assignment.
    Root { assignment_remote_id: i64 },
    /// The next version of an existing server chain.
    Version { parent_remote_id: i64 },
}

async fn mirror(session: &Session, document: &Document, target: Target, bytes: &[u8]) {
    let api = session.api();
    let result = match target {
        Target::Root {
            assignment_remote_id,
        } => {
            api.upload_document(
                assignment_remote_id,
                document.doc_type,
                &document.file_name,
                bytes.to_vec(),
            )
            .await
        }
        Target::Version { parent_remote_id } => {
            api.upload_version(parent_remote_id, &document.file_name, bytes.to_vec())
                .await
        }
    };
    let info = match result {
        Ok(info) => info,
        Err(e) => {
            warn!(id = document.id, error = %e, "document not mirrored to server");
            return;
        }
    };
    info!(
        id = document.id,
        remote_id = info.id,
        version = info.version,
        "document mirrored"
    );

    if let Err(e) = remember_mirror(session, document.id, info.id) {
        warn!(id = document.id, error = %e, "mirrored document id not recorded");
    }
}

fn remember_mirror(session: &Session, document_id: i64, remote_id: i64) -> Result<()> {
    let db = lock_store(session.store()?)?;
    Ok(mirrors::record(db.conn(), document_id, remote_id)?)
}

/// Delete a document. Deleting a chain root removes every version.
pub fn delete(session: &Session, id: i64) -> Result<Vec<Document>> {
    let manager = session.documents()?;
    let db = lock_store(session.store()?)?;
    Ok(manager.delete(db.conn(), session.user_id(), id)?)
}

pub fn get(session: &Session, id: i64) -> Result<Document> {
    let db = lock_store(session.store()?)?;
    Ok(documents::get(db.conn(), id)?)
}

/// Payload bytes of one document.
pub fn read(session: &Session, id: i64) -> Result<Vec<u8>> {
    let manager = session.documents()?;
    let document = get(session, id)?;
    Ok(manager.read(&document)?)
}

/// Newest version of every chain of an assignment.
pub fn list_latest(
    session: &Session,
    assignment_id: i64,
    doc_type: Option<DocumentType>,
) -> Result<Vec<Document>> {
    let db = lock_store(session.store()?)?;
    Ok(documents::list_latest(db.conn(), assignment_id, doc_type)?)
}

pub fn list_support(session: &Session, assignment_id: i64) -> Result<Vec<Document>> {
    list_latest(session, assignment_id, Some(DocumentType::Support))
}

pub fn list_submissions(session: &Session, assignment_id: i64) -> Result<Vec<Document>> {
    list_latest(session, assignment_id, Some(DocumentType::Submission))
}

/// Every version of every chain of an assignment.
pub fn list_all(session: &Session, assignment_id: i64) -> Result<Vec<Document>> {
    let db = lock_store(session.store()?)?;
    Ok(documents::list_for_assignment(db.conn(), assignment_id)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testutil::{session, FakeApi};
    use crate::commands::{assignments as assignment_cmds, courses};
    use crate::error::ClientError;
    use coursync_shared::types::{AssignmentFields, CourseFields};
    use coursync_store::StoreError;

    async fn seed(session: &Session) -> i64 {
        courses::create(
            session,
            CourseFields {
                code: "CS101".into(),
                name: "Intro".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assignment_cmds::create(
            session,
            AssignmentFields {
                title: "Lab 1".into(),
                course_code: "CS101".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .id
    }

    #[tokio::test]
    async fn versions_share_a_chain_and_latest_wins() {
        let api = FakeApi::new();
        let (_dir, session) = session(api.clone());
        let assignment_id = seed(&session).await;

        let v1 = upload(&session, assignment_id, DocumentType::Submission, "report.pdf", b"one")
            .await
            .unwrap();
        let v2 = new_version(&session, v1.id, "report.pdf", b"two")
            .await
            .unwrap();
        assert_eq!(v2.version, 2);
        assert_eq!(v2.parent_id, Some(v1.id));
        let v3 = new_version(&session, v2.id, "report.pdf", b"three")
            .await
            .unwrap();
        assert_eq!(v3.version, 3);
        assert_eq!(v3.parent_id, Some(v1.id));

        let latest = list_submissions(&session, assignment_id).unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].id, v3.id);
        assert!(list_support(&session, assignment_id).unwrap().is_empty());
        assert_eq!(read(&session, v2.id).unwrap(), b"two");
    }

    #[tokio::test]
    async fn versions_extend_one_server_chain() {
        let api = FakeApi::new();
        let (_dir, session) = session(api.clone());
        let assignment_id = seed(&session).await;

        let v1 = upload(&session, assignment_id, DocumentType::Submission, "report.pdf", b"one")
            .await
            .unwrap();
        let v2 = new_version(&session, v1.id, "report.pdf", b"two")
            .await
            .unwrap();
        new_version(&session, v2.id, "report.pdf", b"three")
            .await
            .unwrap();

        let remote = api.documents();
        let versions: Vec<_> = remote.iter().map(|d| d.version).collect();
        assert_eq!(versions, [1, 2, 3]);
        let root = remote[0].id;
        assert_eq!(remote[0].parent_id, None);
        assert!(remote[1..].iter().all(|d| d.parent_id == Some(root)));
    }

    #[tokio::test]
    async fn version_of_unmirrored_root_stays_local() {
        let api = FakeApi::new();
        let (_dir, session) = session(api.clone());
        let assignment_id = seed(&session).await;

        api.set_offline(true);
        let v1 = upload(&session, assignment_id, DocumentType::Support, "notes.pdf", b"a")
            .await
            .unwrap();
        api.set_offline(false);

        let v2 = new_version(&session, v1.id, "notes.pdf", b"b").await.unwrap();
        assert_eq!(v2.version, 2);
        assert!(api.documents().is_empty());
    }

    #[tokio::test]
    async fn mirror_failure_keeps_local_copy() {
        let api = FakeApi::new();
        let (_dir, session) = session(api.clone());
        let assignment_id = seed(&session).await;

        api.set_offline(true);
        let doc = upload(&session, assignment_id, DocumentType::Support, "notes.pdf", b"x")
            .await
            .unwrap();
        assert_eq!(get(&session, doc.id).unwrap().file_size, 1);
        assert!(api.uploads().is_empty());
    }

    #[tokio::test]
    async fn deleting_root_removes_the_chain() {
        let (_dir, session) = session(FakeApi::new());
        let assignment_id = seed(&session).await;

        let v1 = upload(&session, assignment_id, DocumentType::Support, "notes.pdf", b"a")
            .await
            .unwrap();
        new_version(&session, v1.id, "notes.pdf", b"b").await.unwrap();

        let removed = delete(&session, v1.id).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(list_all(&session, assignment_id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn upload_to_missing_assignment_fails() {
        let (_dir, session) = session(FakeApi::new());
        let err = upload(&session, 99, DocumentType::Support, "notes.pdf", b"a")
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Store(StoreError::NotFound)));
    }
}
