use coursync_shared::protocol::QuotaInfo;
use coursync_store::StorageQuota;

use crate::error::Result;
use crate::state::{lock_store, Session};

/// Storage usage of the session user, recomputed when the cache is stale.
pub fn quota(session: &Session) -> Result<QuotaInfo> {
    let manager = session.documents()?;
    let db = lock_store(session.store()?)?;
    Ok(manager.quota(db.conn(), session.user_id())?)
}

pub fn recompute(session: &Session) -> Result<StorageQuota> {
    let manager = session.documents()?;
    let db = lock_store(session.store()?)?;
    Ok(manager.recompute_quota(db.conn(), session.user_id())?)
}

/// Remove payload files no document row references.
pub fn sweep_orphans(session: &Session) -> Result<usize> {
    let manager = session.documents()?;
    let db = lock_store(session.store()?)?;
    Ok(manager.sweep_orphans(db.conn())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testutil::{session, FakeApi};
    use crate::commands::{assignments, courses, documents};
    use coursync_shared::types::{AssignmentFields, CourseFields, DocumentType};

    #[tokio::test]
    async fn quota_tracks_uploads_and_sweep_keeps_referenced_files() {
        let (_dir, session) = session(FakeApi::new());
        courses::create(
            &session,
            CourseFields {
                code: "CS101".into(),
                name: "Intro".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let assignment = assignments::create(
            &session,
            AssignmentFields {
                title: "Lab".into(),
                course_code: "CS101".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(quota(&session).unwrap().total_size, 0);
        documents::upload(&session, assignment.id, DocumentType::Support, "a.txt", b"12345")
            .await
            .unwrap();

        let fresh = recompute(&session).unwrap();
        assert_eq!(fresh.total_size, 5);
        assert_eq!(fresh.document_count, 1);

        let stray = session
            .documents()
            .unwrap()
            .root()
            .join("user_1")
            .join("stray.txt");
        std::fs::write(&stray, b"x").unwrap();

        assert_eq!(sweep_orphans(&session).unwrap(), 1);
        assert!(!stray.exists());
        assert_eq!(documents::list_all(&session, assignment.id).unwrap().len(), 1);
    }
}
