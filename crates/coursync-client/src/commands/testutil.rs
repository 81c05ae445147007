//! In-process remote used by the command tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use coursync_shared::protocol::{
    AssignmentRecord, CourseRecord, DocumentInfo, FieldUpdate, NewAssignment, NewCourse,
};
use coursync_shared::types::{DocumentType, UserId};
use coursync_store::{Database, DocumentManager, StorageLimits};
use tempfile::TempDir;

use crate::api::RemoteApi;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::state::Session;

#[derive(Default)]
struct Remote {
    offline: bool,
    create_delay: Option<Duration>,
    next_id: i64,
    courses: Vec<CourseRecord>,
    assignments: Vec<AssignmentRecord>,
    updates: Vec<FieldUpdate>,
    deleted: Vec<i64>,
    documents: Vec<DocumentInfo>,
}

#[derive(Clone, Default)]
pub(crate) struct FakeApi {
    remote: Arc<Mutex<Remote>>,
}

impl FakeApi {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_offline(&self, offline: bool) {
        self.remote.lock().unwrap().offline = offline;
    }

    /// Hold every create call for `delay` before it reaches the remote.
    pub(crate) fn set_create_delay(&self, delay: Duration) {
        self.remote.lock().unwrap().create_delay = Some(delay);
    }

    pub(crate) fn courses(&self) -> Vec<CourseRecord> {
        self.remote.lock().unwrap().courses.clone()
    }

    pub(crate) fn assignments(&self) -> Vec<AssignmentRecord> {
        self.remote.lock().unwrap().assignments.clone()
    }

    pub(crate) fn updates(&self) -> Vec<FieldUpdate> {
        self.remote.lock().unwrap().updates.clone()
    }

    pub(crate) fn deleted(&self) -> Vec<i64> {
        self.remote.lock().unwrap().deleted.clone()
    }

    pub(crate) fn uploads(&self) -> Vec<(i64, String)> {
        self.remote
            .lock()
            .unwrap()
            .documents
            .iter()
            .map(|doc| (doc.assignment_id, doc.file_name.clone()))
            .collect()
    }

    pub(crate) fn documents(&self) -> Vec<DocumentInfo> {
        self.remote.lock().unwrap().documents.clone()
    }

    pub(crate) fn seed_course(&self, record: CourseRecord) {
        self.remote.lock().unwrap().courses.push(record);
    }

    pub(crate) fn seed_assignment(&self, record: AssignmentRecord) {
        self.remote.lock().unwrap().assignments.push(record);
    }

    async fn create_pause(&self) {
        let delay = self.remote.lock().unwrap().create_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn online(&self) -> Result<std::sync::MutexGuard<'_, Remote>> {
        let remote = self.remote.lock().unwrap();
        if remote.offline {
            return Err(ClientError::Status {
                status: 503,
                body: "offline".into(),
            });
        }
        Ok(remote)
    }
}

impl Remote {
    fn allocate(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[async_trait]
impl RemoteApi for FakeApi {
    async fn list_courses(&self) -> Result<Vec<CourseRecord>> {
        Ok(self.online()?.courses.clone())
    }

    async fn create_course(&self, course: &NewCourse) -> Result<CourseRecord> {
        self.create_pause().await;
        let mut remote = self.online()?;
        let id = remote.allocate();
        let record = CourseRecord {
            id,
            external_id: format!("page-course-{id}"),
            local_id: Some(course.local_id),
            fields: course.fields.clone(),
        };
        remote.courses.push(record.clone());
        Ok(record)
    }

    async fn update_course(&self, update: &FieldUpdate) -> Result<()> {
        self.online()?.updates.push(update.clone());
        Ok(())
    }

    async fn delete_course(&self, remote_id: i64) -> Result<()> {
        self.online()?.deleted.push(remote_id);
        Ok(())
    }

    async fn list_assignments(&self) -> Result<Vec<AssignmentRecord>> {
        Ok(self.online()?.assignments.clone())
    }

    async fn create_assignment(&self, assignment: &NewAssignment) -> Result<AssignmentRecord> {
        self.create_pause().await;
        let mut remote = self.online()?;
        let id = remote.allocate();
        let record = AssignmentRecord {
            id,
            external_id: format!("page-assignment-{id}"),
            local_id: Some(assignment.local_id),
            fields: assignment.fields.clone(),
        };
        remote.assignments.push(record.clone());
        Ok(record)
    }

    async fn update_assignment(&self, update: &FieldUpdate) -> Result<()> {
        self.online()?.updates.push(update.clone());
        Ok(())
    }

    async fn delete_assignment(&self, remote_id: i64) -> Result<()> {
        self.online()?.deleted.push(remote_id);
        Ok(())
    }

    async fn upload_document(
        &self,
        assignment_remote_id: i64,
        doc_type: DocumentType,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<DocumentInfo> {
        let mut remote = self.online()?;
        let id = remote.allocate();
        let info = DocumentInfo {
            id,
            assignment_id: assignment_remote_id,
            doc_type,
            file_name: file_name.to_string(),
            file_size: bytes.len() as u64,
            mime_type: "application/octet-stream".into(),
            version: 1,
            parent_id: None,
            content_hash: String::new(),
            created_at: Utc::now(),
        };
        remote.documents.push(info.clone());
        Ok(info)
    }

    async fn upload_version(
        &self,
        parent_remote_id: i64,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<DocumentInfo> {
        let mut remote = self.online()?;
        let Some(parent) = remote.documents.iter().find(|d| d.id == parent_remote_id).cloned()
        else {
            return Err(ClientError::Status {
                status: 404,
                body: "no such document".into(),
            });
        };
        let root = parent.parent_id.unwrap_or(parent.id);
        let version = remote
            .documents
            .iter()
            .filter(|d| d.id == root || d.parent_id == Some(root))
            .map(|d| d.version)
            .max()
            .unwrap_or(0)
            + 1;
        let id = remote.allocate();
        let info = DocumentInfo {
            id,
            file_name: file_name.to_string(),
            file_size: bytes.len() as u64,
            version,
            parent_id: Some(root),
            created_at: Utc::now(),
            ..parent
        };
        remote.documents.push(info.clone());
        Ok(info)
    }
}

/// A session over an in-memory store, a temporary document root and `api`.
pub(crate) fn session(api: FakeApi) -> (TempDir, Session) {
    let dir = TempDir::new().unwrap();
    let documents = DocumentManager::new(dir.path().join("documents"), StorageLimits::default())
        .unwrap();
    let config = ClientConfig {
        push_enabled: false,
        ..Default::default()
    };
    let session = Session::with_parts(
        config,
        UserId(1),
        Some(Database::open_in_memory().unwrap()),
        Some(documents),
        Arc::new(api),
    );
    (dir, session)
}
