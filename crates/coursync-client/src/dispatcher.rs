//! Applies push notifications to the local store.
//!
//! One dispatcher runs per session and consumes the push client's channels
//! in arrival order. Every notification is applied in its own transaction,
//! keyed by external id, and raises a user notification only when it
//! actually changed something, so a repeated delivery is harmless.

use std::sync::Arc;

use coursync_shared::protocol::{AssignmentRecord, CourseRecord, FieldUpdate, PushNotification};
use coursync_shared::types::{AssignmentField, ChangeKind, CourseField, Entity};
use coursync_store::{assignments, cascade, courses, Assignment, Course, DocumentManager, StoreError};
use rusqlite::Connection;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::events::{Notifier, UserNotification};
use crate::push::PushChannels;
use crate::state::{lock_store, SharedStore};

/// Result of applying one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Changed(UserNotification),
    /// The store already reflects the change.
    AlreadyApplied,
    /// The change cannot be applied here, e.g. it targets an unknown record.
    Skipped(String),
}

pub struct Dispatcher {
    store: SharedStore,
    documents: Option<Arc<DocumentManager>>,
    notifier: Arc<dyn Notifier>,
}

impl Dispatcher {
    pub fn new(
        store: SharedStore,
        documents: Option<Arc<DocumentManager>>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            documents,
            notifier,
        }
    }

    /// Consume `channels` until `stop` fires or the push client closes them.
    pub async fn run(self, channels: PushChannels, mut stop: watch::Receiver<bool>) {
        let PushChannels {
            mut events,
            mut errors,
        } = channels;
        let mut errors_open = true;

        info!("event dispatcher started");
        loop {
            tokio::select! {
                biased;

                _ = stop.changed() => break,

                event = events.recv() => match event {
                    Some(value) => {
                        self.handle(value);
                    }
                    None => break,
                },

                failure = errors.recv(), if errors_open => match failure {
                    Some(e) => warn!(error = %e, "push channel error"),
                    None => errors_open = false,
                },
            }
        }
        info!("event dispatcher stopped");
    }

    /// Decode and apply one raw payload. Failures are logged and the
    /// notification is dropped.
    pub fn handle(&self, value: Value) -> Option<UserNotification> {
        let notification: PushNotification = match serde_json::from_value(value) {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "dropping undecodable push notification");
                return None;
            }
        };

        match self.apply(&notification) {
            Ok(Outcome::Changed(user_notification)) => {
                self.notifier.notify(&user_notification);
                Some(user_notification)
            }
            Ok(Outcome::AlreadyApplied) => {
                debug!(
                    entity = notification.entity.as_str(),
                    id = %notification.id,
                    "push notification already applied"
                );
                None
            }
            Ok(Outcome::Skipped(reason)) => {
                info!(
                    entity = notification.entity.as_str(),
                    id = %notification.id,
                    reason = %reason,
                    "push notification skipped"
                );
                None
            }
            Err(e) => {
                error!(
                    entity = notification.entity.as_str(),
                    id = %notification.id,
                    error = %e,
                    "failed to apply push notification"
                );
                None
            }
        }
    }

    /// Apply one notification in a single transaction. Payload files of
    /// deleted documents are removed after the commit.
    pub fn apply(&self, n: &PushNotification) -> Result<Outcome> {
        let mut db = lock_store(&self.store)?;
        let tx = db.transaction()?;

        let (outcome, file_paths) = match (n.entity, n.kind) {
            (Entity::Assignment, ChangeKind::Create) => (assignment_created(&tx, n)?, Vec::new()),
            (Entity::Assignment, ChangeKind::Update) => (assignment_updated(&tx, n)?, Vec::new()),
            (Entity::Assignment, ChangeKind::Delete) => assignment_deleted(&tx, n)?,
            (Entity::Course, ChangeKind::Create) => (course_created(&tx, n)?, Vec::new()),
            (Entity::Course, ChangeKind::Update) => (course_updated(&tx, n)?, Vec::new()),
            (Entity::Course, ChangeKind::Delete) => course_deleted(&tx, n)?,
            (entity, kind) => (
                Outcome::Skipped(format!(
                    "unsupported {} {}",
                    entity.as_str(),
                    kind.past_tense()
                )),
                Vec::new(),
            ),
        };

        tx.commit()?;
        drop(db);

        if let Some(documents) = &self.documents {
            if !file_paths.is_empty() {
                documents.remove_files(file_paths.iter().map(String::as_str));
            }
        }
        Ok(outcome)
    }
}

fn assignment_notification(n: &PushNotification, a: &Assignment) -> UserNotification {
    UserNotification::new(
        &n.id,
        n.kind,
        format!("{}: {}", a.fields.course_code, a.fields.title),
        message_or(n, &a.fields.title),
    )
}

fn course_notification(n: &PushNotification, c: &Course) -> UserNotification {
    UserNotification::new(
        &n.id,
        n.kind,
        format!("{}: {}", c.fields.code, c.fields.name),
        message_or(n, &c.fields.name),
    )
}

fn message_or(n: &PushNotification, fallback: &str) -> String {
    if n.message.is_empty() {
        format!("{fallback} was {}", n.kind.past_tense())
    } else {
        n.message.clone()
    }
}

/// Remote id carried in the `data` of an update or delete.
fn remote_id_of(data: &Value) -> Option<i64> {
    match data.get("id")? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn find_assignment(conn: &Connection, n: &PushNotification) -> Result<Option<Assignment>> {
    if let Some(found) = assignments::find_by_external_id(conn, &n.id)? {
        return Ok(Some(found));
    }
    match remote_id_of(&n.data) {
        Some(remote_id) => Ok(assignments::find_by_remote_id(conn, remote_id)?),
        None => Ok(None),
    }
}

fn assignment_created(conn: &Connection, n: &PushNotification) -> Result<Outcome> {
    let record: AssignmentRecord = serde_json::from_value(n.data.clone())?;

    let existing = match assignments::find_by_external_id(conn, &record.external_id)? {
        Some(found) => Some(found),
        None => assignments::find_by_remote_id(conn, record.id)?,
    };

    let stored = match existing {
        Some(local)
            if local.fields == record.fields
                && local.sync.external_id() == Some(record.external_id.as_str()) =>
        {
            return Ok(Outcome::AlreadyApplied);
        }
        Some(local) => {
            assignments::overwrite(conn, local.id, &record)?;
            assignments::get(conn, local.id)?
        }
        None => match assignments::insert_synced(conn, &record) {
            Ok(a) => a,
            Err(StoreError::UnknownCourse(code)) => {
                return Ok(Outcome::Skipped(format!("unknown course {code}")));
            }
            Err(e) => return Err(e.into()),
        },
    };

    Ok(Outcome::Changed(assignment_notification(n, &stored)))
}

fn assignment_updated(conn: &Connection, n: &PushNotification) -> Result<Outcome> {
    let update: FieldUpdate = serde_json::from_value(n.data.clone())?;
    let field: AssignmentField = update.column.parse()?;
    let value = field.normalize(&update.value)?;

    let Some(local) = find_assignment(conn, n)? else {
        return Ok(Outcome::Skipped("unknown assignment".into()));
    };
    if local.fields.get(field) == value {
        return Ok(Outcome::AlreadyApplied);
    }

    match assignments::update_field(conn, local.id, field, &value) {
        Ok(()) => {}
        Err(StoreError::UnknownCourse(code)) => {
            return Ok(Outcome::Skipped(format!("unknown course {code}")));
        }
        Err(e) => return Err(e.into()),
    }
    let updated = assignments::get(conn, local.id)?;
    Ok(Outcome::Changed(assignment_notification(n, &updated)))
}

fn assignment_deleted(conn: &Connection, n: &PushNotification) -> Result<(Outcome, Vec<String>)> {
    let Some(local) = find_assignment(conn, n)? else {
        return Ok((Outcome::AlreadyApplied, Vec::new()));
    };
    let removed = cascade::delete_assignment(conn, local.id)?;
    Ok((
        Outcome::Changed(assignment_notification(n, &local)),
        removed.file_paths,
    ))
}

fn find_course(conn: &Connection, n: &PushNotification) -> Result<Option<Course>> {
    if let Some(found) = courses::find_by_external_id(conn, &n.id)? {
        return Ok(Some(found));
    }
    let Some(remote_id) = remote_id_of(&n.data) else {
        return Ok(None);
    };
    Ok(courses::list(conn)?
        .into_iter()
        .find(|c| c.sync.remote_id() == Some(remote_id)))
}

fn course_created(conn: &Connection, n: &PushNotification) -> Result<Outcome> {
    let record: CourseRecord = serde_json::from_value(n.data.clone())?;

    let existing = match courses::find_by_external_id(conn, &record.external_id)? {
        Some(found) => Some(found),
        None => courses::find_by_code(conn, &record.fields.code)?,
    };

    let stored = match existing {
        Some(local)
            if local.fields == record.fields
                && local.sync.external_id() == Some(record.external_id.as_str()) =>
        {
            return Ok(Outcome::AlreadyApplied);
        }
        Some(local) => {
            courses::overwrite(conn, local.id, &record)?;
            courses::get(conn, local.id)?
        }
        None => courses::insert_synced(conn, &record)?,
    };

    Ok(Outcome::Changed(course_notification(n, &stored)))
}

fn course_updated(conn: &Connection, n: &PushNotification) -> Result<Outcome> {
    let update: FieldUpdate = serde_json::from_value(n.data.clone())?;
    let field: CourseField = update.column.parse()?;
    let value = field.normalize(&update.value)?;

    let Some(local) = find_course(conn, n)? else {
        return Ok(Outcome::Skipped("unknown course".into()));
    };
    if local.fields.get(field) == value {
        return Ok(Outcome::AlreadyApplied);
    }

    courses::update_field(conn, local.id, field, &value)?;
    let updated = courses::get(conn, local.id)?;
    Ok(Outcome::Changed(course_notification(n, &updated)))
}

fn course_deleted(conn: &Connection, n: &PushNotification) -> Result<(Outcome, Vec<String>)> {
    let Some(local) = find_course(conn, n)? else {
        return Ok((Outcome::AlreadyApplied, Vec::new()));
    };
    let removed = cascade::delete_course(conn, local.id)?;
    debug!(
        course = %local.fields.code,
        assignments = removed.assignments,
        documents = removed.documents,
        "remote course deletion applied"
    );
    Ok((
        Outcome::Changed(course_notification(n, &local)),
        removed.file_paths,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChannelNotifier;
    use coursync_shared::types::{AssignmentFields, CourseFields, DocumentType, UserId};
    use coursync_store::{Database, FilePayload, StorageLimits, UploadRequest};
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        store: SharedStore,
        documents: Arc<DocumentManager>,
        dispatcher: Dispatcher,
        notes: tokio::sync::mpsc::UnboundedReceiver<UserNotification>,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        let store: SharedStore = Arc::new(Mutex::new(db));
        let documents =
            Arc::new(DocumentManager::new(dir.path().join("docs"), StorageLimits::default()).unwrap());
        let (notifier, notes) = ChannelNotifier::new();
        let dispatcher = Dispatcher::new(store.clone(), Some(documents.clone()), Arc::new(notifier));
        Fixture {
            _dir: dir,
            store,
            documents,
            dispatcher,
            notes,
        }
    }

    fn course_record() -> CourseRecord {
        CourseRecord {
            id: 10,
            external_id: "course-page".into(),
            local_id: None,
            fields: CourseFields {
                code: "CS101".into(),
                name: "Intro".into(),
                ..Default::default()
            },
        }
    }

    fn assignment_record() -> AssignmentRecord {
        AssignmentRecord {
            id: 20,
            external_id: "page-1".into(),
            local_id: None,
            fields: AssignmentFields {
                title: "Lab".into(),
                course_code: "CS101".into(),
                ..Default::default()
            },
        }
    }

    fn push(kind: ChangeKind, entity: Entity, id: &str, data: Value) -> Value {
        json!({ "type": kind, "entity": entity, "id": id, "message": "", "data": data })
    }

    fn seed(f: &Fixture) {
        f.dispatcher.handle(push(
            ChangeKind::Create,
            Entity::Course,
            "course-page",
            serde_json::to_value(course_record()).unwrap(),
        ));
        f.dispatcher.handle(push(
            ChangeKind::Create,
            Entity::Assignment,
            "page-1",
            serde_json::to_value(assignment_record()).unwrap(),
        ));
    }

    #[test]
    fn create_is_idempotent() {
        let mut f = fixture();
        seed(&f);
        let again = f.dispatcher.handle(push(
            ChangeKind::Create,
            Entity::Assignment,
            "page-1",
            serde_json::to_value(assignment_record()).unwrap(),
        ));
        assert!(again.is_none());

        let db = f.store.lock().unwrap();
        assert_eq!(assignments::list(db.conn()).unwrap().len(), 1);
        drop(db);
        assert!(f.notes.try_recv().is_ok());
        assert!(f.notes.try_recv().is_ok());
        assert!(f.notes.try_recv().is_err());
    }

    #[test]
    fn update_changes_column_and_keeps_ids() {
        let f = fixture();
        seed(&f);

        let data = json!({ "id": "20", "column": "deadline", "value": "2024-06-01" });
        let note = f
            .dispatcher
            .handle(push(ChangeKind::Update, Entity::Assignment, "page-1", data.clone()))
            .unwrap();
        assert_eq!(note.group, "page-1-updated");
        assert_eq!(note.title, "CS101: Lab");

        let db = f.store.lock().unwrap();
        let a = assignments::find_by_external_id(db.conn(), "page-1")
            .unwrap()
            .unwrap();
        assert_eq!(
            a.fields.deadline,
            coursync_shared::types::parse_timestamp("2024-06-01")
        );
        assert_eq!(a.sync.remote_id(), Some(20));
        drop(db);

        // Same value again is a no-op.
        assert!(f
            .dispatcher
            .handle(push(ChangeKind::Update, Entity::Assignment, "page-1", data))
            .is_none());
    }

    #[test]
    fn duplicate_delete_has_one_effect() {
        let mut f = fixture();
        seed(&f);

        let assignment_id = {
            let db = f.store.lock().unwrap();
            assignments::find_by_external_id(db.conn(), "page-1")
                .unwrap()
                .unwrap()
                .id
        };
        let doc = {
            let db = f.store.lock().unwrap();
            f.documents
                .upload(
                    db.conn(),
                    &UploadRequest {
                        user_id: UserId(1),
                        assignment_id,
                        doc_type: DocumentType::Support,
                        file: FilePayload {
                            file_name: "notes.txt",
                            bytes: b"hello",
                        },
                    },
                )
                .unwrap()
        };
        let payload = f.documents.root().join(&doc.file_path);
        assert!(payload.exists());

        while f.notes.try_recv().is_ok() {}

        let delete = push(ChangeKind::Delete, Entity::Assignment, "page-1", json!({ "id": 20 }));
        assert!(f.dispatcher.handle(delete.clone()).is_some());
        assert!(f.dispatcher.handle(delete).is_none());

        assert!(f.notes.try_recv().is_ok());
        assert!(f.notes.try_recv().is_err());
        assert!(!payload.exists());

        let db = f.store.lock().unwrap();
        assert!(assignments::list(db.conn()).unwrap().is_empty());
        assert!(coursync_store::documents::list_for_assignment(db.conn(), assignment_id)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn course_delete_cascades() {
        let f = fixture();
        seed(&f);

        let note = f.dispatcher.handle(push(
            ChangeKind::Delete,
            Entity::Course,
            "course-page",
            json!({ "id": 10 }),
        ));
        assert!(note.is_some());

        let db = f.store.lock().unwrap();
        assert!(courses::list(db.conn()).unwrap().is_empty());
        assert!(assignments::list(db.conn()).unwrap().is_empty());
    }

    #[test]
    fn assignment_for_unknown_course_is_skipped() {
        let f = fixture();
        let outcome = f
            .dispatcher
            .apply(&PushNotification {
                kind: ChangeKind::Create,
                entity: Entity::Assignment,
                id: "page-1".into(),
                message: String::new(),
                data: serde_json::to_value(assignment_record()).unwrap(),
            })
            .unwrap();
        assert!(matches!(outcome, Outcome::Skipped(_)));
    }

    #[test]
    fn malformed_payloads_are_dropped() {
        let f = fixture();
        assert!(f.dispatcher.handle(json!({ "nonsense": true })).is_none());
        assert!(f
            .dispatcher
            .handle(push(ChangeKind::Update, Entity::Assignment, "x", json!({ "column": 3 })))
            .is_none());
    }

    #[tokio::test]
    async fn run_exits_on_stop() {
        let f = fixture();
        let (_events_tx, events) = tokio::sync::mpsc::channel(4);
        let (_errors_tx, errors) = tokio::sync::mpsc::channel(4);
        let (stop_tx, stop_rx) = watch::channel(false);

        let task = tokio::spawn(f.dispatcher.run(PushChannels { events, errors }, stop_rx));
        stop_tx.send_replace(true);
        task.await.unwrap();
    }
}
