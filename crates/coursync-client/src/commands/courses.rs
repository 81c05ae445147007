use coursync_shared::protocol::FieldUpdate;
use coursync_shared::types::{CourseField, CourseFields, Entity};
use coursync_shared::ProtocolError;
use coursync_store::cascade::Removed;
use coursync_store::{cascade, courses, pending, Course};
use serde_json::Value;
use tracing::{info, warn};

use crate::commands::sync;
use crate::error::Result;
use crate::state::{lock_store, Session};

pub fn list(session: &Session) -> Result<Vec<Course>> {
    let db = lock_store(session.store()?)?;
    Ok(courses::list(db.conn())?)
}

pub fn get(session: &Session, id: i64) -> Result<Course> {
    let db = lock_store(session.store()?)?;
    Ok(courses::get(db.conn(), id)?)
}

/// Store a course locally as pending, then create it remotely. When the
/// round trip fails the course stays pending and the error is returned.
pub async fn create(session: &Session, fields: CourseFields) -> Result<Course> {
    if fields.code.trim().is_empty() {
        return Err(required("code"));
    }
    if fields.name.trim().is_empty() {
        return Err(required("name"));
    }

    let store = session.store()?;
    let local = {
        let db = lock_store(store)?;
        courses::insert_pending(db.conn(), &fields)?
    };
    info!(id = local.id, code = %local.fields.code, "course created locally");

    sync::create_remote_course(store, session.api(), &local)
        .await
        .map(sync::RoundTrip::into_inner)
        .map_err(|e| {
            warn!(id = local.id, error = %e, "course left pending");
            e
        })
}

/// Change one column locally, then mirror it. Edits to a pending course are
/// queued until its round trip succeeds.
pub async fn update(session: &Session, id: i64, column: &str, value: &Value) -> Result<Course> {
    let field: CourseField = column.parse()?;
    let value = field.normalize(value)?;
    let store = session.store()?;

    let course = {
        let mut db = lock_store(store)?;
        let tx = db.transaction()?;
        courses::update_field(&tx, id, field, &value)?;
        let course = courses::get(&tx, id)?;
        if !course.sync.is_synced() {
            pending::enqueue(&tx, Entity::Course, id, field.column(), &value)?;
        }
        tx.commit()?;
        course
    };

    if let Some(remote_id) = course.sync.remote_id() {
        let request = FieldUpdate {
            id: remote_id.to_string(),
            column: field.column().to_string(),
            value: value.clone(),
        };
        if let Err(e) = session.api().update_course(&request).await {
            if e.is_transient() {
                let db = lock_store(store)?;
                pending::enqueue(db.conn(), Entity::Course, id, field.column(), &value)?;
            }
            return Err(e);
        }
    }
    Ok(course)
}

/// Delete a course with its assignments and documents, then ask the server
/// to delete it too. A remote failure is returned; the local delete stands.
pub async fn delete(session: &Session, id: i64) -> Result<Removed> {
    let store = session.store()?;

    let (course, removed) = {
        let mut db = lock_store(store)?;
        let tx = db.transaction()?;
        let course = courses::get(&tx, id)?;
        let removed = cascade::delete_course(&tx, id)?;
        tx.commit()?;
        (course, removed)
    };

    if let Ok(documents) = session.documents() {
        documents.remove_files(removed.file_paths.iter().map(String::as_str));
    }
    info!(
        id,
        assignments = removed.assignments,
        documents = removed.documents,
        "course deleted locally"
    );

    if let Some(remote_id) = course.sync.remote_id() {
        session.api().delete_course(remote_id).await?;
    }
    Ok(removed)
}

fn required(column: &str) -> crate::error::ClientError {
    ProtocolError::InvalidValue {
        column: column.to_string(),
        reason: "value is required".to_string(),
    }
    .into()
}
