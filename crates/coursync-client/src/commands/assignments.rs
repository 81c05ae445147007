use coursync_shared::protocol::FieldUpdate;
use coursync_shared::types::{AssignmentField, AssignmentFields, Entity};
use coursync_shared::ProtocolError;
use coursync_store::cascade::Removed;
use coursync_store::{assignments, cascade, pending, Assignment};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::commands::sync;
use crate::error::{ClientError, Result};
use crate::state::{lock_store, Session};

pub fn list(session: &Session) -> Result<Vec<Assignment>> {
    let db = lock_store(session.store()?)?;
    Ok(assignments::list(db.conn())?)
}

pub fn list_for_course(session: &Session, course_id: i64) -> Result<Vec<Assignment>> {
    let db = lock_store(session.store()?)?;
    Ok(assignments::list_for_course(db.conn(), course_id)?)
}

pub fn get(session: &Session, id: i64) -> Result<Assignment> {
    let db = lock_store(session.store()?)?;
    Ok(assignments::get(db.conn(), id)?)
}

/// Store an assignment locally as pending and create it remotely.
///
/// The course must exist locally. While that course is still pending the
/// remote call is skipped and the assignment is returned pending; the next
/// sync pass creates both in order.
pub async fn create(session: &Session, fields: AssignmentFields) -> Result<Assignment> {
    if fields.title.trim().is_empty() {
        return Err(required("title"));
    }
    if fields.course_code.trim().is_empty() {
        return Err(required("course_code"));
    }

    let store = session.store()?;
    let local = {
        let db = lock_store(store)?;
        assignments::insert_pending(db.conn(), &fields)?
    };
    info!(id = local.id, course = %local.fields.course_code, "assignment created locally");

    if !sync::course_is_synced(store, &local)? {
        debug!(id = local.id, "course not synced yet, assignment stays pending");
        return Ok(local);
    }

    sync::create_remote_assignment(store, session.api(), &local)
        .await
        .map(sync::RoundTrip::into_inner)
        .map_err(|e| {
            warn!(id = local.id, error = %e, "assignment left pending");
            e
        })
}

pub async fn update(
    session: &Session,
    id: i64,
    column: &str,
    value: &Value,
) -> Result<Assignment> {
    let field: AssignmentField = column.parse()?;
    let value = field.normalize(value)?;
    let store = session.store()?;

    let assignment = {
        let mut db = lock_store(store)?;
        let tx = db.transaction()?;
        assignments::update_field(&tx, id, field, &value)?;
        let assignment = assignments::get(&tx, id)?;
        if !assignment.sync.is_synced() {
            pending::enqueue(&tx, Entity::Assignment, id, field.column(), &value)?;
        }
        tx.commit()?;
        assignment
    };

    if let Some(remote_id) = assignment.sync.remote_id() {
        let request = FieldUpdate {
            id: remote_id.to_string(),
            column: field.column().to_string(),
            value: value.clone(),
        };
        if let Err(e) = session.api().update_assignment(&request).await {
            if e.is_transient() {
                let db = lock_store(store)?;
                pending::enqueue(db.conn(), Entity::Assignment, id, field.column(), &value)?;
                warn!(id, column = field.column(), "remote update queued for retry");
            }
            return Err(e);
        }
    }
    Ok(assignment)
}

/// Toggle the completed flag.
pub async fn set_completed(session: &Session, id: i64, completed: bool) -> Result<Assignment> {
    update(
        session,
        id,
        AssignmentField::Completed.column(),
        &Value::Bool(completed),
    )
    .await
}

pub async fn delete(session: &Session, id: i64) -> Result<Removed> {
    let store = session.store()?;

    let (assignment, removed) = {
        let mut db = lock_store(store)?;
        let tx = db.transaction()?;
        let assignment = assignments::get(&tx, id)?;
        let removed = cascade::delete_assignment(&tx, id)?;
        tx.commit()?;
        (assignment, removed)
    };

    if let Ok(documents) = session.documents() {
        documents.remove_files(removed.file_paths.iter().map(String::as_str));
    }
    info!(id, documents = removed.documents, "assignment deleted locally");

    if let Some(remote_id) = assignment.sync.remote_id() {
        session.api().delete_assignment(remote_id).await?;
    }
    Ok(removed)
}

fn required(column: &str) -> ClientError {
    ProtocolError::InvalidValue {
        column: column.to_string(),
        reason: "value is required".to_string(),
    }
    .into()
}
