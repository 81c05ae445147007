//! Login-time pull of the remote snapshot.
//!
//! Courses are merged before assignments so every assignment finds its
//! course. A remote record replaces the local one it matches (last writer
//! wins) unless the local one still has queued edits, in which case only
//! its ids are recorded and the edits are pushed by the sync pass that
//! follows.

use coursync_shared::protocol::{AssignmentRecord, CourseRecord};
use coursync_shared::types::Entity;
use coursync_store::{assignments, courses, pending, Assignment, StoreError};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info};

use crate::api::RemoteApi;
use crate::commands::sync::{self, SyncReport};
use crate::error::Result;
use crate::state::{lock_store, SharedStore};

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub courses_inserted: usize,
    pub courses_updated: usize,
    pub assignments_inserted: usize,
    pub assignments_updated: usize,
    /// Remote assignments whose course is not known locally.
    pub skipped: usize,
    pub sync: SyncReport,
}

enum Merge {
    Inserted,
    Updated,
    Unchanged,
    Skipped,
}

/// Pull every remote course and assignment into the local store, then
/// retry pending creates and queued edits.
pub async fn reconcile(store: &SharedStore, api: &dyn RemoteApi) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();

    let remote_courses = api.list_courses().await?;
    {
        let mut db = lock_store(store)?;
        let tx = db.transaction()?;
        for record in &remote_courses {
            match merge_course(&tx, record)? {
                Merge::Inserted => report.courses_inserted += 1,
                Merge::Updated => report.courses_updated += 1,
                Merge::Unchanged | Merge::Skipped => {}
            }
        }
        tx.commit()?;
    }

    let remote_assignments = api.list_assignments().await?;
    {
        let mut db = lock_store(store)?;
        let tx = db.transaction()?;
        for record in &remote_assignments {
            match merge_assignment(&tx, record)? {
                Merge::Inserted => report.assignments_inserted += 1,
                Merge::Updated => report.assignments_updated += 1,
                Merge::Unchanged => {}
                Merge::Skipped => report.skipped += 1,
            }
        }
        tx.commit()?;
    }

    info!(
        courses = remote_courses.len(),
        assignments = remote_assignments.len(),
        "remote snapshot merged"
    );

    report.sync = sync::sync_pending(store, api).await?;
    Ok(report)
}

fn merge_course(conn: &Connection, record: &CourseRecord) -> Result<Merge> {
    let existing = match courses::find_by_external_id(conn, &record.external_id)? {
        Some(found) => Some(found),
        None => courses::find_by_code(conn, &record.fields.code)?,
    };

    let Some(local) = existing else {
        courses::insert_synced(conn, record)?;
        return Ok(Merge::Inserted);
    };

    if local.fields == record.fields
        && local.sync.external_id() == Some(record.external_id.as_str())
    {
        return Ok(Merge::Unchanged);
    }
    if !pending::list_for(conn, Entity::Course, local.id)?.is_empty() {
        debug!(code = %local.fields.code, "course has queued edits, keeping local fields");
        if local.sync.is_synced() {
            return Ok(Merge::Unchanged);
        }
        courses::mark_synced(conn, local.id, record.id, &record.external_id)?;
        return Ok(Merge::Updated);
    }
    courses::overwrite(conn, local.id, record)?;
    Ok(Merge::Updated)
}

fn find_assignment(conn: &Connection, record: &AssignmentRecord) -> Result<Option<Assignment>> {
    if let Some(found) = assignments::find_by_external_id(conn, &record.external_id)? {
        return Ok(Some(found));
    }
    if let Some(found) = assignments::find_by_remote_id(conn, record.id)? {
        return Ok(Some(found));
    }
    // Created here, but the create response never arrived.
    let Some(local_id) = record.local_id else {
        return Ok(None);
    };
    match assignments::get(conn, local_id) {
        Ok(found) if !found.sync.is_synced() => Ok(Some(found)),
        Ok(_) | Err(StoreError::NotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn merge_assignment(conn: &Connection, record: &AssignmentRecord) -> Result<Merge> {
    let Some(local) = find_assignment(conn, record)? else {
        return match assignments::insert_synced(conn, record) {
            Ok(_) => Ok(Merge::Inserted),
            Err(StoreError::UnknownCourse(code)) => {
                debug!(
                    external_id = %record.external_id,
                    course = %code,
                    "skipping assignment of unknown course"
                );
                Ok(Merge::Skipped)
            }
            Err(e) => Err(e.into()),
        };
    };

    if local.fields == record.fields
        && local.sync.external_id() == Some(record.external_id.as_str())
    {
        return Ok(Merge::Unchanged);
    }
    if !pending::list_for(conn, Entity::Assignment, local.id)?.is_empty() {
        debug!(id = local.id, "assignment has queued edits, keeping local fields");
        if local.sync.is_synced() {
            return Ok(Merge::Unchanged);
        }
        assignments::mark_synced(conn, local.id, record.id, &record.external_id)?;
        return Ok(Merge::Updated);
    }
    match assignments::overwrite(conn, local.id, record) {
        Ok(()) => Ok(Merge::Updated),
        Err(StoreError::UnknownCourse(_)) => Ok(Merge::Skipped),
        Err(e) => Err(e.into()),
    }
}
