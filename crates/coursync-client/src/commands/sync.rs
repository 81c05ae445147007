//! Create round trips and the pending-update queue.
//!
//! A record is written locally as pending first. The round trip creates it
//! remotely, records the returned ids in one transaction, then replays any
//! column edits queued while the record was pending. At most one round trip
//! per record runs at a time; a second caller gets [`RoundTrip::Skipped`].

use std::sync::PoisonError;

use coursync_shared::protocol::{FieldUpdate, NewAssignment, NewCourse};
use coursync_shared::types::Entity;
use coursync_store::{assignments, courses, pending, Assignment, Course, StoreError};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::api::RemoteApi;
use crate::error::Result;
use crate::state::{lock_store, SharedStore};

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub courses_synced: usize,
    pub assignments_synced: usize,
    pub updates_flushed: usize,
    pub failed: usize,
}

/// Retry the create round trip of every pending course, then every pending
/// assignment, then flush queued edits of records that are already synced.
pub async fn sync_pending(store: &SharedStore, api: &dyn RemoteApi) -> Result<SyncReport> {
    let mut report = SyncReport::default();

    let pending_courses = {
        let db = lock_store(store)?;
        courses::list_pending(db.conn())?
    };
    for course in pending_courses {
        match create_remote_course(store, api, &course).await {
            Ok(RoundTrip::Created(_)) => report.courses_synced += 1,
            Ok(RoundTrip::Skipped(_)) => debug!(id = course.id, "course create handled elsewhere"),
            Err(e) => {
                warn!(course = %course.fields.code, error = %e, "course still pending");
                report.failed += 1;
            }
        }
    }

    let pending_assignments = {
        let db = lock_store(store)?;
        assignments::list_pending(db.conn())?
    };
    for assignment in pending_assignments {
        if !course_is_synced(store, &assignment)? {
            debug!(id = assignment.id, "assignment waits for its course");
            continue;
        }
        match create_remote_assignment(store, api, &assignment).await {
            Ok(RoundTrip::Created(_)) => report.assignments_synced += 1,
            Ok(RoundTrip::Skipped(_)) => {
                debug!(id = assignment.id, "assignment create handled elsewhere")
            }
            Err(e) => {
                warn!(id = assignment.id, error = %e, "assignment still pending");
                report.failed += 1;
            }
        }
    }

    let queued = {
        let db = lock_store(store)?;
        pending::queued_records(db.conn())?
    };
    for (entity, local_id) in queued {
        let Some(remote_id) = remote_id_of(store, entity, local_id)? else {
            continue;
        };
        match flush_updates(store, api, entity, local_id, remote_id).await {
            Ok(n) => report.updates_flushed += n,
            Err(e) => {
                warn!(entity = entity.as_str(), local_id, error = %e, "queued edits not flushed");
                report.failed += 1;
            }
        }
    }

    if report != SyncReport::default() {
        info!(?report, "pending records synced");
    }
    Ok(report)
}

/// Outcome of a create round trip.
#[derive(Debug)]
pub(crate) enum RoundTrip<T> {
    /// This call created the record remotely. Holds the synced row.
    Created(T),
    /// Another round trip already synced the record or is still running.
    /// Holds the row as currently stored.
    Skipped(T),
}

impl<T> RoundTrip<T> {
    pub(crate) fn into_inner(self) -> T {
        match self {
            Self::Created(row) | Self::Skipped(row) => row,
        }
    }
}

/// Exclusive right to run the create round trip of one record, released
/// on drop.
struct Claim<'a> {
    store: &'a SharedStore,
    entity: Entity,
    local_id: i64,
}

impl<'a> Claim<'a> {
    fn acquire(store: &'a SharedStore, entity: Entity, local_id: i64) -> Result<Option<Self>> {
        let mut db = lock_store(store)?;
        if !db.claim_round_trip(entity, local_id) {
            return Ok(None);
        }
        Ok(Some(Self {
            store,
            entity,
            local_id,
        }))
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        let mut db = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        db.release_round_trip(self.entity, self.local_id);
    }
}

pub(crate) fn course_is_synced(store: &SharedStore, assignment: &Assignment) -> Result<bool> {
    let db = lock_store(store)?;
    Ok(courses::get(db.conn(), assignment.course_id)?.sync.is_synced())
}

fn remote_id_of(store: &SharedStore, entity: Entity, local_id: i64) -> Result<Option<i64>> {
    let db = lock_store(store)?;
    let remote_id = match entity {
        Entity::Course => courses::get(db.conn(), local_id)?.sync.remote_id(),
        Entity::Assignment => assignments::get(db.conn(), local_id)?.sync.remote_id(),
        Entity::Unknown => None,
    };
    Ok(remote_id)
}

fn current_course(store: &SharedStore, id: i64) -> Result<Course> {
    let db = lock_store(store)?;
    Ok(courses::get(db.conn(), id)?)
}

fn current_assignment(store: &SharedStore, id: i64) -> Result<Assignment> {
    let db = lock_store(store)?;
    Ok(assignments::get(db.conn(), id)?)
}

/// Create `local` remotely and mark it synced. Queued edits are flushed
/// afterwards; a flush failure leaves them queued and is only logged.
pub(crate) async fn create_remote_course(
    store: &SharedStore,
    api: &dyn RemoteApi,
    local: &Course,
) -> Result<RoundTrip<Course>> {
    let Some(_claim) = Claim::acquire(store, Entity::Course, local.id)? else {
        debug!(id = local.id, "course create already in flight");
        return Ok(RoundTrip::Skipped(current_course(store, local.id)?));
    };
    let current = current_course(store, local.id)?;
    if current.sync.is_synced() {
        return Ok(RoundTrip::Skipped(current));
    }

    let record = api
        .create_course(&NewCourse {
            local_id: local.id,
            fields: current.fields.clone(),
        })
        .await?;

    let marked = {
        let mut db = lock_store(store)?;
        let tx = db.transaction()?;
        let outcome = courses::mark_synced(&tx, local.id, record.id, &record.external_id);
        match outcome {
            Ok(()) => {
                tx.commit()?;
                true
            }
            Err(StoreError::AlreadySynced { .. }) => false,
            Err(e) => return Err(e.into()),
        }
    };
    if !marked {
        warn!(id = local.id, remote_id = record.id, "course synced during create");
        return Ok(RoundTrip::Skipped(current_course(store, local.id)?));
    }
    info!(code = %current.fields.code, remote_id = record.id, "course synced");

    if let Err(e) = flush_updates(store, api, Entity::Course, local.id, record.id).await {
        warn!(id = local.id, error = %e, "queued course edits not flushed");
    }

    Ok(RoundTrip::Created(current_course(store, local.id)?))
}

pub(crate) async fn create_remote_assignment(
    store: &SharedStore,
    api: &dyn RemoteApi,
    local: &Assignment,
) -> Result<RoundTrip<Assignment>> {
    let Some(_claim) = Claim::acquire(store, Entity::Assignment, local.id)? else {
        debug!(id = local.id, "assignment create already in flight");
        return Ok(RoundTrip::Skipped(current_assignment(store, local.id)?));
    };
    let current = current_assignment(store, local.id)?;
    if current.sync.is_synced() {
        return Ok(RoundTrip::Skipped(current));
    }

    let record = api
        .create_assignment(&NewAssignment {
            local_id: local.id,
            fields: current.fields.clone(),
        })
        .await?;

    let marked = {
        let mut db = lock_store(store)?;
        let tx = db.transaction()?;
        let outcome = assignments::mark_synced(&tx, local.id, record.id, &record.external_id);
        match outcome {
            Ok(()) => {
                tx.commit()?;
                true
            }
            Err(StoreError::AlreadySynced { .. }) => false,
            Err(e) => return Err(e.into()),
        }
    };
    if !marked {
        warn!(id = local.id, remote_id = record.id, "assignment synced during create");
        return Ok(RoundTrip::Skipped(current_assignment(store, local.id)?));
    }
    info!(id = local.id, remote_id = record.id, "assignment synced");

    if let Err(e) = flush_updates(store, api, Entity::Assignment, local.id, record.id).await {
        warn!(id = local.id, error = %e, "queued assignment edits not flushed");
    }

    Ok(RoundTrip::Created(current_assignment(store, local.id)?))
}

/// Replay queued edits in order, removing each one once the server accepted
/// it. Stops at the first failure.
async fn flush_updates(
    store: &SharedStore,
    api: &dyn RemoteApi,
    entity: Entity,
    local_id: i64,
    remote_id: i64,
) -> Result<usize> {
    let queued = {
        let db = lock_store(store)?;
        pending::list_for(db.conn(), entity, local_id)?
    };

    let mut flushed = 0;
    for update in queued {
        let request = FieldUpdate {
            id: remote_id.to_string(),
            column: update.column.clone(),
            value: update.value.clone(),
        };
        match entity {
            Entity::Course => api.update_course(&request).await?,
            Entity::Assignment => api.update_assignment(&request).await?,
            Entity::Unknown => {}
        }
        let db = lock_store(store)?;
        pending::remove(db.conn(), update.id)?;
        flushed += 1;
    }

    if flushed > 0 {
        debug!(entity = entity.as_str(), local_id, flushed, "queued edits flushed");
    }
    Ok(flushed)
}
