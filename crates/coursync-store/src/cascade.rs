//! Cascading deletes of courses and assignments.
//!
//! Children go first (documents, then assignments, then the course) and the
//! quota cache of every affected owner is refreshed in the same
//! transaction. Payload files cannot be rolled back, so their paths are
//! handed back for removal after the caller commits.

use coursync_shared::types::Entity;
use rusqlite::Connection;

use crate::error::Result;
use crate::{assignments, documents, pending, quota};

/// What a cascade removed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Removed {
    pub courses: usize,
    pub assignments: usize,
    pub documents: usize,
    /// Payload paths of the deleted documents, relative to the document root.
    pub file_paths: Vec<String>,
}

pub fn delete_assignment(conn: &Connection, assignment_id: i64) -> Result<Removed> {
    delete_assignments(conn, &[assignment_id])
}

fn delete_assignments(conn: &Connection, ids: &[i64]) -> Result<Removed> {
    let owners = documents::owners_of(conn, ids)?;
    let file_paths = documents::delete_for_assignments(conn, ids)?;

    let mut removed = Removed {
        documents: file_paths.len(),
        file_paths,
        ..Default::default()
    };
    for id in ids {
        pending::clear_for(conn, Entity::Assignment, *id)?;
        if assignments::delete(conn, *id)? {
            removed.assignments += 1;
        }
    }
    for owner in owners {
        quota::recompute(conn, owner)?;
    }
    Ok(removed)
}

pub fn delete_course(conn: &Connection, course_id: i64) -> Result<Removed> {
    let ids: Vec<i64> = assignments::list_for_course(conn, course_id)?
        .into_iter()
        .map(|a| a.id)
        .collect();

    let mut removed = delete_assignments(conn, &ids)?;
    pending::clear_for(conn, Entity::Course, course_id)?;
    if crate::courses::delete(conn, course_id)? {
        removed.courses = 1;
    }

    tracing::debug!(
        course_id,
        assignments = removed.assignments,
        documents = removed.documents,
        "course deleted with dependents"
    );
    Ok(removed)
}
