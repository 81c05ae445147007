//! Fixtures shared by the unit tests of this crate.

use coursync_shared::types::{AssignmentFields, CourseFields};

use crate::models::Assignment;
use crate::{assignments, courses, Database};

pub(crate) fn course_fields(code: &str) -> CourseFields {
    CourseFields {
        code: code.to_string(),
        name: format!("{code} lecture"),
        credits: Some(6),
        ..Default::default()
    }
}

pub(crate) fn assignment_fields(title: &str, course_code: &str) -> AssignmentFields {
    AssignmentFields {
        title: title.to_string(),
        course_code: course_code.to_string(),
        ..Default::default()
    }
}

/// Insert a pending course (if needed) and a pending assignment under it.
pub(crate) fn seed_assignment(db: &Database, course_code: &str, title: &str) -> Assignment {
    if courses::find_by_code(db.conn(), course_code).unwrap().is_none() {
        courses::insert_pending(db.conn(), &course_fields(course_code)).unwrap();
    }
    assignments::insert_pending(db.conn(), &assignment_fields(title, course_code)).unwrap()
}
