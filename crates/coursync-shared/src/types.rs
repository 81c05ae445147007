use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Server-assigned numeric user identity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Whether a local record has been mirrored to the remote store yet.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Synced,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Synced => "synced",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "synced" => Ok(Self::Synced),
            other => Err(ProtocolError::UnknownSyncStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Support,
    Submission,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Support => "support",
            Self::Submission => "submission",
        }
    }
}

impl FromStr for DocumentType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "support" => Ok(Self::Support),
            "submission" => Ok(Self::Submission),
            other => Err(ProtocolError::UnknownDocumentType(other.to_string())),
        }
    }
}

/// Kind of record a push notification refers to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Entity {
    Assignment,
    Course,
    #[serde(other)]
    Unknown,
}

impl Entity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assignment => "assignment",
            Self::Course => "course",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
    #[serde(other)]
    Unknown,
}

impl ChangeKind {
    /// Past-tense form used in user-facing notification text.
    pub fn past_tense(&self) -> &'static str {
        match self {
            Self::Create => "created",
            Self::Update => "updated",
            Self::Delete => "deleted",
            Self::Unknown => "changed",
        }
    }
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Canonical text form of every timestamp stored or sent on the wire.
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC) and bare dates (midnight UTC).
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

// ---------------------------------------------------------------------------
// Field columns
// ---------------------------------------------------------------------------

/// Storage shape of a mutable column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Bool,
    Timestamp,
}

impl FieldKind {
    /// Coerce an incoming JSON value into the canonical form for this kind.
    /// `null` is accepted for every kind.
    pub fn normalize(&self, column: &str, value: &Value) -> Result<Value, ProtocolError> {
        let invalid = |reason: &str| ProtocolError::InvalidValue {
            column: column.to_string(),
            reason: reason.to_string(),
        };

        match (self, value) {
            (_, Value::Null) => Ok(Value::Null),

            (Self::Text, Value::String(s)) => Ok(Value::String(s.clone())),
            (Self::Text, Value::Number(n)) => Ok(Value::String(n.to_string())),
            (Self::Text, Value::Bool(b)) => Ok(Value::String(b.to_string())),

            (Self::Integer, Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .map(Value::from)
                .ok_or_else(|| invalid("expected an integer")),
            (Self::Integer, Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| invalid("expected an integer")),

            (Self::Bool, Value::Bool(b)) => Ok(Value::Bool(*b)),
            (Self::Bool, Value::Number(n)) => match n.as_i64() {
                Some(0) => Ok(Value::Bool(false)),
                Some(1) => Ok(Value::Bool(true)),
                _ => Err(invalid("expected 0 or 1")),
            },
            (Self::Bool, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(Value::Bool(true)),
                "false" | "0" | "no" => Ok(Value::Bool(false)),
                _ => Err(invalid("expected a boolean")),
            },

            (Self::Timestamp, Value::String(s)) => parse_timestamp(s)
                .map(|dt| Value::String(format_timestamp(&dt)))
                .ok_or_else(|| invalid("expected a date or RFC 3339 timestamp")),

            _ => Err(invalid("unsupported JSON type")),
        }
    }
}

/// Mutable assignment columns. The column name doubles as the SQL
/// identifier, so only these values ever reach an `UPDATE` statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentField {
    Title,
    Todo,
    Deadline,
    Link,
    CourseCode,
    TypeName,
    StatusName,
    Priority,
    Completed,
}

impl AssignmentField {
    pub const ALL: [AssignmentField; 9] = [
        Self::Title,
        Self::Todo,
        Self::Deadline,
        Self::Link,
        Self::CourseCode,
        Self::TypeName,
        Self::StatusName,
        Self::Priority,
        Self::Completed,
    ];

    pub fn column(&self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Todo => "todo",
            Self::Deadline => "deadline",
            Self::Link => "link",
            Self::CourseCode => "course_code",
            Self::TypeName => "type_name",
            Self::StatusName => "status_name",
            Self::Priority => "priority",
            Self::Completed => "completed",
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            Self::Deadline => FieldKind::Timestamp,
            Self::Completed => FieldKind::Bool,
            _ => FieldKind::Text,
        }
    }

    pub fn normalize(&self, value: &Value) -> Result<Value, ProtocolError> {
        let normalized = self.kind().normalize(self.column(), value)?;
        if normalized.is_null() && matches!(self, Self::Title | Self::CourseCode | Self::Completed)
        {
            return Err(ProtocolError::InvalidValue {
                column: self.column().to_string(),
                reason: "value is required".to_string(),
            });
        }
        Ok(normalized)
    }
}

impl FromStr for AssignmentField {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|f| f.column() == s)
            .ok_or_else(|| ProtocolError::UnknownColumn(s.to_string()))
    }
}

/// Mutable course columns. `code` is the natural key and is not listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CourseField {
    Name,
    Duration,
    RoomNumber,
    Color,
    StartDate,
    EndDate,
    Credits,
    Schedule,
    Semester,
    Instructor,
    InstructorEmail,
}

impl CourseField {
    pub const ALL: [CourseField; 11] = [
        Self::Name,
        Self::Duration,
        Self::RoomNumber,
        Self::Color,
        Self::StartDate,
        Self::EndDate,
        Self::Credits,
        Self::Schedule,
        Self::Semester,
        Self::Instructor,
        Self::InstructorEmail,
    ];

    pub fn column(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Duration => "duration",
            Self::RoomNumber => "room_number",
            Self::Color => "color",
            Self::StartDate => "start_date",
            Self::EndDate => "end_date",
            Self::Credits => "credits",
            Self::Schedule => "schedule",
            Self::Semester => "semester",
            Self::Instructor => "instructor",
            Self::InstructorEmail => "instructor_email",
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            Self::Credits => FieldKind::Integer,
            _ => FieldKind::Text,
        }
    }

    pub fn normalize(&self, value: &Value) -> Result<Value, ProtocolError> {
        let normalized = self.kind().normalize(self.column(), value)?;
        if normalized.is_null() && *self == Self::Name {
            return Err(ProtocolError::InvalidValue {
                column: self.column().to_string(),
                reason: "value is required".to_string(),
            });
        }
        Ok(normalized)
    }
}

impl FromStr for CourseField {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|f| f.column() == s)
            .ok_or_else(|| ProtocolError::UnknownColumn(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Field sets
// ---------------------------------------------------------------------------

/// User-editable content of an assignment, identical on every tier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AssignmentFields {
    pub title: String,
    #[serde(default)]
    pub todo: Option<String>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub link: Option<String>,
    pub course_code: String,
    #[serde(default)]
    pub type_name: Option<String>,
    #[serde(default)]
    pub status_name: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub completed: bool,
}

impl AssignmentFields {
    /// Current value of one column in its canonical JSON form.
    pub fn get(&self, field: AssignmentField) -> Value {
        fn text(v: &Option<String>) -> Value {
            v.clone().map(Value::String).unwrap_or(Value::Null)
        }
        match field {
            AssignmentField::Title => Value::String(self.title.clone()),
            AssignmentField::Todo => text(&self.todo),
            AssignmentField::Deadline => self
                .deadline
                .map(|dt| Value::String(format_timestamp(&dt)))
                .unwrap_or(Value::Null),
            AssignmentField::Link => text(&self.link),
            AssignmentField::CourseCode => Value::String(self.course_code.clone()),
            AssignmentField::TypeName => text(&self.type_name),
            AssignmentField::StatusName => text(&self.status_name),
            AssignmentField::Priority => text(&self.priority),
            AssignmentField::Completed => Value::Bool(self.completed),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CourseFields {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub room_number: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub credits: Option<i64>,
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub semester: Option<String>,
    #[serde(default)]
    pub instructor: Option<String>,
    #[serde(default)]
    pub instructor_email: Option<String>,
}

impl CourseFields {
    pub fn get(&self, field: CourseField) -> Value {
        fn text(v: &Option<String>) -> Value {
            v.clone().map(Value::String).unwrap_or(Value::Null)
        }
        match field {
            CourseField::Name => Value::String(self.name.clone()),
            CourseField::Duration => text(&self.duration),
            CourseField::RoomNumber => text(&self.room_number),
            CourseField::Color => text(&self.color),
            CourseField::StartDate => text(&self.start_date),
            CourseField::EndDate => text(&self.end_date),
            CourseField::Credits => self.credits.map(Value::from).unwrap_or(Value::Null),
            CourseField::Schedule => text(&self.schedule),
            CourseField::Semester => text(&self.semester),
            CourseField::Instructor => text(&self.instructor),
            CourseField::InstructorEmail => text(&self.instructor_email),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deadline_normalizes_dates_and_timestamps() {
        let field = AssignmentField::Deadline;
        assert_eq!(
            field.normalize(&json!("2024-05-01")).unwrap(),
            json!("2024-05-01T00:00:00Z")
        );
        assert_eq!(
            field.normalize(&json!("2024-05-01T10:30:00+02:00")).unwrap(),
            json!("2024-05-01T08:30:00Z")
        );
        assert!(field.normalize(&json!("next tuesday")).is_err());
        assert_eq!(field.normalize(&Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn completed_accepts_loose_booleans() {
        let field = AssignmentField::Completed;
        assert_eq!(field.normalize(&json!(1)).unwrap(), json!(true));
        assert_eq!(field.normalize(&json!("false")).unwrap(), json!(false));
        assert!(field.normalize(&json!(2)).is_err());
        assert!(field.normalize(&Value::Null).is_err());
    }

    #[test]
    fn credits_accepts_numeric_strings() {
        assert_eq!(CourseField::Credits.normalize(&json!("6")).unwrap(), json!(6));
        assert_eq!(CourseField::Credits.normalize(&json!(4.0)).unwrap(), json!(4));
        assert!(CourseField::Credits.normalize(&json!("six")).is_err());
    }

    #[test]
    fn columns_parse_only_from_allow_list() {
        assert_eq!(
            "course_code".parse::<AssignmentField>().unwrap(),
            AssignmentField::CourseCode
        );
        assert!("id; DROP TABLE assignments".parse::<AssignmentField>().is_err());
        assert!("code".parse::<CourseField>().is_err());
    }

    #[test]
    fn get_matches_normalized_form() {
        let fields = AssignmentFields {
            title: "Lab 3".into(),
            deadline: parse_timestamp("2024-05-01"),
            course_code: "CS101".into(),
            ..Default::default()
        };
        let incoming = AssignmentField::Deadline
            .normalize(&json!("2024-05-01T00:00:00+00:00"))
            .unwrap();
        assert_eq!(fields.get(AssignmentField::Deadline), incoming);
    }

    #[test]
    fn unknown_entity_and_kind_deserialize() {
        let entity: Entity = serde_json::from_value(json!("grade")).unwrap();
        let kind: ChangeKind = serde_json::from_value(json!("archive")).unwrap();
        assert_eq!(entity, Entity::Unknown);
        assert_eq!(kind, ChangeKind::Unknown);
    }
}
