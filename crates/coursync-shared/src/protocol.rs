use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{AssignmentFields, ChangeKind, CourseFields, DocumentType, Entity};

/// Prefix of a push stream line that carries a JSON payload.
pub const DATA_PREFIX: &str = "data:";

/// Comment text sent on an idle push stream.
pub const HEARTBEAT_COMMENT: &str = "heartbeat";

/// A change notification delivered over the push stream.
///
/// `id` is the external id of the affected record. The shape of `data`
/// depends on `kind`: a full record for creates, a [`FieldUpdate`] for
/// updates, and nothing in particular for deletes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PushNotification {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub entity: Entity,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

/// Frame one JSON payload for the push stream.
pub fn encode_frame(json: &str) -> String {
    format!("{DATA_PREFIX} {json}\n\n")
}

/// Extract the payload of a `data:` line. Comments, blank lines and other
/// fields yield `None`.
pub fn parse_data_line(line: &str) -> Option<&str> {
    let line = line.trim_end_matches(['\r', '\n']);
    let payload = line.strip_prefix(DATA_PREFIX)?;
    let payload = payload.strip_prefix(' ').unwrap_or(payload);
    if payload.is_empty() {
        None
    } else {
        Some(payload)
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// An assignment as held by the remote store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssignmentRecord {
    /// Remote numeric id.
    pub id: i64,
    pub external_id: String,
    /// Local id supplied by the client that created the record, if any.
    #[serde(default)]
    pub local_id: Option<i64>,
    #[serde(flatten)]
    pub fields: AssignmentFields,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CourseRecord {
    pub id: i64,
    pub external_id: String,
    #[serde(default)]
    pub local_id: Option<i64>,
    #[serde(flatten)]
    pub fields: CourseFields,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAssignment {
    pub local_id: i64,
    #[serde(flatten)]
    pub fields: AssignmentFields,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCourse {
    pub local_id: i64,
    #[serde(flatten)]
    pub fields: CourseFields,
}

/// Single column change. On the HTTP API `id` is the remote id; inside a
/// push notification it is also the remote id while the envelope carries
/// the external id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldUpdate {
    pub id: String,
    pub column: String,
    pub value: Value,
}

/// Response body of record create calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordResponse<T> {
    pub message: String,
    pub record: T,
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentInfo {
    pub id: i64,
    pub assignment_id: i64,
    #[serde(rename = "type")]
    pub doc_type: DocumentType,
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
    pub version: i64,
    #[serde(default)]
    pub parent_id: Option<i64>,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct QuotaInfo {
    pub total_size: u64,
    pub document_count: u64,
    pub max_quota: u64,
    pub usage_percentage: f64,
}

impl QuotaInfo {
    pub fn new(total_size: u64, document_count: u64, max_quota: u64) -> Self {
        let usage_percentage = if max_quota == 0 {
            0.0
        } else {
            total_size as f64 / max_quota as f64 * 100.0
        };
        Self {
            total_size,
            document_count,
            max_quota,
            usage_percentage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn data_lines_are_extracted() {
        assert_eq!(parse_data_line("data: {\"a\":1}\n"), Some("{\"a\":1}"));
        assert_eq!(parse_data_line("data:{\"a\":1}\r\n"), Some("{\"a\":1}"));
        assert_eq!(parse_data_line(": heartbeat"), None);
        assert_eq!(parse_data_line("event: ping"), None);
        assert_eq!(parse_data_line("data:"), None);
    }

    #[test]
    fn frame_parses_back() {
        let frame = encode_frame("{\"type\":\"delete\"}");
        let first = frame.lines().next().unwrap();
        assert_eq!(parse_data_line(first), Some("{\"type\":\"delete\"}"));
        assert!(frame.ends_with("\n\n"));
    }

    #[test]
    fn notification_wire_shape() {
        let value = json!({
            "type": "update",
            "entity": "assignment",
            "id": "page-1",
            "message": "Deadline moved",
            "data": { "id": "7", "column": "deadline", "value": "2024-06-01" }
        });
        let n: PushNotification = serde_json::from_value(value).unwrap();
        assert_eq!(n.kind, ChangeKind::Update);
        assert_eq!(n.entity, Entity::Assignment);
        let update: FieldUpdate = serde_json::from_value(n.data).unwrap();
        assert_eq!(update.column, "deadline");
    }

    #[test]
    fn record_flattens_fields() {
        let value = json!({
            "id": 3,
            "external_id": "page-3",
            "title": "Essay",
            "course_code": "HIST2",
            "completed": false
        });
        let record: AssignmentRecord = serde_json::from_value(value).unwrap();
        assert_eq!(record.fields.title, "Essay");
        assert_eq!(record.local_id, None);
    }

    #[test]
    fn quota_percentage() {
        let q = QuotaInfo::new(512, 2, 2048);
        assert!((q.usage_percentage - 25.0).abs() < f64::EPSILON);
        assert_eq!(QuotaInfo::new(1, 1, 0).usage_percentage, 0.0);
    }
}
