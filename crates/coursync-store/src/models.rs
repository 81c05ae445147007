//! Domain model structs persisted in the local database.
//!
//! Every struct derives `Serialize` so it can be handed directly to the UI
//! layer.

use chrono::{DateTime, Utc};
use coursync_shared::protocol::DocumentInfo;
use coursync_shared::types::{AssignmentFields, CourseFields, DocumentType, Entity, SyncStatus, UserId};
use serde::Serialize;
use serde_json::Value;

// ---------------------------------------------------------------------------
// Sync state
// ---------------------------------------------------------------------------

/// Mirror state of a record. The remote and external ids exist exactly when
/// the record is synced, so the pair lives inside the variant.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "sync_status", rename_all = "lowercase")]
pub enum SyncState {
    Pending,
    Synced { remote_id: i64, external_id: String },
}

impl SyncState {
    pub fn status(&self) -> SyncStatus {
        match self {
            Self::Pending => SyncStatus::Pending,
            Self::Synced { .. } => SyncStatus::Synced,
        }
    }

    pub fn remote_id(&self) -> Option<i64> {
        match self {
            Self::Synced { remote_id, .. } => Some(*remote_id),
            Self::Pending => None,
        }
    }

    pub fn external_id(&self) -> Option<&str> {
        match self {
            Self::Synced { external_id, .. } => Some(external_id),
            Self::Pending => None,
        }
    }

    pub fn is_synced(&self) -> bool {
        matches!(self, Self::Synced { .. })
    }
}

// ---------------------------------------------------------------------------
// Course
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Course {
    /// Local row id.
    pub id: i64,
    #[serde(flatten)]
    pub fields: CourseFields,
    #[serde(flatten)]
    pub sync: SyncState,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Assignment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Assignment {
    pub id: i64,
    /// Local id of the owning course.
    pub course_id: i64,
    #[serde(flatten)]
    pub fields: AssignmentFields,
    #[serde(flatten)]
    pub sync: SyncState,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// Metadata of one stored payload. Versions of the same document point at
/// the chain root through `parent_id`; the root itself has none.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Document {
    pub id: i64,
    pub user_id: UserId,
    pub assignment_id: i64,
    pub doc_type: DocumentType,
    pub file_name: String,
    /// Path relative to the document root, `/`-separated.
    pub file_path: String,
    pub file_size: u64,
    pub mime_type: String,
    /// Hex-encoded BLAKE3 hash of the payload.
    pub content_hash: String,
    pub version: i64,
    pub parent_id: Option<i64>,
    pub has_local_file: bool,
    pub created_at: DateTime<Utc>,
}

impl Document {
    /// Id of the chain this document belongs to.
    pub fn root_id(&self) -> i64 {
        self.parent_id.unwrap_or(self.id)
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn info(&self) -> DocumentInfo {
        DocumentInfo {
            id: self.id,
            assignment_id: self.assignment_id,
            doc_type: self.doc_type,
            file_name: self.file_name.clone(),
            file_size: self.file_size,
            mime_type: self.mime_type.clone(),
            version: self.version,
            parent_id: self.parent_id,
            content_hash: self.content_hash.clone(),
            created_at: self.created_at,
        }
    }
}

/// Row inserted by the document manager once the payload is on disk.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub user_id: UserId,
    pub assignment_id: i64,
    pub doc_type: DocumentType,
    pub file_name: String,
    pub file_path: String,
    pub file_size: u64,
    pub mime_type: String,
    pub content_hash: String,
    pub version: i64,
    pub parent_id: Option<i64>,
}

// ---------------------------------------------------------------------------
// Storage quota
// ---------------------------------------------------------------------------

/// Cached per-user aggregate. Always recomputed from `documents`, never
/// adjusted incrementally.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct StorageQuota {
    pub user_id: UserId,
    pub total_size: u64,
    pub document_count: u64,
    pub calculated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Pending update
// ---------------------------------------------------------------------------

/// A column edit queued while its record was still pending.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingUpdate {
    pub id: i64,
    pub entity: Entity,
    pub local_id: i64,
    pub column: String,
    pub value: Value,
    pub queued_at: DateTime<Utc>,
}
