//! Document payload storage with version chains and quota enforcement.
//!
//! Payloads live under one root directory at
//! `user_<id>/assignment_<id>/<type>/<unix_ts>_<name>`; metadata lives in the
//! `documents` table of whatever connection the caller passes in. An upload
//! is a two-step saga: the payload is written first, then the row is
//! inserted and the quota cache refreshed in one transaction. If that
//! transaction fails the payload is removed again. Payloads that still end
//! up without a row are collected by [`DocumentManager::sweep_orphans`].
//!
//! Callers serialize access through the connection they own, so the usage
//! sums, the version number and the insert always observe the same state.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};

use chrono::{Duration, Utc};
use coursync_shared::constants::{
    mime_for_extension, MAX_ASSIGNMENT_SIZE, MAX_FILE_SIZE, MAX_USER_QUOTA, QUOTA_STALENESS_SECS,
};
use coursync_shared::protocol::QuotaInfo;
use coursync_shared::types::{DocumentType, UserId};
use rusqlite::{Connection, Transaction};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::documents;
use crate::error::{QuotaScope, Result, StoreError};
use crate::models::{Document, NewDocument, StorageQuota};
use crate::quota;

/// Upper bounds enforced on every upload, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageLimits {
    pub max_file_size: u64,
    pub max_assignment_size: u64,
    pub max_user_quota: u64,
}

impl Default for StorageLimits {
    fn default() -> Self {
        Self {
            max_file_size: MAX_FILE_SIZE,
            max_assignment_size: MAX_ASSIGNMENT_SIZE,
            max_user_quota: MAX_USER_QUOTA,
        }
    }
}

/// File name and bytes of one payload.
#[derive(Debug, Clone, Copy)]
pub struct FilePayload<'a> {
    pub file_name: &'a str,
    pub bytes: &'a [u8],
}

#[derive(Debug, Clone, Copy)]
pub struct UploadRequest<'a> {
    pub user_id: UserId,
    pub assignment_id: i64,
    pub doc_type: DocumentType,
    pub file: FilePayload<'a>,
}

/// Where a new payload goes: a fresh chain, or the end of an existing one.
struct Target {
    user_id: UserId,
    assignment_id: i64,
    doc_type: DocumentType,
    chain_root: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct DocumentManager {
    root: PathBuf,
    limits: StorageLimits,
    staleness: Duration,
}

impl DocumentManager {
    /// Create the manager, creating `root` if it does not exist.
    pub fn new(root: impl Into<PathBuf>, limits: StorageLimits) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;

        info!(path = %root.display(), "document store initialized");

        Ok(Self {
            root,
            limits,
            staleness: Duration::seconds(QUOTA_STALENESS_SECS),
        })
    }

    /// Override how old a cached quota may get before [`Self::quota`]
    /// recomputes it.
    pub fn with_staleness(mut self, staleness: Duration) -> Self {
        self.staleness = staleness;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn limits(&self) -> StorageLimits {
        self.limits
    }

    /// Store a new document as version 1 of a new chain.
    pub fn upload(&self, conn: &Connection, req: &UploadRequest<'_>) -> Result<Document> {
        self.store(
            conn,
            Target {
                user_id: req.user_id,
                assignment_id: req.assignment_id,
                doc_type: req.doc_type,
                chain_root: None,
            },
            &req.file,
        )
    }

    /// Append a version to the chain `parent_id` belongs to. The new row
    /// points at the chain root and gets `max(version) + 1`.
    pub fn new_version(
        &self,
        conn: &Connection,
        user_id: UserId,
        parent_id: i64,
        file: &FilePayload<'_>,
    ) -> Result<Document> {
        let parent = documents::get(conn, parent_id)?;
        if parent.user_id != user_id {
            return Err(StoreError::NotFound);
        }

        self.store(
            conn,
            Target {
                user_id,
                assignment_id: parent.assignment_id,
                doc_type: parent.doc_type,
                chain_root: Some(parent.root_id()),
            },
            file,
        )
    }

    fn store(&self, conn: &Connection, target: Target, file: &FilePayload<'_>) -> Result<Document> {
        let (file_name, mime_type) = validate_file_name(file.file_name)?;
        let size = file.bytes.len() as u64;

        check_limit(QuotaScope::File, 0, size, self.limits.max_file_size)?;

        let tx = conn.unchecked_transaction()?;

        let assignment_used = documents::assignment_usage(&tx, target.assignment_id)?;
        check_limit(
            QuotaScope::Assignment,
            assignment_used,
            size,
            self.limits.max_assignment_size,
        )?;

        let (user_used, _) = documents::user_usage(&tx, target.user_id)?;
        check_limit(QuotaScope::User, user_used, size, self.limits.max_user_quota)?;

        let version = match target.chain_root {
            Some(root_id) => documents::max_chain_version(&tx, root_id)? + 1,
            None => 1,
        };

        let (abs_path, rel_path) = self.write_payload(&target, &file_name, file.bytes)?;

        let new_doc = NewDocument {
            user_id: target.user_id,
            assignment_id: target.assignment_id,
            doc_type: target.doc_type,
            file_name,
            file_path: rel_path,
            file_size: size,
            mime_type: mime_type.to_string(),
            content_hash: hex::encode(blake3::hash(file.bytes).as_bytes()),
            version,
            parent_id: target.chain_root,
        };

        match commit_document(tx, &new_doc) {
            Ok(doc) => {
                info!(
                    id = doc.id,
                    user_id = %doc.user_id,
                    assignment_id = doc.assignment_id,
                    version = doc.version,
                    size,
                    "document stored"
                );
                Ok(doc)
            }
            Err(e) => {
                warn!(path = %abs_path.display(), error = %e, "document insert failed, removing payload");
                remove_quietly(&abs_path);
                Err(e)
            }
        }
    }

    /// Write the payload under a fresh name. Two uploads of the same file
    /// name within one second get distinct paths.
    fn write_payload(
        &self,
        target: &Target,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<(PathBuf, String)> {
        let rel_dir = format!(
            "user_{}/assignment_{}/{}",
            target.user_id,
            target.assignment_id,
            target.doc_type.as_str()
        );
        let dir = self.resolve(&rel_dir)?;
        std::fs::create_dir_all(&dir)?;

        let ts = Utc::now().timestamp();
        for attempt in 0..1000u32 {
            let stored_name = if attempt == 0 {
                format!("{ts}_{file_name}")
            } else {
                format!("{ts}_{attempt}_{file_name}")
            };
            let rel_path = format!("{rel_dir}/{stored_name}");
            let abs_path = self.resolve(&rel_path)?;

            let mut out = match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&abs_path)
            {
                Ok(f) => f,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            };

            if let Err(e) = out.write_all(bytes).and_then(|_| out.sync_all()) {
                remove_quietly(&abs_path);
                return Err(e.into());
            }

            debug!(path = %abs_path.display(), size = bytes.len(), "payload written");
            return Ok((abs_path, rel_path));
        }

        Err(StoreError::Io(std::io::Error::new(
            ErrorKind::AlreadyExists,
            "no free payload name",
        )))
    }

    /// Delete a document owned by `owner`. Deleting a chain root removes
    /// every version; deleting a later version removes only that row.
    /// Missing payload files are ignored.
    pub fn delete(&self, conn: &Connection, owner: UserId, doc_id: i64) -> Result<Vec<Document>> {
        let doc = documents::get(conn, doc_id)?;
        if doc.user_id != owner {
            return Err(StoreError::NotFound);
        }

        let tx = conn.unchecked_transaction()?;
        let victims = if doc.is_root() {
            documents::chain_members(&tx, doc.id)?
        } else {
            vec![doc.clone()]
        };
        // Later versions first so the root goes last.
        for victim in victims.iter().rev() {
            documents::delete(&tx, victim.id)?;
        }
        quota::recompute(&tx, owner)?;
        tx.commit()?;

        let removed = self.remove_files(victims.iter().map(|d| d.file_path.as_str()));
        info!(
            id = doc_id,
            rows = victims.len(),
            files = removed,
            "document deleted"
        );
        Ok(victims)
    }

    /// Remove payload files by relative path. Missing files are skipped and
    /// other failures logged; returns how many files were removed.
    pub fn remove_files<'a>(&self, paths: impl IntoIterator<Item = &'a str>) -> usize {
        let mut removed = 0;
        for rel in paths {
            let path = match self.resolve(rel) {
                Ok(p) => p,
                Err(e) => {
                    warn!(path = rel, error = %e, "refusing to remove payload");
                    continue;
                }
            };
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove payload"),
            }
        }
        removed
    }

    pub fn read(&self, doc: &Document) -> Result<Vec<u8>> {
        let path = self.resolve(&doc.file_path)?;
        Ok(std::fs::read(path)?)
    }

    /// Recompute and cache a user's aggregate usage.
    pub fn recompute_quota(&self, conn: &Connection, user_id: UserId) -> Result<StorageQuota> {
        quota::recompute(conn, user_id)
    }

    /// Usage for display. A cache row that is missing or older than the
    /// staleness window is recomputed first.
    pub fn quota(&self, conn: &Connection, user_id: UserId) -> Result<QuotaInfo> {
        let current = match quota::cached(conn, user_id)? {
            Some(q) if Utc::now() - q.calculated_at <= self.staleness => q,
            _ => quota::recompute(conn, user_id)?,
        };
        Ok(QuotaInfo::new(
            current.total_size,
            current.document_count,
            self.limits.max_user_quota,
        ))
    }

    /// Delete payload files under the root that no row references.
    pub fn sweep_orphans(&self, conn: &Connection) -> Result<usize> {
        let referenced = documents::all_file_paths(conn)?;
        let mut removed = 0;

        for entry in WalkDir::new(&self.root).min_depth(1) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable entry during sweep");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let rel = rel
                .components()
                .filter_map(|c| match c {
                    Component::Normal(s) => s.to_str(),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("/");

            if !referenced.contains(&rel) {
                match std::fs::remove_file(entry.path()) {
                    Ok(()) => {
                        debug!(path = %rel, "removed orphaned payload");
                        removed += 1;
                    }
                    Err(e) => warn!(path = %rel, error = %e, "failed to remove orphan"),
                }
            }
        }

        if removed > 0 {
            info!(removed, "orphan sweep finished");
        }
        Ok(removed)
    }

    /// Absolute path of a stored relative path, confined to the root.
    fn resolve(&self, rel: &str) -> Result<PathBuf> {
        ensure_within(&self.root, &self.root.join(rel))
    }
}

fn commit_document(tx: Transaction<'_>, doc: &NewDocument) -> Result<Document> {
    let stored = documents::insert(&tx, doc)?;
    quota::recompute(&tx, doc.user_id)?;
    tx.commit()?;
    Ok(stored)
}

fn check_limit(scope: QuotaScope, used: u64, incoming: u64, limit: u64) -> Result<()> {
    if used.saturating_add(incoming) > limit {
        return Err(StoreError::QuotaExceeded {
            scope,
            used,
            incoming,
            limit,
        });
    }
    Ok(())
}

/// Reduce a client-supplied name to its last path segment and check the
/// extension against the allow-list. Returns the clean name and its MIME type.
fn validate_file_name(raw: &str) -> Result<(String, &'static str)> {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if name.is_empty() || name == "." || name == ".." {
        return Err(StoreError::InvalidFileName(raw.to_string()));
    }

    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    let mime = mime_for_extension(ext)
        .ok_or_else(|| StoreError::UnsupportedFileType(name.to_string()))?;

    Ok((name.to_string(), mime))
}

/// Verify that a resolved path stays within the expected base directory.
fn ensure_within(base: &Path, target: &Path) -> Result<PathBuf> {
    let canonical_base = base.canonicalize().unwrap_or_else(|_| base.to_path_buf());
    let mut resolved = canonical_base.clone();
    for component in target
        .strip_prefix(base)
        .or_else(|_| target.strip_prefix(&canonical_base))
        .map_err(|_| StoreError::PathTraversal)?
        .components()
    {
        match component {
            Component::Normal(c) => resolved.push(c),
            Component::CurDir => {}
            _ => return Err(StoreError::PathTraversal),
        }
    }
    Ok(resolved)
}

fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove payload");
        }
    }
}
