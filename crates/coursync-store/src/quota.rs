use chrono::Utc;
use coursync_shared::types::{format_timestamp, UserId};
use rusqlite::{params, Connection, OptionalExtension};

use crate::documents;
use crate::error::Result;
use crate::models::StorageQuota;
use crate::rows;

/// Recompute a user's aggregate from `documents` and overwrite the cache row.
pub fn recompute(conn: &Connection, user_id: UserId) -> Result<StorageQuota> {
    let (total_size, document_count) = documents::user_usage(conn, user_id)?;
    let calculated_at = Utc::now();

    conn.execute(
        "INSERT INTO storage_quota (user_id, total_size, document_count, calculated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(user_id) DO UPDATE SET
             total_size = excluded.total_size,
             document_count = excluded.document_count,
             calculated_at = excluded.calculated_at",
        params![
            user_id.0,
            total_size as i64,
            document_count as i64,
            format_timestamp(&calculated_at)
        ],
    )?;

    tracing::debug!(%user_id, total_size, document_count, "storage quota recomputed");

    Ok(StorageQuota {
        user_id,
        total_size,
        document_count,
        calculated_at,
    })
}

pub fn cached(conn: &Connection, user_id: UserId) -> Result<Option<StorageQuota>> {
    Ok(conn
        .query_row(
            "SELECT total_size, document_count, calculated_at FROM storage_quota
             WHERE user_id = ?1",
            params![user_id.0],
            |row| {
                let total_size: i64 = row.get(0)?;
                let document_count: i64 = row.get(1)?;
                let calculated_at: String = row.get(2)?;
                Ok(StorageQuota {
                    user_id,
                    total_size: total_size.max(0) as u64,
                    document_count: document_count.max(0) as u64,
                    calculated_at: rows::timestamp(2, &calculated_at)?,
                })
            },
        )
        .optional()?)
}
