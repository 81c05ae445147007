//! Conversions shared by the record modules.

use chrono::{DateTime, Utc};
use coursync_shared::types::{parse_timestamp, SyncStatus};
use rusqlite::types::{Type, Value as SqlValue};
use rusqlite::{params, Connection};
use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::models::SyncState;

#[derive(Debug)]
struct Invalid(String);

impl std::fmt::Display for Invalid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for Invalid {}

pub(crate) fn conversion_error(
    idx: usize,
    ty: Type,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(e))
}

pub(crate) fn timestamp(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    parse_timestamp(s)
        .ok_or_else(|| conversion_error(idx, Type::Text, Invalid(format!("bad timestamp {s:?}"))))
}

pub(crate) fn optional_timestamp(
    idx: usize,
    s: Option<String>,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.map(|s| timestamp(idx, &s)).transpose()
}

/// Rebuild a [`SyncState`] from the three columns that encode it. `idx` is
/// the column index of `sync_status`.
pub(crate) fn sync_state(
    idx: usize,
    status: &str,
    remote_id: Option<i64>,
    external_id: Option<String>,
) -> rusqlite::Result<SyncState> {
    let status: SyncStatus = status
        .parse()
        .map_err(|e| conversion_error(idx, Type::Text, e))?;
    match (status, remote_id, external_id) {
        (SyncStatus::Pending, None, None) => Ok(SyncState::Pending),
        (SyncStatus::Synced, Some(remote_id), Some(external_id)) => Ok(SyncState::Synced {
            remote_id,
            external_id,
        }),
        (status, remote_id, external_id) => Err(conversion_error(
            idx,
            Type::Text,
            Invalid(format!(
                "inconsistent sync state {} (remote_id={remote_id:?}, external_id={external_id:?})",
                status.as_str()
            )),
        )),
    }
}

/// Fail with [`StoreError::AlreadySynced`] unless row `id` of `table` is
/// still pending.
pub(crate) fn ensure_pending(conn: &Connection, table: &'static str, id: i64) -> Result<()> {
    let status: String = conn
        .query_row(
            &format!("SELECT sync_status FROM {table} WHERE id = ?1"),
            params![id],
            |row| row.get(0),
        )
        .map_err(StoreError::from_query)?;
    if status != SyncStatus::Pending.as_str() {
        return Err(StoreError::AlreadySynced { table, id });
    }
    Ok(())
}

/// Convert a normalized JSON column value into its SQLite form.
pub(crate) fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn inconsistent_state_is_rejected() {
        assert!(sync_state(0, "synced", Some(1), None).is_err());
        assert!(sync_state(0, "pending", None, Some("x".into())).is_err());
        assert_eq!(sync_state(0, "pending", None, None).unwrap(), SyncState::Pending);
    }

    #[test]
    fn json_values_map_to_sqlite() {
        assert_eq!(json_to_sql(&json!(true)), SqlValue::Integer(1));
        assert_eq!(json_to_sql(&json!(6)), SqlValue::Integer(6));
        assert_eq!(json_to_sql(&json!("x")), SqlValue::Text("x".into()));
        assert_eq!(json_to_sql(&Value::Null), SqlValue::Null);
    }
}
