//! Queue of column edits made to records that are not synced yet.
//!
//! Entries are replayed in insertion order once the record's create round
//! trip succeeds, then removed.

use chrono::Utc;
use coursync_shared::types::{format_timestamp, Entity};
use rusqlite::types::Type;
use rusqlite::{params, Connection};
use serde_json::Value;

use crate::error::Result;
use crate::models::PendingUpdate;
use crate::rows;

pub fn enqueue(
    conn: &Connection,
    entity: Entity,
    local_id: i64,
    column: &str,
    value: &Value,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO pending_updates (entity, local_id, column_name, value_json, queued_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            entity.as_str(),
            local_id,
            column,
            serde_json::to_string(value).map_err(coursync_shared::ProtocolError::from)?,
            format_timestamp(&Utc::now()),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn list_for(conn: &Connection, entity: Entity, local_id: i64) -> Result<Vec<PendingUpdate>> {
    let mut stmt = conn.prepare(
        "SELECT id, entity, local_id, column_name, value_json, queued_at
         FROM pending_updates
         WHERE entity = ?1 AND local_id = ?2
         ORDER BY id",
    )?;
    let rows = stmt.query_map(params![entity.as_str(), local_id], row_to_update)?;

    let mut updates = Vec::new();
    for row in rows {
        updates.push(row?);
    }
    Ok(updates)
}

pub fn remove(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM pending_updates WHERE id = ?1", params![id])?;
    Ok(())
}

/// Drop the queue of a deleted record.
pub fn clear_for(conn: &Connection, entity: Entity, local_id: i64) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM pending_updates WHERE entity = ?1 AND local_id = ?2",
        params![entity.as_str(), local_id],
    )?)
}

/// Records that still have queued edits, courses first, each once.
pub fn queued_records(conn: &Connection) -> Result<Vec<(Entity, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT entity, local_id FROM pending_updates
         GROUP BY entity, local_id
         ORDER BY entity = 'assignment', MIN(id)",
    )?;
    let rows = stmt.query_map([], |row| {
        let entity: String = row.get(0)?;
        Ok((parse_entity(&entity), row.get::<_, i64>(1)?))
    })?;

    let mut records = Vec::new();
    for row in rows {
        records.push(row?);
    }
    Ok(records)
}

fn parse_entity(s: &str) -> Entity {
    match s {
        "assignment" => Entity::Assignment,
        "course" => Entity::Course,
        _ => Entity::Unknown,
    }
}

fn row_to_update(row: &rusqlite::Row<'_>) -> rusqlite::Result<PendingUpdate> {
    let entity: String = row.get(1)?;
    let value_json: String = row.get(4)?;
    let queued_at: String = row.get(5)?;

    Ok(PendingUpdate {
        id: row.get(0)?,
        entity: parse_entity(&entity),
        local_id: row.get(2)?,
        column: row.get(3)?,
        value: serde_json::from_str(&value_json)
            .map_err(|e| rows::conversion_error(4, Type::Text, e))?,
        queued_at: rows::timestamp(5, &queued_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use serde_json::json;

    #[test]
    fn queue_preserves_order_per_record() {
        let db = Database::open_in_memory().unwrap();
        enqueue(db.conn(), Entity::Assignment, 1, "title", &json!("A")).unwrap();
        enqueue(db.conn(), Entity::Assignment, 2, "title", &json!("other")).unwrap();
        enqueue(db.conn(), Entity::Assignment, 1, "completed", &json!(true)).unwrap();
        enqueue(db.conn(), Entity::Course, 1, "name", &json!("course")).unwrap();

        let queued = list_for(db.conn(), Entity::Assignment, 1).unwrap();
        let columns: Vec<_> = queued.iter().map(|u| u.column.as_str()).collect();
        assert_eq!(columns, ["title", "completed"]);
        assert_eq!(queued[1].value, json!(true));

        remove(db.conn(), queued[0].id).unwrap();
        assert_eq!(list_for(db.conn(), Entity::Assignment, 1).unwrap().len(), 1);

        assert_eq!(
            queued_records(db.conn()).unwrap(),
            vec![
                (Entity::Course, 1),
                (Entity::Assignment, 2),
                (Entity::Assignment, 1)
            ]
        );

        assert_eq!(clear_for(db.conn(), Entity::Assignment, 1).unwrap(), 1);
        assert_eq!(list_for(db.conn(), Entity::Course, 1).unwrap().len(), 1);
    }
}
