//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation. Record helpers are free
//! functions over `&Connection` so they compose inside a
//! [`rusqlite::Transaction`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use coursync_shared::types::{Entity, UserId};
use directories::ProjectDirs;
use rusqlite::{Connection, Transaction};

use crate::error::{Result, StoreError};
use crate::migrations;

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
    /// Records whose create round trip is running, by entity and local id.
    in_flight: HashSet<(Entity, i64)>,
}

impl Database {
    /// Open (or create) the default database of one user.
    ///
    /// The file is placed in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/coursync/user_<id>/coursync.db`
    /// - macOS:   `~/Library/Application Support/com.coursync.coursync/user_<id>/coursync.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\coursync\coursync\data\user_<id>\coursync.db`
    pub fn open_default(user_id: UserId) -> Result<Self> {
        let data_dir = default_data_dir()?.join(format!("user_{user_id}"));
        std::fs::create_dir_all(&data_dir)?;

        let db_path = data_dir.join("coursync.db");

        tracing::info!(path = %db_path.display(), "opening database");

        Self::open_at(&db_path)
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open a private in-memory database. Used when nothing may touch disk.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run_migrations(&conn)?;

        Ok(Self {
            conn,
            in_flight: HashSet::new(),
        })
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Begin a transaction. Every multi-row change goes through one of these
    /// so a failure leaves the store untouched.
    pub fn transaction(&mut self) -> Result<Transaction<'_>> {
        Ok(self.conn.transaction()?)
    }

    /// Claim the create round trip of one record. Returns `false` when
    /// another round trip for the same record is still running.
    pub fn claim_round_trip(&mut self, entity: Entity, local_id: i64) -> bool {
        self.in_flight.insert((entity, local_id))
    }

    pub fn release_round_trip(&mut self, entity: Entity, local_id: i64) {
        self.in_flight.remove(&(entity, local_id));
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }
}

/// Platform data directory shared by the database and document payloads.
pub fn default_data_dir() -> Result<PathBuf> {
    let project_dirs =
        ProjectDirs::from("com", "coursync", "coursync").ok_or(StoreError::NoDataDir)?;
    Ok(project_dirs.data_dir().to_path_buf())
}
