//! # coursync-store
//!
//! Local offline store of the coursync client, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection`, record modules whose helpers take `&Connection`
//! (so they run unchanged inside a transaction), and the
//! [`DocumentManager`] which owns document payloads on disk. The document
//! tables are shared with the server, which reuses [`documents`] and
//! [`DocumentManager`] over its own connection.

pub mod assignments;
pub mod cascade;
pub mod courses;
pub mod database;
pub mod documents;
pub mod manager;
pub mod migrations;
pub mod mirrors;
pub mod models;
pub mod pending;
pub mod quota;

mod error;
mod rows;

#[cfg(test)]
mod testutil;

pub use database::Database;
pub use error::{QuotaScope, Result, StoreError};
pub use manager::{DocumentManager, FilePayload, StorageLimits, UploadRequest};
pub use models::*;
