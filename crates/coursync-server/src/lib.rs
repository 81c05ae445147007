//! # coursync-server
//!
//! Authoritative remote store of the coursync pipeline.
//!
//! This crate provides:
//! - **REST API** (axum) for course and assignment records, scoped by the
//!   `x-user-id` header and mirrored into an external record store
//! - **Push channel**: one bounded mailbox per connected user, drained as a
//!   server-sent-event stream with periodic heartbeats
//! - **Webhook ingress** that applies external changes and pushes them to
//!   the owning user
//! - **Document storage** with version chains and a three-tier quota

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod documents;
pub mod error;
pub mod external;
pub mod push;
pub mod webhook;

pub use api::{build_router, serve, serve_on, AppState};
pub use config::ServerConfig;
pub use db::RemoteDb;
pub use error::ServerError;
pub use push::PushHub;
