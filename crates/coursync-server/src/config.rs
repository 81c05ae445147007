//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use coursync_shared::constants::{DEFAULT_HTTP_PORT, HEARTBEAT_SECS, MAILBOX_CAPACITY};
use coursync_store::StorageLimits;

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite file of the remote store.
    /// Env: `DATABASE_PATH`
    /// Default: `./coursync-server.db`
    pub database_path: PathBuf,

    /// Directory where document payloads are stored.
    /// Env: `DOCUMENT_STORAGE_PATH`
    /// Default: `./documents`
    pub document_storage_path: PathBuf,

    /// Interval between heartbeat comments on open push streams.
    /// Env: `HEARTBEAT_SECS`
    pub heartbeat: Duration,

    /// Per-user push mailbox capacity.
    /// Env: `MAILBOX_CAPACITY`
    pub mailbox_capacity: usize,

    /// Upload limits. Not configurable from the environment.
    pub storage_limits: StorageLimits,

    /// Notion integration token. Without it records are kept in an
    /// in-process external store.
    /// Env: `NOTION_API_KEY`
    pub notion_api_key: Option<String>,

    /// Env: `NOTION_ASSIGNMENTS_DB`
    pub notion_assignments_db: String,

    /// Env: `NOTION_COURSES_DB`
    pub notion_courses_db: String,

    /// Shared secret expected on webhook deliveries. Webhooks are refused
    /// while unset.
    /// Env: `WEBHOOK_SECRET`
    pub webhook_secret: Option<String>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("document_storage_path", &self.document_storage_path)
            .field("heartbeat", &self.heartbeat)
            .field("mailbox_capacity", &self.mailbox_capacity)
            .field("storage_limits", &self.storage_limits)
            .field("notion_enabled", &self.notion_api_key.is_some())
            .field("webhook_enabled", &self.webhook_secret.is_some())
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./coursync-server.db"),
            document_storage_path: PathBuf::from("./documents"),
            heartbeat: Duration::from_secs(HEARTBEAT_SECS),
            mailbox_capacity: MAILBOX_CAPACITY,
            storage_limits: StorageLimits::default(),
            notion_api_key: None,
            notion_assignments_db: String::new(),
            notion_courses_db: String::new(),
            webhook_secret: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(addr) = parse_var::<SocketAddr>("HTTP_ADDR") {
            config.http_addr = addr;
        }

        if let Ok(path) = std::env::var("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("DOCUMENT_STORAGE_PATH") {
            config.document_storage_path = PathBuf::from(path);
        }

        if let Some(secs) = parse_var::<u64>("HEARTBEAT_SECS") {
            if secs > 0 {
                config.heartbeat = Duration::from_secs(secs);
            }
        }

        if let Some(capacity) = parse_var::<usize>("MAILBOX_CAPACITY") {
            if capacity > 0 {
                config.mailbox_capacity = capacity;
            }
        }

        config.notion_api_key = non_empty_var("NOTION_API_KEY");
        if let Some(id) = non_empty_var("NOTION_ASSIGNMENTS_DB") {
            config.notion_assignments_db = id;
        }
        if let Some(id) = non_empty_var("NOTION_COURSES_DB") {
            config.notion_courses_db = id;
        }

        config.webhook_secret = non_empty_var("WEBHOOK_SECRET");

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "Invalid value, using default");
            None
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
