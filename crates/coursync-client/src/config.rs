//! Client configuration loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use coursync_shared::constants::{DEFAULT_HTTP_PORT, RECONNECT_BACKOFF_SECS};
use coursync_store::database::default_data_dir;
use coursync_store::StorageLimits;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the coursync server, without a trailing slash.
    /// Env: `COURSYNC_SERVER_URL`
    pub server_url: String,

    /// Root of the per-user databases and document payloads. `None` falls
    /// back to the platform data directory.
    /// Env: `COURSYNC_DATA_DIR`
    pub data_dir: Option<PathBuf>,

    /// Fixed delay between push stream reconnect attempts.
    /// Env: `COURSYNC_RECONNECT_SECS`
    pub reconnect_backoff: Duration,

    /// Whether a session opens the push stream on start.
    /// Env: `COURSYNC_PUSH`
    pub push_enabled: bool,

    pub storage_limits: StorageLimits,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: format!("http://127.0.0.1:{DEFAULT_HTTP_PORT}"),
            data_dir: None,
            reconnect_backoff: Duration::from_secs(RECONNECT_BACKOFF_SECS),
            push_enabled: true,
            storage_limits: StorageLimits::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("COURSYNC_SERVER_URL") {
            let url = url.trim().trim_end_matches('/');
            if !url.is_empty() {
                config.server_url = url.to_string();
            }
        }

        if let Ok(dir) = std::env::var("COURSYNC_DATA_DIR") {
            if !dir.trim().is_empty() {
                config.data_dir = Some(PathBuf::from(dir));
            }
        }

        if let Some(secs) = parse_var::<u64>("COURSYNC_RECONNECT_SECS") {
            config.reconnect_backoff = Duration::from_secs(secs.max(1));
        }

        if let Ok(raw) = std::env::var("COURSYNC_PUSH") {
            match raw.trim().to_ascii_lowercase().as_str() {
                "0" | "false" | "off" | "no" => config.push_enabled = false,
                "1" | "true" | "on" | "yes" => config.push_enabled = true,
                _ => tracing::warn!(var = "COURSYNC_PUSH", value = %raw, "Invalid value, using default"),
            }
        }

        config
    }

    /// Directory resolved for data, falling back to the platform default.
    pub fn resolve_data_dir(&self) -> Option<PathBuf> {
        match &self.data_dir {
            Some(dir) => Some(dir.clone()),
            None => default_data_dir().ok(),
        }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.server_url, "http://127.0.0.1:8080");
        assert_eq!(config.reconnect_backoff, Duration::from_secs(5));
        assert!(config.push_enabled);
    }

    #[test]
    fn explicit_data_dir_wins() {
        let config = ClientConfig {
            data_dir: Some(PathBuf::from("/tmp/coursync-test")),
            ..Default::default()
        };
        assert_eq!(
            config.resolve_data_dir(),
            Some(PathBuf::from("/tmp/coursync-test"))
        );
    }
}
