//! Desktop-side sync library.
//!
//! A [`Session`] ties together the per-user local store, the document
//! manager and the HTTP client for the coursync server. Commands under
//! [`commands`] write locally first and mirror to the server; once the
//! session is started, remote changes stream in through the push client
//! and are applied by the dispatcher.

pub mod api;
pub mod commands;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod push;
pub mod reconcile;
pub mod state;

pub use api::{HttpApi, RemoteApi};
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use events::{ChannelNotifier, LogNotifier, Notifier, UserNotification};
pub use push::{PushChannels, PushClient, PushError, PushHandle};
pub use reconcile::ReconcileReport;
pub use state::{Session, SharedStore};

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter. Calling it twice is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("coursync_client=debug,coursync_store=info,warn"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
