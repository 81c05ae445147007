//! Per-user session state shared by every command.
//!
//! A [`Session`] owns the local store handle, the document manager, the
//! remote API client and, once started, the push client and event
//! dispatcher. Nothing here is global: callers pass the session to the
//! commands that need it.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use coursync_shared::types::UserId;
use coursync_store::{Database, DocumentManager};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::api::{HttpApi, RemoteApi};
use crate::config::ClientConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{ClientError, Result};
use crate::events::{LogNotifier, Notifier};
use crate::push::{PushClient, PushHandle};
use crate::reconcile::{self, ReconcileReport};

/// The local store behind the single connection mutex.
pub type SharedStore = Arc<Mutex<Database>>;

pub(crate) fn lock_store(store: &SharedStore) -> Result<MutexGuard<'_, Database>> {
    store.lock().map_err(|_| ClientError::LockPoisoned)
}

/// Tasks running while the session is started.
struct Background {
    push: PushHandle,
    stop: watch::Sender<bool>,
    dispatcher: JoinHandle<()>,
}

pub struct Session {
    config: ClientConfig,
    user_id: UserId,

    /// `None` when the local store could not be opened. The session then
    /// runs without persistence and store-backed commands fail.
    store: Option<SharedStore>,

    documents: Option<Arc<DocumentManager>>,
    api: Arc<dyn RemoteApi>,
    notifier: Arc<dyn Notifier>,
    background: Option<Background>,
}

impl Session {
    /// Open the session of `user_id`, placing the store and document root
    /// under the configured data directory.
    pub fn open(config: ClientConfig, user_id: UserId) -> Self {
        let api: Arc<dyn RemoteApi> = Arc::new(HttpApi::new(config.server_url.clone(), user_id));
        let mut session = Self {
            store: None,
            documents: None,
            api,
            notifier: Arc::new(LogNotifier),
            background: None,
            config,
            user_id,
        };

        match session.config.resolve_data_dir() {
            Some(root) => {
                let user_dir = root.join(format!("user_{user_id}"));
                session.store = open_store(&user_dir);
                session.documents = open_documents(&user_dir, &session.config);
            }
            None => warn!("no data directory available, running without persistence"),
        }

        session
    }

    /// Assemble a session from explicit parts.
    pub fn with_parts(
        config: ClientConfig,
        user_id: UserId,
        store: Option<Database>,
        documents: Option<DocumentManager>,
        api: Arc<dyn RemoteApi>,
    ) -> Self {
        Self {
            config,
            user_id,
            store: store.map(|db| Arc::new(Mutex::new(db))),
            documents: documents.map(Arc::new),
            api,
            notifier: Arc::new(LogNotifier),
            background: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn api(&self) -> &dyn RemoteApi {
        self.api.as_ref()
    }

    pub fn has_persistence(&self) -> bool {
        self.store.is_some()
    }

    pub fn store(&self) -> Result<&SharedStore> {
        self.store.as_ref().ok_or(ClientError::NoPersistence)
    }

    pub fn documents(&self) -> Result<&Arc<DocumentManager>> {
        self.documents.as_ref().ok_or(ClientError::NoPersistence)
    }

    pub fn is_started(&self) -> bool {
        self.background.is_some()
    }

    /// Run after a successful login: reconcile with the remote store, then
    /// open the push stream and start the dispatcher. A failed pull is
    /// logged and does not prevent the session from starting.
    pub async fn start(&mut self) -> Result<Option<ReconcileReport>> {
        let store = self.store()?.clone();

        let report = match reconcile::reconcile(&store, self.api.as_ref()).await {
            Ok(report) => {
                info!(user_id = %self.user_id, ?report, "reconciliation finished");
                Some(report)
            }
            Err(e) => {
                warn!(user_id = %self.user_id, error = %e, "reconciliation failed, continuing offline");
                None
            }
        };

        if self.config.push_enabled && self.background.is_none() {
            let client = PushClient::new(
                &self.config.server_url,
                self.user_id,
                self.config.reconnect_backoff,
            );
            let (push, channels) = client.spawn();
            let (stop, stop_rx) = watch::channel(false);
            let dispatcher = Dispatcher::new(store, self.documents.clone(), self.notifier.clone());
            let dispatcher = tokio::spawn(dispatcher.run(channels, stop_rx));

            self.background = Some(Background {
                push,
                stop,
                dispatcher,
            });
            info!(user_id = %self.user_id, "push pipeline started");
        }

        Ok(report)
    }

    /// Stop the push client and the dispatcher and wait for both.
    pub async fn stop(&mut self) {
        let Some(background) = self.background.take() else {
            return;
        };

        background.stop.send_replace(true);
        background.push.shutdown().await;
        if let Err(e) = background.dispatcher.await {
            warn!(error = %e, "dispatcher ended abnormally");
        }
        info!(user_id = %self.user_id, "push pipeline stopped");
    }
}

fn open_store(user_dir: &Path) -> Option<SharedStore> {
    let opened = std::fs::create_dir_all(user_dir)
        .map_err(coursync_store::StoreError::from)
        .and_then(|()| Database::open_at(&user_dir.join("coursync.db")));
    match opened {
        Ok(db) => {
            info!(path = %user_dir.display(), "local store opened");
            Some(Arc::new(Mutex::new(db)))
        }
        Err(e) => {
            warn!(error = %e, "failed to open local store, running without persistence");
            None
        }
    }
}

fn open_documents(user_dir: &Path, config: &ClientConfig) -> Option<Arc<DocumentManager>> {
    match DocumentManager::new(user_dir.join("documents"), config.storage_limits) {
        Ok(manager) => Some(Arc::new(manager)),
        Err(e) => {
            warn!(error = %e, "failed to open document root, documents unavailable");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn unwritable_data_dir_degrades_to_no_persistence() {
        let dir = tempfile::TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let config = ClientConfig {
            data_dir: Some(PathBuf::from(&blocker)),
            push_enabled: false,
            ..Default::default()
        };
        let session = Session::open(config, UserId(1));
        assert!(!session.has_persistence());
        assert!(matches!(session.store(), Err(ClientError::NoPersistence)));
    }

    #[test]
    fn open_creates_per_user_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = ClientConfig {
            data_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let session = Session::open(config, UserId(7));
        assert!(session.has_persistence());
        assert!(dir.path().join("user_7").join("coursync.db").exists());
    }
}
