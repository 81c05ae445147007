//! Per-user push mailboxes and the streaming response that drains them.
//!
//! Each connected user owns one bounded mailbox. Publishing never blocks:
//! a full mailbox drops the notification. Delivery is at-most-once and
//! anything published while the user is offline is lost.
//!
//! Registering again for a user replaces the old mailbox. The old sender is
//! dropped, which ends the superseded stream; every registration carries a
//! generation id so that stream's teardown cannot remove the newer mailbox.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use coursync_shared::protocol::{PushNotification, HEARTBEAT_COMMENT};
use coursync_shared::types::UserId;
use futures::stream::{self, Stream};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use uuid::Uuid;

struct Mailbox {
    generation: Uuid,
    tx: mpsc::Sender<String>,
}

/// A live registration. Frames arrive already serialized.
pub struct Registration {
    pub user_id: UserId,
    pub generation: Uuid,
    pub receiver: mpsc::Receiver<String>,
}

pub struct PushHub {
    mailboxes: RwLock<HashMap<UserId, Mailbox>>,
    capacity: usize,
}

impl PushHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            mailboxes: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Open a fresh mailbox for `user_id`, replacing any existing one.
    pub fn register(&self, user_id: UserId) -> Registration {
        let (tx, receiver) = mpsc::channel(self.capacity);
        let generation = Uuid::new_v4();

        let replaced = self
            .mailboxes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user_id, Mailbox { generation, tx });

        if replaced.is_some() {
            info!(%user_id, "push mailbox replaced by a newer connection");
        } else {
            info!(%user_id, "push mailbox registered");
        }

        Registration {
            user_id,
            generation,
            receiver,
        }
    }

    /// Close and remove the user's mailbox. Safe when none exists.
    pub fn unregister(&self, user_id: UserId) {
        let removed = self
            .mailboxes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&user_id);
        if removed.is_some() {
            info!(%user_id, "push mailbox unregistered");
        }
    }

    /// Remove the mailbox only if it still belongs to `generation`.
    pub fn release(&self, user_id: UserId, generation: Uuid) -> bool {
        let mut mailboxes = self
            .mailboxes
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match mailboxes.get(&user_id) {
            Some(mailbox) if mailbox.generation == generation => {
                mailboxes.remove(&user_id);
                info!(%user_id, "push mailbox released");
                true
            }
            _ => false,
        }
    }

    /// Enqueue a notification for one user. Returns whether it was queued;
    /// offline users and full mailboxes both drop it.
    pub fn publish(&self, user_id: UserId, notification: &PushNotification) -> bool {
        let Some(frame) = serialize(notification) else {
            return false;
        };

        let mailboxes = self
            .mailboxes
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(mailbox) = mailboxes.get(&user_id) else {
            debug!(%user_id, "no push mailbox, notification dropped");
            return false;
        };
        offer(user_id, mailbox, frame)
    }

    /// Best-effort enqueue to every mailbox. Returns how many accepted it.
    pub fn broadcast(&self, notification: &PushNotification) -> usize {
        let Some(frame) = serialize(notification) else {
            return 0;
        };

        let mailboxes = self
            .mailboxes
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        mailboxes
            .iter()
            .filter(|(user_id, mailbox)| offer(**user_id, mailbox, frame.clone()))
            .count()
    }

    pub fn is_connected(&self, user_id: UserId) -> bool {
        self.mailboxes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&user_id)
    }

    pub fn connection_count(&self) -> usize {
        self.mailboxes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

fn serialize(notification: &PushNotification) -> Option<String> {
    match serde_json::to_string(notification) {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!(error = %e, "failed to serialize push notification");
            None
        }
    }
}

fn offer(user_id: UserId, mailbox: &Mailbox, frame: String) -> bool {
    match mailbox.tx.try_send(frame) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!(%user_id, "push mailbox full, notification dropped");
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!(%user_id, "push mailbox closed, notification dropped");
            false
        }
    }
}

/// Releases the mailbox when the response stream is dropped, which is how
/// axum reports a client disconnect.
struct ReleaseOnDrop {
    hub: Arc<PushHub>,
    user_id: UserId,
    generation: Uuid,
}

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        self.hub.release(self.user_id, self.generation);
    }
}

/// Turn a registration into a server-sent-event response: one `data:` frame
/// per mailbox message and a heartbeat comment every `heartbeat`.
pub fn event_stream(
    hub: Arc<PushHub>,
    registration: Registration,
    heartbeat: Duration,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let guard = ReleaseOnDrop {
        hub,
        user_id: registration.user_id,
        generation: registration.generation,
    };

    let frames = stream::unfold(
        (registration.receiver, guard),
        |(mut receiver, guard)| async move {
            let frame = receiver.recv().await?;
            Some((Ok(Event::default().data(frame)), (receiver, guard)))
        },
    );

    Sse::new(frames).keep_alive(
        KeepAlive::new()
            .interval(heartbeat)
            .text(HEARTBEAT_COMMENT),
    )
}
