//! User-facing notifications raised when a remote change is applied.

use chrono::Local;
use coursync_shared::types::ChangeKind;
use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserNotification {
    /// Groups repeats of the same change on the desktop, e.g. `page-1-updated`.
    pub group: String,
    pub title: String,
    pub subtitle: String,
    pub message: String,
}

impl UserNotification {
    pub fn new(external_id: &str, kind: ChangeKind, title: String, message: String) -> Self {
        let action = kind.past_tense();
        Self {
            group: format!("{external_id}-{action}"),
            title,
            subtitle: format!("{action} at {}", Local::now().format("%H:%M")),
            message,
        }
    }
}

/// Sink for user notifications. The desktop shell provides the real one.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &UserNotification);
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, n: &UserNotification) {
        tracing::info!(group = %n.group, title = %n.title, subtitle = %n.subtitle, "{}", n.message);
    }
}

/// Forwards notifications to a channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<UserNotification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UserNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notification: &UserNotification) {
        if self.tx.send(notification.clone()).is_err() {
            tracing::debug!("notification receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_combines_id_and_action() {
        let n = UserNotification::new(
            "page-1",
            ChangeKind::Update,
            "CS101: Lab".into(),
            "Lab changed".into(),
        );
        assert_eq!(n.group, "page-1-updated");
        assert!(n.subtitle.starts_with("updated at "));
    }
}
