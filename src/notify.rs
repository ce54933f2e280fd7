//! Toast notifications and the sinks that deliver them.

use tokio::sync::mpsc;
use tracing::info;

/// Transient user-visible notice for a new message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub conversation_id: String,
    /// Display name of the sender.
    pub title: String,
    /// Truncated message preview.
    pub body: String,
    pub avatar: Option<String>,
}

/// Destination for notifications produced by the event dispatcher.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        info!(
            conversation_id = %notification.conversation_id,
            title = %notification.title,
            body = %notification.body,
            "new message"
        );
    }
}

/// Forwards notifications to a UI task over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notification: Notification) {
        // Receiver gone means nobody is rendering toasts anymore.
        let _ = self.tx.send(notification);
    }
}
