use sheetmirror_api::{Collection, Notification};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Fan-out of user-facing notices.
///
/// Sends are fire-and-forget: with no subscriber the notice is only logged.
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        Self {
            tx: broadcast::channel(capacity).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn syncing(&self, collection: Collection, label: impl Into<String>) {
        let label = label.into();
        info!("[Notifier] Syncing {}: {}", collection, label);
        self.emit(Notification::Syncing { collection, label });
    }

    pub fn sync_cleared(&self) {
        self.emit(Notification::SyncCleared);
    }

    pub fn success(&self, message: impl Into<String>) {
        let message = message.into();
        info!("[Notifier] {}", message);
        self.emit(Notification::Success(message));
    }

    pub fn warning(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("[Notifier] {}", message);
        self.emit(Notification::Warning(message));
    }

    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        error!("[Notifier] {}", message);
        self.emit(Notification::Error(message));
    }

    fn emit(&self, notification: Notification) {
        let _ = self.tx.send(notification);
    }
}
