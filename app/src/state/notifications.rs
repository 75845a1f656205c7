//! Notification store: the visible toast feed behind a lock.

use std::sync::{Arc, RwLock};

use chrono::Utc;

pub use matchsync::{Notification, NotificationFeed, Toast};

use crate::bus::{ChangeReceiver, ChangeSender};

struct NotificationStoreInner {
    feed: RwLock<NotificationFeed>,
    changes: ChangeSender<Vec<Toast>>,
}

/// Read-only view of the visible toasts.
#[derive(Clone)]
pub struct NotificationStore {
    inner: Arc<NotificationStoreInner>,
}

/// Write handle. Held by the notification reconciler and `ClientState`.
#[derive(Clone)]
pub struct NotificationStoreWriter {
    inner: Arc<NotificationStoreInner>,
}

impl NotificationStore {
    pub fn new(max_toasts: usize) -> (Self, NotificationStoreWriter) {
        let inner = Arc::new(NotificationStoreInner {
            feed: RwLock::new(NotificationFeed::new(max_toasts)),
            changes: ChangeSender::new(),
        });
        (
            Self {
                inner: Arc::clone(&inner),
            },
            NotificationStoreWriter { inner },
        )
    }

    /// Visible toasts, oldest first.
    pub fn snapshot(&self) -> Vec<Toast> {
        self.inner
            .feed
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .toasts()
            .cloned()
            .collect()
    }

    /// Receive the full toast list after every change.
    pub fn subscribe(&self) -> ChangeReceiver<Vec<Toast>> {
        self.inner.changes.subscribe()
    }
}

impl NotificationStoreWriter {
    /// Show a notification. Returns `false` for an already-seen id.
    pub fn push(&self, notification: Notification) -> bool {
        self.mutate(|feed| feed.push(notification, Utc::now()))
    }

    pub fn dismiss(&self, notification_id: &str) -> bool {
        self.mutate(|feed| feed.dismiss(notification_id))
    }

    pub fn clear(&self) {
        self.mutate(|feed| {
            let had_toasts = !feed.is_empty();
            feed.clear();
            had_toasts
        });
    }

    /// Run `f` on the feed and publish the toast list if it reports a change.
    fn mutate(&self, f: impl FnOnce(&mut NotificationFeed) -> bool) -> bool {
        let mut feed = self.inner.feed.write().unwrap_or_else(|e| e.into_inner());
        let changed = f(&mut feed);
        if changed {
            self.inner.changes.send(feed.toasts().cloned().collect());
        }
        changed
    }
}
