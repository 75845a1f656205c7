//! User notifications and the bounded toast feed they surface through.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::id_string;

/// `notification` event payload on the user namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(deserialize_with = "id_string")]
    pub notification_id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub data: Value,
}

/// A notification currently visible to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Toast {
    pub notification: Notification,
    pub shown_at: DateTime<Utc>,
}

/// Bounded queue of visible toasts, newest last.
///
/// A notification id is shown at most once per feed, even after its toast
/// was dismissed or evicted. The remembered ids are bounded as well.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationFeed {
    capacity: usize,
    toasts: VecDeque<Toast>,
    seen: VecDeque<String>,
}

const SEEN_PER_SLOT: usize = 16;

impl NotificationFeed {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            toasts: VecDeque::new(),
            seen: VecDeque::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn toasts(&self) -> impl Iterator<Item = &Toast> {
        self.toasts.iter()
    }

    pub fn len(&self) -> usize {
        self.toasts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.toasts.is_empty()
    }

    /// Show a notification. Returns `false` if its id was already seen.
    /// The oldest toast is evicted when the feed is full.
    pub fn push(&mut self, notification: Notification, now: DateTime<Utc>) -> bool {
        if self.seen.iter().any(|id| *id == notification.notification_id) {
            return false;
        }
        self.seen.push_back(notification.notification_id.clone());
        if self.seen.len() > self.capacity * SEEN_PER_SLOT {
            self.seen.pop_front();
        }

        if self.toasts.len() == self.capacity {
            self.toasts.pop_front();
        }
        self.toasts.push_back(Toast {
            notification,
            shown_at: now,
        });
        true
    }

    /// Hide one toast. Returns `false` if no visible toast has that id.
    pub fn dismiss(&mut self, notification_id: &str) -> bool {
        let before = self.toasts.len();
        self.toasts
            .retain(|t| t.notification.notification_id != notification_id);
        self.toasts.len() != before
    }

    /// Hide every toast and forget seen ids.
    pub fn clear(&mut self) {
        self.toasts.clear();
        self.seen.clear();
    }
}
