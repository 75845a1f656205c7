//! Reconcilers: mount-scoped glue between namespace channels and stores.
//!
//! A mount registers handlers on a shared channel and must remove exactly
//! those handlers again on unmount, leaving the channel and every other
//! mount's handlers alone. `Subscription` owns that bookkeeping.

pub mod matches;
pub mod notifications;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use matchsync::{Frame, events};

use crate::channel::{Channel, HandlerId};

pub use matches::MatchReconciler;
pub use notifications::NotificationReconciler;

/// Handlers one mount registered on one channel. Dropping it unregisters
/// them.
pub struct Subscription {
    channel: Arc<Channel>,
    handlers: Vec<HandlerId>,
}

impl Subscription {
    pub fn new(channel: Arc<Channel>) -> Self {
        Self {
            channel,
            handlers: Vec::new(),
        }
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    pub fn on<F>(&mut self, event: &str, handler: F)
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        self.handlers.push(self.channel.on(event, handler));
    }

    /// Unregister this mount's handlers. Idempotent.
    pub fn cancel(&mut self) {
        for id in self.handlers.drain(..) {
            self.channel.off(id);
        }
    }

    pub fn is_active(&self) -> bool {
        !self.handlers.is_empty()
    }

    /// Run `join` once per connection of this channel: right away if it is
    /// connected, otherwise on the next `connect`, and again after every
    /// reconnect.
    pub fn join_on_connect<F>(&mut self, join: F)
    where
        F: Fn(&Channel) + Send + Sync + 'static,
    {
        let joined = Arc::new(AtomicBool::new(false));
        let join = Arc::new(join);

        {
            let joined = Arc::clone(&joined);
            let join = Arc::clone(&join);
            let channel = Arc::downgrade(&self.channel);
            self.on(events::CONNECT, move |_| {
                let Some(channel) = channel.upgrade() else {
                    return;
                };
                if !joined.swap(true, Ordering::AcqRel) {
                    join(&channel);
                }
            });
        }
        {
            let joined = Arc::clone(&joined);
            self.on(events::DISCONNECT, move |_| {
                joined.store(false, Ordering::Release);
            });
        }

        if self.channel.connected() && !joined.swap(true, Ordering::AcqRel) {
            join(&self.channel);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}
