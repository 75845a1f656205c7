//! Event channel provider.
//!
//! One shared bidirectional channel per namespace. Callers get channels
//! from the `ChannelRegistry`, which reuses a live channel only while it was
//! opened with the caller's credential. The transport behind a channel is
//! a black box reached through the `Connector` trait; the binary uses
//! `ws::WsConnector`, tests use `memory::MemoryConnector`.

#[cfg(test)]
pub mod memory;
pub mod ws;

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, mpsc};

use serde_json::Value;

use matchsync::{ClientCommand, Frame, Namespace, events};

/// Inbound event handler. Receives the whole frame so wildcard handlers
/// can see the event name.
pub type Handler = Arc<dyn Fn(&Frame) + Send + Sync>;

/// Token returned by `Channel::on`, used to remove exactly that handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct Registration {
    id: HandlerId,
    event: String,
    handler: Handler,
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// A namespace channel shared by every consumer of that namespace.
pub struct Channel {
    namespace: Namespace,
    credential: String,
    connected: AtomicBool,
    closed: AtomicBool,
    next_handler: AtomicU64,
    handlers: RwLock<Vec<Registration>>,
    outbound: Mutex<Option<mpsc::Sender<Frame>>>,
}

impl Channel {
    /// Create a channel and the outbound queue its transport drains.
    pub(crate) fn new(namespace: Namespace, credential: String) -> (Arc<Self>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel();
        let channel = Arc::new(Self {
            namespace,
            credential,
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            next_handler: AtomicU64::new(1),
            handlers: RwLock::new(Vec::new()),
            outbound: Mutex::new(Some(tx)),
        });
        (channel, rx)
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub fn credential(&self) -> &str {
        &self.credential
    }

    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Terminated: released, or the transport gave up reconnecting.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Queue a frame. Frames emitted while disconnected are flushed by the
    /// transport once it connects; after close they are discarded.
    pub fn emit(&self, event: &str, data: Value) {
        let frame = Frame::new(event, data);
        let sent = match self.outbound.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        };
        if !sent {
            tracing::debug!("{}: dropped {event}, channel closed", self.namespace);
        } else if !self.connected() {
            tracing::debug!("{}: queued {event} until connected", self.namespace);
        }
    }

    pub fn send_command(&self, command: ClientCommand) {
        let frame = command.into_frame();
        self.emit(&frame.event, frame.data);
    }

    /// Register a handler for `event` (or `events::ANY`).
    pub fn on<F>(&self, event: &str, handler: F) -> HandlerId
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_handler.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Registration {
                id,
                event: event.to_string(),
                handler: Arc::new(handler),
            });
        id
    }

    /// Remove one handler. Returns `false` if it was already gone.
    pub fn off(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        let before = handlers.len();
        handlers.retain(|r| r.id != id);
        handlers.len() != before
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Run every handler registered for the frame's event, in registration
    /// order. Handlers run outside the lock and may call `on`/`off`/`emit`.
    pub(crate) fn dispatch(&self, frame: &Frame) {
        let matching: Vec<Handler> = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| r.event == frame.event || r.event == events::ANY)
            .map(|r| Arc::clone(&r.handler))
            .collect();
        for handler in matching {
            // A failing handler must not take the transport thread with it.
            if panic::catch_unwind(AssertUnwindSafe(|| handler(frame))).is_err() {
                tracing::warn!("{}: handler for {} panicked", self.namespace, frame.event);
            }
        }
    }

    /// Transport reports a completed connect. `connect` handlers only run on
    /// an actual disconnected -> connected change.
    pub(crate) fn mark_connected(&self) {
        if !self.connected.swap(true, Ordering::AcqRel) {
            tracing::info!("{}: connected", self.namespace);
            self.dispatch(&Frame::new(events::CONNECT, Value::Null));
        }
    }

    pub(crate) fn mark_disconnected(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            tracing::info!("{}: disconnected", self.namespace);
            self.dispatch(&Frame::new(events::DISCONNECT, Value::Null));
        }
    }

    /// Terminate the channel. The transport notices and stops.
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.outbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        self.mark_disconnected();
        tracing::debug!("{}: closed", self.namespace);
    }
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// Everything a transport needs to open one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub namespace: Namespace,
    pub credential: String,
    pub locale: String,
}

/// Seam to the transport. `open` must not block: it hands the channel and
/// its outbound queue to whatever drives the connection, which reports
/// progress through `mark_connected`/`mark_disconnected`/`dispatch` and
/// closes the channel when it gives up.
pub trait Connector: Send + Sync {
    fn open(&self, request: ConnectRequest, channel: Arc<Channel>, outbound: mpsc::Receiver<Frame>);
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Owner of every namespace channel.
pub struct ChannelRegistry {
    connector: Box<dyn Connector>,
    locale: String,
    channels: Mutex<HashMap<Namespace, Arc<Channel>>>,
}

impl ChannelRegistry {
    pub fn new(connector: Box<dyn Connector>, locale: impl Into<String>) -> Self {
        Self {
            connector,
            locale: locale.into(),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Shared channel for `namespace`, opening a new one if the cached one is
    /// terminated or was opened with a different credential. Never fails:
    /// connect problems show up through `connected()` and lifecycle events.
    pub fn acquire(&self, namespace: Namespace, credential: &str) -> Arc<Channel> {
        let (channel, outbound) = {
            let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(existing) = channels.get(&namespace) {
                if !existing.is_closed() && existing.credential() == credential {
                    return Arc::clone(existing);
                }
                if existing.is_closed() {
                    tracing::debug!("{namespace}: cached channel terminated, reopening");
                } else {
                    tracing::info!("{namespace}: credential changed, reopening channel");
                    existing.close();
                }
            }
            let (channel, outbound) = Channel::new(namespace, credential.to_string());
            channels.insert(namespace, Arc::clone(&channel));
            (channel, outbound)
        };

        self.connector.open(
            ConnectRequest {
                namespace,
                credential: credential.to_string(),
                locale: self.locale.clone(),
            },
            Arc::clone(&channel),
            outbound,
        );
        channel
    }

    /// Close and forget one namespace channel.
    pub fn release(&self, namespace: Namespace) {
        let removed = self
            .channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&namespace);
        if let Some(channel) = removed {
            channel.close();
        }
    }

    /// Close every channel (logout).
    pub fn release_all(&self) {
        let drained: Vec<Arc<Channel>> = self
            .channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, c)| c)
            .collect();
        for channel in drained {
            channel.close();
        }
    }

    /// The cached channel, if any, without opening one.
    pub fn get(&self, namespace: Namespace) -> Option<Arc<Channel>> {
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&namespace)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryConnector;
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn acquire_reuses_live_channel_for_same_credential() {
        let connector = MemoryConnector::new();
        let registry = ChannelRegistry::new(Box::new(connector.clone()), "en");

        let a = registry.acquire(Namespace::Matching, "tok");
        let b = registry.acquire(Namespace::Matching, "tok");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(connector.opened(), 1);

        // Transiently disconnected channels are still reused.
        connector.last().connect();
        connector.last().disconnect();
        let c = registry.acquire(Namespace::Matching, "tok");
        assert!(Arc::ptr_eq(&a, &c));
        assert_eq!(connector.opened(), 1);
    }

    #[test]
    fn namespaces_get_separate_channels() {
        let connector = MemoryConnector::new();
        let registry = ChannelRegistry::new(Box::new(connector.clone()), "vi");
        let matching = registry.acquire(Namespace::Matching, "tok");
        let user = registry.acquire(Namespace::User, "tok");
        assert!(!Arc::ptr_eq(&matching, &user));
        assert_eq!(connector.opened(), 2);
        assert_eq!(connector.last().request.locale, "vi");
    }

    #[test]
    fn credential_change_opens_new_channel_and_closes_old() {
        let connector = MemoryConnector::new();
        let registry = ChannelRegistry::new(Box::new(connector.clone()), "en");

        let old = registry.acquire(Namespace::Matching, "alice");
        let new = registry.acquire(Namespace::Matching, "bob");
        assert!(!Arc::ptr_eq(&old, &new));
        assert!(old.is_closed());
        assert!(!new.is_closed());
        assert_eq!(new.credential(), "bob");
        assert_eq!(connector.last().request.credential, "bob");
    }

    #[test]
    fn terminated_channel_is_replaced() {
        let connector = MemoryConnector::new();
        let registry = ChannelRegistry::new(Box::new(connector.clone()), "en");
        let first = registry.acquire(Namespace::User, "tok");
        connector.last().terminate();

        let second = registry.acquire(Namespace::User, "tok");
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(connector.opened(), 2);
    }

    #[test]
    fn release_all_closes_everything() {
        let connector = MemoryConnector::new();
        let registry = ChannelRegistry::new(Box::new(connector.clone()), "en");
        let a = registry.acquire(Namespace::Matching, "tok");
        let b = registry.acquire(Namespace::User, "tok");
        registry.release_all();
        assert!(a.is_closed() && b.is_closed());
        assert!(registry.get(Namespace::Matching).is_none());
    }

    #[test]
    fn connect_is_dispatched_once_per_connection() {
        let connector = MemoryConnector::new();
        let registry = ChannelRegistry::new(Box::new(connector.clone()), "en");
        let channel = registry.acquire(Namespace::Matching, "tok");
        let connects = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&connects);
        channel.on(events::CONNECT, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let link = connector.last();
        link.connect();
        link.connect();
        assert_eq!(connects.load(Ordering::SeqCst), 1);
        link.disconnect();
        link.connect();
        assert_eq!(connects.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn off_removes_only_that_handler() {
        let (channel, _rx) = Channel::new(Namespace::User, "tok".into());
        let hits = Arc::new(AtomicUsize::new(0));
        let h1 = Arc::clone(&hits);
        let h2 = Arc::clone(&hits);
        let first = channel.on("ping", move |_| {
            h1.fetch_add(1, Ordering::SeqCst);
        });
        channel.on("ping", move |_| {
            h2.fetch_add(10, Ordering::SeqCst);
        });

        assert!(channel.off(first));
        assert!(!channel.off(first));
        channel.dispatch(&Frame::new("ping", Value::Null));
        assert_eq!(hits.load(Ordering::SeqCst), 10);
        assert_eq!(channel.handler_count(), 1);
    }

    #[test]
    fn handlers_may_reenter_the_channel() {
        let (channel, rx) = Channel::new(Namespace::Matching, "tok".into());
        let weak = Arc::downgrade(&channel);
        channel.on("ping", move |_| {
            if let Some(ch) = weak.upgrade() {
                ch.on("pong", |_| {});
                ch.emit("pong", json!({}));
            }
        });
        channel.dispatch(&Frame::new("ping", Value::Null));
        assert_eq!(channel.handler_count(), 2);
        assert_eq!(rx.try_recv().map(|f| f.event).ok().as_deref(), Some("pong"));
    }

    #[test]
    fn wildcard_sees_every_event() {
        let (channel, _rx) = Channel::new(Namespace::Matching, "tok".into());
        let names = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&names);
        channel.on(events::ANY, move |frame| {
            sink.lock().unwrap().push(frame.event.clone());
        });
        channel.dispatch(&Frame::new(events::MATCH_FOUND, Value::Null));
        channel.mark_connected();
        assert_eq!(*names.lock().unwrap(), [events::MATCH_FOUND, events::CONNECT]);
    }

    #[test]
    fn panicking_handler_does_not_stop_dispatch() {
        let (channel, _rx) = Channel::new(Namespace::Matching, "tok".into());
        let seen = Arc::new(AtomicUsize::new(0));
        channel.on(events::ROUND_STARTING, |_| panic!("bad payload"));
        let counter = Arc::clone(&seen);
        channel.on(events::ANY, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        channel.dispatch(&Frame::new(events::ROUND_STARTING, Value::Null));
        channel.dispatch(&Frame::new(events::ROUND_ENDED, Value::Null));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(channel.handler_count(), 2);
    }

    #[test]
    fn emit_after_close_is_discarded() {
        let (channel, rx) = Channel::new(Namespace::Matching, "tok".into());
        channel.close();
        channel.emit("late", json!({}));
        assert!(rx.try_recv().is_err());
    }
}
