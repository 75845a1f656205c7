//! In-memory connector for tests. Nothing connects on its own: the test
//! drives each link's lifecycle and inbound frames by hand.

use std::sync::{Arc, Mutex, mpsc};

use serde_json::Value;

use matchsync::Frame;

use super::{Channel, ConnectRequest, Connector};

#[derive(Clone, Default)]
pub struct MemoryConnector {
    links: Arc<Mutex<Vec<MemoryLink>>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of channels opened so far.
    pub fn opened(&self) -> usize {
        self.links.lock().unwrap().len()
    }

    /// The most recently opened link.
    pub fn last(&self) -> MemoryLink {
        self.links
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no channel opened yet")
    }

    /// The most recently opened link for `namespace`.
    pub fn link(&self, namespace: matchsync::Namespace) -> MemoryLink {
        self.links
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|l| l.request.namespace == namespace)
            .cloned()
            .expect("no channel opened for namespace")
    }
}

impl Connector for MemoryConnector {
    fn open(&self, request: ConnectRequest, channel: Arc<Channel>, outbound: mpsc::Receiver<Frame>) {
        self.links.lock().unwrap().push(MemoryLink {
            request,
            channel,
            outbound: Arc::new(Mutex::new(outbound)),
        });
    }
}

/// One opened channel, seen from the "server" side.
#[derive(Clone)]
pub struct MemoryLink {
    pub request: ConnectRequest,
    pub channel: Arc<Channel>,
    outbound: Arc<Mutex<mpsc::Receiver<Frame>>>,
}

impl MemoryLink {
    pub fn connect(&self) {
        self.channel.mark_connected();
    }

    pub fn disconnect(&self) {
        self.channel.mark_disconnected();
    }

    /// Transport gave up.
    pub fn terminate(&self) {
        self.channel.close();
    }

    /// Push an inbound frame to the channel's handlers.
    pub fn deliver(&self, event: &str, data: Value) {
        self.channel.dispatch(&Frame::new(event, data));
    }

    /// Drain every frame emitted since the last call.
    pub fn sent(&self) -> Vec<Frame> {
        self.outbound.lock().unwrap().try_iter().collect()
    }

    /// Event names of `sent()`.
    pub fn sent_events(&self) -> Vec<String> {
        self.sent().into_iter().map(|f| f.event).collect()
    }
}
