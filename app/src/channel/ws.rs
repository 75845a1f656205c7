//! WebSocket transport. One named thread per channel drives a blocking
//! `WsLink`: dispatches inbound frames, flushes queued emits, and
//! reconnects with exponential backoff until the channel is closed or the
//! attempt budget runs out.

use std::fmt;
use std::sync::mpsc::{self, TryRecvError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use matchsync::client::{Incoming, LinkError, WsLink, namespace_url};
use matchsync::{Frame, TransportSection};

use super::{Channel, ConnectRequest, Connector};

/// Transport-internal error type.
#[derive(Debug)]
pub(crate) enum TransportError {
    Connect(LinkError),
    Lost(LinkError),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(e) => write!(f, "connect failed: {e}"),
            Self::Lost(e) => write!(f, "connection lost: {e}"),
        }
    }
}

impl std::error::Error for TransportError {}

pub struct WsConnector {
    base_url: String,
    settings: TransportSection,
}

impl WsConnector {
    pub fn new(base_url: impl Into<String>, settings: TransportSection) -> Self {
        Self {
            base_url: base_url.into(),
            settings,
        }
    }
}

impl Connector for WsConnector {
    fn open(&self, request: ConnectRequest, channel: Arc<Channel>, outbound: mpsc::Receiver<Frame>) {
        let url = namespace_url(&self.base_url, request.namespace);
        let settings = self.settings.clone();
        let thread_name = format!("channel:{}", request.namespace);

        std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || run(url, request, settings, channel, outbound))
            .expect("failed to spawn channel thread");
    }
}

/// Delay before reconnect attempt number `failures` (1-based).
fn backoff_for(failures: u32, max: Duration) -> Duration {
    let exp = failures.saturating_sub(1).min(16);
    Duration::from_secs(1u64 << exp).min(max)
}

/// Sleep in short slices so a close is noticed promptly. Returns `false`
/// if the channel was closed meanwhile.
fn sleep_unless_closed(channel: &Channel, total: Duration) -> bool {
    let deadline = Instant::now() + total;
    while Instant::now() < deadline {
        if channel.is_closed() {
            return false;
        }
        std::thread::sleep(Duration::from_millis(100).min(total));
    }
    !channel.is_closed()
}

/// Closes the channel if the transport thread unwinds, so the registry
/// replaces it instead of handing out a channel nobody drives.
struct CloseOnPanic<'a>(&'a Channel);

impl Drop for CloseOnPanic<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            tracing::warn!("{}: transport thread panicked", self.0.namespace());
            self.0.close();
        }
    }
}

/// Main transport loop. Reconnects until the channel is closed.
fn run(
    url: String,
    request: ConnectRequest,
    settings: TransportSection,
    channel: Arc<Channel>,
    outbound: mpsc::Receiver<Frame>,
) {
    let ns = request.namespace;
    let _guard = CloseOnPanic(&channel);
    let max_backoff = Duration::from_secs(settings.max_backoff_secs.max(1));
    let mut failures = 0u32;

    loop {
        if channel.is_closed() {
            tracing::debug!("{ns}: transport stopped");
            return;
        }
        match connect_and_run(&url, &request, &settings, &channel, &outbound, &mut failures) {
            Ok(()) => {
                tracing::debug!("{ns}: transport stopped");
                return;
            }
            Err(e) => {
                channel.mark_disconnected();
                failures += 1;
                if failures > settings.max_reconnect_attempts {
                    tracing::warn!("{ns}: {e}, giving up after {failures} attempts");
                    channel.close();
                    return;
                }
                let backoff = backoff_for(failures, max_backoff);
                tracing::info!("{ns}: {e}, reconnecting in {backoff:?}");
                if !sleep_unless_closed(&channel, backoff) {
                    return;
                }
            }
        }
    }
}

/// One connection lifetime. `Ok(())` means the channel was closed locally.
fn connect_and_run(
    url: &str,
    request: &ConnectRequest,
    settings: &TransportSection,
    channel: &Channel,
    outbound: &mpsc::Receiver<Frame>,
    failures: &mut u32,
) -> Result<(), TransportError> {
    let ns = request.namespace;
    let mut link = WsLink::connect(
        url,
        &request.credential,
        &request.locale,
        Duration::from_millis(settings.read_timeout_ms.max(1)),
    )
    .map_err(TransportError::Connect)?;

    tracing::debug!("{ns}: socket open at {url}");
    *failures = 0;
    channel.mark_connected();

    loop {
        if channel.is_closed() {
            link.close();
            return Ok(());
        }

        // 1. Inbound
        match link.recv().map_err(TransportError::Lost)? {
            Incoming::Frame(frame) => {
                tracing::debug!(target: "audit", "{ns} <- {} {}", frame.event, frame.data);
                channel.dispatch(&frame);
            }
            Incoming::Malformed { text, error } => {
                tracing::warn!("{ns}: ignoring malformed frame ({error}): {text}");
            }
            Incoming::Idle => {}
        }

        // 2. Flush queued emits
        loop {
            match outbound.try_recv() {
                Ok(frame) => {
                    tracing::debug!(target: "audit", "{ns} -> {} {}", frame.event, frame.data);
                    link.send(&frame).map_err(TransportError::Lost)?;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    link.close();
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matchsync::Namespace;

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let max = Duration::from_secs(30);
        assert_eq!(backoff_for(1, max), Duration::from_secs(1));
        assert_eq!(backoff_for(2, max), Duration::from_secs(2));
        assert_eq!(backoff_for(4, max), Duration::from_secs(8));
        assert_eq!(backoff_for(6, max), Duration::from_secs(30));
        assert_eq!(backoff_for(500, max), Duration::from_secs(30));
    }

    #[test]
    fn panicking_transport_closes_its_channel() {
        let (channel, _outbound) = Channel::new(Namespace::User, "tok".into());
        let inner = Arc::clone(&channel);
        let joined = std::thread::spawn(move || {
            let _guard = CloseOnPanic(&inner);
            panic!("transport failure");
        })
        .join();
        assert!(joined.is_err());
        assert!(channel.is_closed());
    }

    #[test]
    fn clean_exit_leaves_channel_open() {
        let (channel, _outbound) = Channel::new(Namespace::User, "tok".into());
        drop(CloseOnPanic(&channel));
        assert!(!channel.is_closed());
    }

    #[test]
    fn unreachable_server_terminates_channel() {
        let connector = WsConnector::new(
            "ws://127.0.0.1:1",
            TransportSection {
                max_reconnect_attempts: 0,
                max_backoff_secs: 1,
                read_timeout_ms: 10,
            },
        );
        let (channel, outbound) = Channel::new(Namespace::Matching, "tok".into());
        connector.open(
            ConnectRequest {
                namespace: Namespace::Matching,
                credential: "tok".into(),
                locale: "en".into(),
            },
            Arc::clone(&channel),
            outbound,
        );

        let deadline = Instant::now() + Duration::from_secs(5);
        while !channel.is_closed() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(channel.is_closed());
        assert!(!channel.connected());
    }
}
