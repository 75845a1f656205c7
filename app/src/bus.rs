//! Change feed layer. Wraps `tokio::sync::broadcast` so stores and their
//! consumers never touch the broadcast types directly.

use tokio::sync::broadcast;

/// Buffered snapshots per subscriber before the oldest are dropped.
const CHANGE_FEED_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// PollError
// ---------------------------------------------------------------------------

/// Error from `ChangeReceiver::poll()`/`recv()`: the feed is closed because
/// every sender (the store) is gone.
#[derive(Debug, PartialEq, Eq)]
pub enum PollError {
    Closed,
}

// ---------------------------------------------------------------------------
// ChangeSender
// ---------------------------------------------------------------------------

/// Cloneable publishing side of a change feed.
pub struct ChangeSender<T> {
    inner: broadcast::Sender<T>,
}

impl<T: Clone> ChangeSender<T> {
    pub fn new() -> Self {
        let (inner, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self { inner }
    }

    /// Publish a change. Having no subscribers is not an error.
    pub fn send(&self, value: T) {
        let _ = self.inner.send(value);
    }

    pub fn subscribe(&self) -> ChangeReceiver<T> {
        ChangeReceiver {
            inner: self.inner.subscribe(),
        }
    }

    pub fn receiver_count(&self) -> usize {
        self.inner.receiver_count()
    }
}

impl<T> Clone for ChangeSender<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// ChangeReceiver
// ---------------------------------------------------------------------------

/// Subscriber side. A slow subscriber skips ahead instead of blocking the
/// store; it only ever needs the latest snapshots.
pub struct ChangeReceiver<T> {
    inner: broadcast::Receiver<T>,
}

impl<T: Clone> ChangeReceiver<T> {
    /// Non-blocking drain: the next change, `Ok(None)` if empty, or
    /// `Err(PollError::Closed)` if the store is gone.
    pub fn poll(&mut self) -> Result<Option<T>, PollError> {
        loop {
            match self.inner.try_recv() {
                Ok(value) => return Ok(Some(value)),
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Closed) => return Err(PollError::Closed),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    tracing::warn!("change feed: lagged, dropped {n} changes");
                    continue;
                }
            }
        }
    }

    /// Wait for the next change.
    pub async fn recv(&mut self) -> Result<T, PollError> {
        loop {
            match self.inner.recv().await {
                Ok(value) => return Ok(value),
                Err(broadcast::error::RecvError::Closed) => return Err(PollError::Closed),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("change feed: lagged, dropped {n} changes");
                    continue;
                }
            }
        }
    }
}
