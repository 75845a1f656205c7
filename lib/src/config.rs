use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Persisted config types
// ---------------------------------------------------------------------------

/// Top-level persisted config. Every section has defaults so a partial (or
/// empty) TOML file is valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchsyncConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub matching: MatchingSection,
    #[serde(default)]
    pub notifications: NotificationSection,
    #[serde(default)]
    pub transport: TransportSection,
    /// Only present when a local mock server is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mock_server: Option<MockServerSection>,
}

/// The battle server the client talks to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSection {
    /// Base WebSocket URL. Each namespace lives at `{url}/{namespace}`.
    pub url: String,
    /// Sent as `Accept-Language` on every channel.
    #[serde(default = "default_locale")]
    pub locale: String,
}

fn default_locale() -> String {
    "en".into()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:3040".into(),
            locale: default_locale(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchingSection {
    /// Accept every match-found prompt without asking.
    #[serde(default)]
    pub auto_accept: bool,
    /// How long a leave-queue request waits for server confirmation before
    /// the queue membership is dropped locally.
    #[serde(default = "default_leave_queue_timeout")]
    pub leave_queue_timeout_secs: u64,
}

fn default_leave_queue_timeout() -> u64 {
    5
}

impl Default for MatchingSection {
    fn default() -> Self {
        Self {
            auto_accept: false,
            leave_queue_timeout_secs: default_leave_queue_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSection {
    /// Visible toasts before the oldest is evicted.
    #[serde(default = "default_max_toasts")]
    pub max_toasts: usize,
}

fn default_max_toasts() -> usize {
    5
}

impl Default for NotificationSection {
    fn default() -> Self {
        Self {
            max_toasts: default_max_toasts(),
        }
    }
}

/// Reconnect policy of the WebSocket transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportSection {
    /// Consecutive failed connects before the channel is terminated.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Upper bound for the exponential backoff between attempts.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
    /// Socket read timeout; also bounds how long queued emits wait.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_max_backoff() -> u64 {
    30
}

fn default_read_timeout() -> u64 {
    50
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: default_max_reconnect_attempts(),
            max_backoff_secs: default_max_backoff(),
            read_timeout_ms: default_read_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockServerSection {
    pub bind: String,
}

impl Default for MockServerSection {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3040".into(),
        }
    }
}
