//! Blocking WebSocket link for one namespace channel.
//!
//! Thin wrapper over `tungstenite` that speaks `Frame`s: it attaches the
//! credential and locale headers on the handshake (`ws://` or `wss://` via
//! rustls with webpki roots), polls with a short read
//! timeout so the caller can interleave outbound frames, and maps socket
//! noise (pings, timeouts) to `Incoming::Idle`.

use std::io::ErrorKind;
use std::net::TcpStream;
use std::time::Duration;

use tungstenite::client::IntoClientRequest;
use tungstenite::http::HeaderValue;
use tungstenite::http::header::{ACCEPT_LANGUAGE, AUTHORIZATION};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use crate::{Frame, Namespace};

pub use tungstenite::Error as LinkError;

/// URL of a namespace endpoint under a base server URL.
pub fn namespace_url(base: &str, namespace: Namespace) -> String {
    format!("{}/{}", base.trim_end_matches('/'), namespace)
}

/// What one `recv()` produced.
#[derive(Debug)]
pub enum Incoming {
    Frame(Frame),
    /// A text message that is not a valid frame.
    Malformed { text: String, error: serde_json::Error },
    /// Nothing arrived within the read timeout, or a control message.
    Idle,
}

/// The TCP socket under a plain or TLS stream.
fn tcp_stream(stream: &MaybeTlsStream<TcpStream>) -> Option<&TcpStream> {
    match stream {
        MaybeTlsStream::Plain(tcp) => Some(tcp),
        MaybeTlsStream::Rustls(tls) => Some(tls.get_ref()),
        _ => None,
    }
}

pub struct WsLink {
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
}

impl WsLink {
    /// Open the socket and complete the handshake.
    pub fn connect(
        url: &str,
        credential: &str,
        locale: &str,
        read_timeout: Duration,
    ) -> Result<Self, LinkError> {
        let mut request = url.into_client_request()?;
        let headers = request.headers_mut();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {credential}"))
                .map_err(|e| LinkError::HttpFormat(e.into()))?,
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_str(locale).map_err(|e| LinkError::HttpFormat(e.into()))?,
        );

        let (socket, _response) = tungstenite::connect(request)?;
        if let Some(stream) = tcp_stream(socket.get_ref()) {
            stream.set_read_timeout(Some(read_timeout))?;
            stream.set_nodelay(true)?;
        }
        Ok(Self { socket })
    }

    /// Wait up to the read timeout for the next message.
    pub fn recv(&mut self) -> Result<Incoming, LinkError> {
        match self.socket.read() {
            Ok(Message::Text(text)) => Ok(match serde_json::from_str::<Frame>(&text) {
                Ok(frame) => Incoming::Frame(frame),
                Err(error) => Incoming::Malformed {
                    text: text.to_string(),
                    error,
                },
            }),
            Ok(Message::Close(_)) => Err(LinkError::ConnectionClosed),
            Ok(_) => Ok(Incoming::Idle),
            Err(LinkError::Io(e))
                if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                Ok(Incoming::Idle)
            }
            Err(e) => Err(e),
        }
    }

    pub fn send(&mut self, frame: &Frame) -> Result<(), LinkError> {
        let text = serde_json::to_string(frame).map_err(|e| LinkError::Io(e.into()))?;
        self.socket.send(Message::text(text))
    }

    /// Start the close handshake. Errors are irrelevant at this point.
    pub fn close(mut self) {
        let _ = self.socket.close(None);
        let _ = self.socket.flush();
    }
}
