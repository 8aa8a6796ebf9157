//! The [`Transport`] trait and its UDP, TCP, and TLS implementations.

pub mod udp;

#[cfg(feature = "tcp")]
pub mod tcp;

#[cfg(any(feature = "tcp", feature = "tls"))]
pub mod stream;

#[cfg(feature = "tls")]
pub mod tls;

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;

use crate::error::Result;

/// Which protocol a transport (or a received frame) belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Datagram transport, the SIP default
    Udp,
    /// Stream transport with Content-Length framing
    Tcp,
    /// TLS over TCP
    Tls,
}

impl TransportKind {
    /// Protocol token as it appears in Via headers
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Udp => "UDP",
            TransportKind::Tcp => "TCP",
            TransportKind::Tls => "TLS",
        }
    }

    /// Whether retransmission timers apply (unreliable transport)
    pub fn is_unreliable(&self) -> bool {
        matches!(self, TransportKind::Udp)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Events delivered on a transport's receive channel
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A complete SIP frame arrived
    MessageReceived {
        /// Raw frame bytes (exactly one message)
        bytes: Bytes,
        /// Peer the frame came from
        source: SocketAddr,
        /// Protocol it arrived on
        kind: TransportKind,
    },
    /// A non-fatal transport error (logged; the transport keeps running)
    Error {
        /// Human-readable description
        error: String,
    },
    /// The transport shut down; no further events will arrive
    Closed,
}

/// Uniform send/receive surface over UDP, TCP, and TLS sockets.
///
/// Implementations own their sockets outright: no layer above reads or
/// writes file descriptors directly. Inbound frames are delivered on the
/// `mpsc` receiver returned at bind time.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Protocol this transport speaks
    fn kind(&self) -> TransportKind;

    /// Local address the transport is bound to
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Sends one complete message to `destination`
    async fn send(&self, bytes: Bytes, destination: SocketAddr) -> Result<()>;

    /// Sends one message and waits for the next response frame from that
    /// peer, up to `timeout`.
    ///
    /// The response is *also* delivered on the event channel, so the
    /// transaction layer stays consistent whether or not anyone waited.
    async fn send_and_wait(
        &self,
        bytes: Bytes,
        destination: SocketAddr,
        timeout: Duration,
    ) -> Result<Bytes>;

    /// Closes the transport; pending waiters observe closed channels
    async fn close(&self) -> Result<()>;

    /// True once `close` has been called
    fn is_closed(&self) -> bool;
}

/// True when a frame looks like a SIP response (for waiter routing)
pub(crate) fn looks_like_response(frame: &[u8]) -> bool {
    frame.starts_with(b"SIP/2.0 ")
}
