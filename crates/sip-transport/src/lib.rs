//! SIP transport layer for the voxsip stack.
//!
//! Owns the sockets and nothing else: frames arrive and leave as raw bytes
//! plus a `(source, protocol)` tag; parsing belongs to `voxsip-sip-core`
//! and transaction matching to `voxsip-dialog-core`.
//!
//! - **UDP**: one datagram, one frame.
//! - **TCP/TLS**: a per-connection [`framing::SipFramer`] accumulates bytes,
//!   discards keep-alive CRLF sequences, and splits complete messages at
//!   `header-end + 4 + Content-Length`.
//! - **Response waiters**: callers that need the next response from a peer
//!   register a waiter; inbound responses are handed to the first waiter for
//!   that peer *and* still delivered on the event channel.
//! - **Source-address resolution**: [`resolve::SourceAddrCache`] probes the
//!   kernel routing table with a connected UDP socket so `Via`/`Contact`
//!   advertise an address the peer can actually reach.

pub mod error;
pub mod framing;
pub mod resolve;
pub mod transport;
pub mod waiters;

pub use error::{Error, Result};
pub use transport::udp::UdpTransport;
#[cfg(feature = "tcp")]
pub use transport::tcp::TcpTransport;
#[cfg(feature = "tls")]
pub use transport::tls::TlsTransport;
pub use transport::{Transport, TransportEvent, TransportKind};

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::transport::{Transport, TransportEvent, TransportKind};
    pub use crate::UdpTransport;
    #[cfg(feature = "tcp")]
    pub use crate::TcpTransport;
    #[cfg(feature = "tls")]
    pub use crate::TlsTransport;
}
