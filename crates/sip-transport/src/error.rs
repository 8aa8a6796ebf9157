use std::net::SocketAddr;

use thiserror::Error;

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Transport-layer errors.
///
/// `Connect` and `Write` surface synchronously from `send`; `Read` errors
/// close the affected connection and fail its waiters; `Timeout` is a
/// recoverable condition the caller may retry.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to establish a connection to the peer
    #[error("Connect to {addr} failed: {source}")]
    Connect {
        /// Destination that refused us
        addr: SocketAddr,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Failed to write to the socket
    #[error("Write to {addr} failed: {source}")]
    Write {
        /// Destination being written to
        addr: SocketAddr,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Failed to read from the socket
    #[error("Read failed: {0}")]
    Read(std::io::Error),

    /// No response arrived within the caller's deadline
    #[error("Timed out waiting for a response from {0}")]
    Timeout(SocketAddr),

    /// Inbound bytes could not be framed
    #[error("Malformed frame from {addr}: {reason}")]
    Malformed {
        /// Peer that sent the frame
        addr: SocketAddr,
        /// What was wrong with it
        reason: String,
    },

    /// Operation on a closed transport
    #[error("Transport is closed")]
    Closed,

    /// Failed to bind a local socket
    #[error("Bind to {addr} failed: {source}")]
    Bind {
        /// Local address requested
        addr: SocketAddr,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Hostname did not resolve to a usable address
    #[error("Failed to resolve {0}")]
    Resolve(String),

    /// Miscellaneous I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
