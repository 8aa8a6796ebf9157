use thiserror::Error;

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from the transaction and dialog layers
#[derive(Error, Debug)]
pub enum Error {
    /// The message could not be parsed
    #[error("Codec error: {0}")]
    Codec(#[from] voxsip_sip_core::Error),

    /// The transport failed underneath us
    #[error("Transport error: {0}")]
    Transport(#[from] voxsip_sip_transport::Error),

    /// No transaction matches the given key
    #[error("Unknown transaction: {0}")]
    UnknownTransaction(String),

    /// The operation is not valid in the transaction's current state
    #[error("Invalid transaction state: {0}")]
    InvalidState(String),

    /// The request is missing a header the operation needs
    #[error("Missing required header: {0}")]
    MissingHeader(String),

    /// A dialog-layer protocol violation (CSeq regression, BYE on a dialog
    /// that was never confirmed, and similar)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Authentication failed: the peer challenged twice with the same
    /// credentials
    #[error("Authentication failed for realm {realm:?}")]
    AuthFailed {
        /// Realm that rejected us
        realm: String,
    },

    /// The transaction event channel is gone (manager shut down)
    #[error("Transaction manager is closed")]
    Closed,

    /// Anything else
    #[error("{0}")]
    Other(String),
}
