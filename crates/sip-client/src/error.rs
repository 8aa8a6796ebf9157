use thiserror::Error;

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the client API
#[derive(Error, Debug)]
pub enum Error {
    /// No response arrived inside the caller's deadline (or Timer B/F fired)
    #[error("Operation timed out")]
    Timeout,

    /// The transport failed while sending or receiving
    #[error("Transport error: {0}")]
    Transport(String),

    /// The peer challenged twice with the same credentials, or no
    /// credentials were configured for a challenge
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// Operation on a client that has been shut down
    #[error("Client is closed")]
    Closed,

    /// The operation is not valid right now (e.g. CANCEL before any
    /// provisional response)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No such call
    #[error("Unknown call: {0}")]
    UnknownCall(String),

    /// Invalid configuration or arguments
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Error bubbled up from the codec
    #[error("Codec error: {0}")]
    Codec(#[from] voxsip_sip_core::Error),

    /// Error bubbled up from the dialog/transaction layer
    #[error("Dialog layer error: {0}")]
    Dialog(#[from] voxsip_dialog_core::Error),
}

impl From<voxsip_sip_transport::Error> for Error {
    fn from(err: voxsip_sip_transport::Error) -> Self {
        match err {
            voxsip_sip_transport::Error::Timeout(_) => Error::Timeout,
            voxsip_sip_transport::Error::Closed => Error::Closed,
            other => Error::Transport(other.to_string()),
        }
    }
}
