use thiserror::Error;

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in SIP message handling
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Invalid SIP method token
    #[error("Invalid SIP method: {0}")]
    InvalidMethod(String),

    /// Invalid SIP version on the start line
    #[error("Invalid SIP version: {0}")]
    InvalidVersion(String),

    /// Status code outside [100, 699]
    #[error("Invalid status code: {0}")]
    InvalidStatusCode(u16),

    /// Invalid SIP header syntax
    #[error("Invalid SIP header: {0}")]
    InvalidHeader(String),

    /// Invalid SIP URI
    #[error("Invalid SIP URI: {0}")]
    InvalidUri(String),

    /// Message that cannot be parsed at all
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// Content-Length does not match the available body bytes
    #[error("Content-Length mismatch: expected {expected}, got {actual}")]
    ContentLengthMismatch {
        /// Length stated in the Content-Length header
        expected: usize,
        /// Bytes actually present after the header terminator
        actual: usize,
    },

    /// Missing required header
    #[error("Missing required header: {0}")]
    MissingHeader(String),

    /// Malformed digest challenge
    #[error("Invalid auth challenge: {0}")]
    InvalidChallenge(String),
}

impl From<std::num::ParseIntError> for Error {
    fn from(err: std::num::ParseIntError) -> Self {
        Error::Malformed(format!("failed to parse integer: {}", err))
    }
}
