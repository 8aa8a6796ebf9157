use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// SIP request methods
///
/// Methods are case-sensitive tokens per RFC 3261; the standard set is
/// represented as variants and anything else syntactically valid becomes
/// [`Method::Extension`].
///
/// # Examples
///
/// ```rust
/// use voxsip_sip_core::Method;
/// use std::str::FromStr;
///
/// assert_eq!(Method::Invite.as_str(), "INVITE");
/// assert_eq!(Method::from_str("REGISTER").unwrap(), Method::Register);
/// assert!(matches!(Method::from_str("PUBLISH").unwrap(), Method::Extension(_)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    /// INVITE: initiate a session
    Invite,
    /// ACK: acknowledge a final response to INVITE
    Ack,
    /// BYE: terminate a session
    Bye,
    /// CANCEL: cancel a pending request
    Cancel,
    /// OPTIONS: query capabilities
    Options,
    /// REGISTER: bind an address of record
    Register,
    /// MESSAGE: instant message (RFC 3428)
    Message,
    /// INFO: mid-session information (RFC 6086)
    Info,
    /// PRACK: acknowledge a reliable provisional response (RFC 3262)
    Prack,
    /// SUBSCRIBE: request event notification (RFC 6665)
    Subscribe,
    /// NOTIFY: deliver an event notification (RFC 6665)
    Notify,
    /// REFER: ask the peer to contact a third party (RFC 3515)
    Refer,
    /// UPDATE: modify session state before the final response (RFC 3311)
    Update,
    /// Any other syntactically valid method token
    Extension(String),
}

impl Method {
    /// Returns the canonical method token
    pub fn as_str(&self) -> &str {
        match self {
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Bye => "BYE",
            Method::Cancel => "CANCEL",
            Method::Options => "OPTIONS",
            Method::Register => "REGISTER",
            Method::Message => "MESSAGE",
            Method::Info => "INFO",
            Method::Prack => "PRACK",
            Method::Subscribe => "SUBSCRIBE",
            Method::Notify => "NOTIFY",
            Method::Refer => "REFER",
            Method::Update => "UPDATE",
            Method::Extension(s) => s,
        }
    }

    /// True for INVITE, which gets its own transaction state machines
    pub fn is_invite(&self) -> bool {
        matches!(self, Method::Invite)
    }

    /// True for ACK, which is never the subject of its own transaction
    pub fn is_ack(&self) -> bool {
        matches!(self, Method::Ack)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_alphanumeric()
                || matches!(
                    b,
                    b'-' | b'.' | b'!' | b'%' | b'*' | b'_' | b'+' | b'`' | b'\'' | b'~'
                )
        })
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "INVITE" => Ok(Method::Invite),
            "ACK" => Ok(Method::Ack),
            "BYE" => Ok(Method::Bye),
            "CANCEL" => Ok(Method::Cancel),
            "OPTIONS" => Ok(Method::Options),
            "REGISTER" => Ok(Method::Register),
            "MESSAGE" => Ok(Method::Message),
            "INFO" => Ok(Method::Info),
            "PRACK" => Ok(Method::Prack),
            "SUBSCRIBE" => Ok(Method::Subscribe),
            "NOTIFY" => Ok(Method::Notify),
            "REFER" => Ok(Method::Refer),
            "UPDATE" => Ok(Method::Update),
            other if is_token(other) => Ok(Method::Extension(other.to_string())),
            other => Err(Error::InvalidMethod(other.to_string())),
        }
    }
}
