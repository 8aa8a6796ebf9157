use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// SIP header names
///
/// Represents the header names this stack works with, plus their compact
/// forms, with case-insensitive matching on parse and canonical
/// capitalization on output. Names without a variant are kept in
/// [`HeaderName::Other`], canonicalized to Title-Case-Per-Token unless the
/// original was written entirely in upper case (e.g. `X-ASSERTED-IDENTITY`
/// survives as given, `x-custom-header` becomes `X-Custom-Header`).
///
/// # Examples
///
/// ```rust
/// use voxsip_sip_core::HeaderName;
/// use std::str::FromStr;
///
/// assert_eq!(HeaderName::from_str("via").unwrap(), HeaderName::Via);
/// assert_eq!(HeaderName::from_str("v").unwrap(), HeaderName::Via);
/// assert_eq!(HeaderName::CallId.as_str(), "Call-ID");
///
/// let custom = HeaderName::from_str("x-custom").unwrap();
/// assert_eq!(custom.as_str(), "X-Custom");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HeaderName {
    /// Via: path taken by the request so far
    Via,
    /// From: initiator of the request
    From,
    /// To: logical recipient of the request
    To,
    /// Call-ID: unique identifier for this call
    CallId,
    /// CSeq: command sequence number
    CSeq,
    /// Max-Forwards: hop limit
    MaxForwards,
    /// Contact: where subsequent requests should be sent
    Contact,
    /// Content-Length: size of the message body
    ContentLength,
    /// Content-Type: media type of the message body
    ContentType,
    /// Expires: expiration time for a registration
    Expires,
    /// Allow: methods supported by the UA
    Allow,
    /// Accept: media types acceptable for the response
    Accept,
    /// User-Agent: client product information
    UserAgent,
    /// Server: server product information
    Server,
    /// Subject: subject of the call
    Subject,
    /// Supported: option tags supported by the UA
    Supported,
    /// Require: option tags the peer must support
    Require,
    /// Unsupported: option tags not supported
    Unsupported,
    /// Route: forced route for a request
    Route,
    /// Record-Route: proxies that want to stay in the path
    RecordRoute,
    /// Authorization: credentials for a UAS challenge
    Authorization,
    /// WWW-Authenticate: UAS authentication challenge
    WwwAuthenticate,
    /// Proxy-Authenticate: proxy authentication challenge
    ProxyAuthenticate,
    /// Proxy-Authorization: credentials for a proxy challenge
    ProxyAuthorization,
    /// RSeq: sequence number of a reliable provisional response (RFC 3262)
    RSeq,
    /// RAck: acknowledgment of a reliable provisional response (RFC 3262)
    RAck,
    /// Content-Encoding: encoding applied to the body
    ContentEncoding,
    /// Min-Expires: minimum registration interval a registrar accepts
    MinExpires,
    /// Retry-After: recommended wait before retrying
    RetryAfter,
    /// Any other header name
    Other(String),
}

impl HeaderName {
    /// Returns the canonical display name of the header
    pub fn as_str(&self) -> &str {
        match self {
            HeaderName::Via => "Via",
            HeaderName::From => "From",
            HeaderName::To => "To",
            HeaderName::CallId => "Call-ID",
            HeaderName::CSeq => "CSeq",
            HeaderName::MaxForwards => "Max-Forwards",
            HeaderName::Contact => "Contact",
            HeaderName::ContentLength => "Content-Length",
            HeaderName::ContentType => "Content-Type",
            HeaderName::Expires => "Expires",
            HeaderName::Allow => "Allow",
            HeaderName::Accept => "Accept",
            HeaderName::UserAgent => "User-Agent",
            HeaderName::Server => "Server",
            HeaderName::Subject => "Subject",
            HeaderName::Supported => "Supported",
            HeaderName::Require => "Require",
            HeaderName::Unsupported => "Unsupported",
            HeaderName::Route => "Route",
            HeaderName::RecordRoute => "Record-Route",
            HeaderName::Authorization => "Authorization",
            HeaderName::WwwAuthenticate => "WWW-Authenticate",
            HeaderName::ProxyAuthenticate => "Proxy-Authenticate",
            HeaderName::ProxyAuthorization => "Proxy-Authorization",
            HeaderName::RSeq => "RSeq",
            HeaderName::RAck => "RAck",
            HeaderName::ContentEncoding => "Content-Encoding",
            HeaderName::MinExpires => "Min-Expires",
            HeaderName::RetryAfter => "Retry-After",
            HeaderName::Other(s) => s,
        }
    }
}

impl fmt::Display for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Title-Case-Per-Token casing for extension header names
fn title_case(name: &str) -> String {
    name.split('-')
        .map(|token| {
            let mut chars = token.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

impl FromStr for HeaderName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::InvalidHeader("empty header name".to_string()));
        }

        let lower = s.to_ascii_lowercase();
        Ok(match lower.as_str() {
            "via" | "v" => HeaderName::Via,
            "from" | "f" => HeaderName::From,
            "to" | "t" => HeaderName::To,
            "call-id" | "i" => HeaderName::CallId,
            "cseq" => HeaderName::CSeq,
            "max-forwards" => HeaderName::MaxForwards,
            "contact" | "m" => HeaderName::Contact,
            "content-length" | "l" => HeaderName::ContentLength,
            "content-type" | "c" => HeaderName::ContentType,
            "expires" => HeaderName::Expires,
            "allow" => HeaderName::Allow,
            "accept" => HeaderName::Accept,
            "user-agent" => HeaderName::UserAgent,
            "server" => HeaderName::Server,
            "subject" | "s" => HeaderName::Subject,
            "supported" | "k" => HeaderName::Supported,
            "require" => HeaderName::Require,
            "unsupported" | "u" => HeaderName::Unsupported,
            "route" => HeaderName::Route,
            "record-route" => HeaderName::RecordRoute,
            "authorization" => HeaderName::Authorization,
            "www-authenticate" => HeaderName::WwwAuthenticate,
            "proxy-authenticate" => HeaderName::ProxyAuthenticate,
            "proxy-authorization" => HeaderName::ProxyAuthorization,
            "rseq" => HeaderName::RSeq,
            "rack" => HeaderName::RAck,
            "content-encoding" | "e" => HeaderName::ContentEncoding,
            "min-expires" => HeaderName::MinExpires,
            "retry-after" => HeaderName::RetryAfter,
            _ => {
                // All-uppercase extension names keep their casing
                if s == s.to_ascii_uppercase() {
                    HeaderName::Other(s.to_string())
                } else {
                    HeaderName::Other(title_case(s))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_forms_expand() {
        assert_eq!(HeaderName::from_str("v").unwrap(), HeaderName::Via);
        assert_eq!(HeaderName::from_str("f").unwrap(), HeaderName::From);
        assert_eq!(HeaderName::from_str("t").unwrap(), HeaderName::To);
        assert_eq!(HeaderName::from_str("i").unwrap(), HeaderName::CallId);
        assert_eq!(HeaderName::from_str("m").unwrap(), HeaderName::Contact);
        assert_eq!(HeaderName::from_str("l").unwrap(), HeaderName::ContentLength);
        assert_eq!(HeaderName::from_str("c").unwrap(), HeaderName::ContentType);
        assert_eq!(HeaderName::from_str("k").unwrap(), HeaderName::Supported);
    }

    #[test]
    fn case_insensitive_matching() {
        assert_eq!(HeaderName::from_str("CALL-ID").unwrap(), HeaderName::CallId);
        assert_eq!(HeaderName::from_str("cseq").unwrap(), HeaderName::CSeq);
        assert_eq!(
            HeaderName::from_str("www-authenticate").unwrap(),
            HeaderName::WwwAuthenticate
        );
    }

    #[test]
    fn canonical_output_casing() {
        assert_eq!(HeaderName::CallId.as_str(), "Call-ID");
        assert_eq!(HeaderName::CSeq.as_str(), "CSeq");
        assert_eq!(HeaderName::WwwAuthenticate.as_str(), "WWW-Authenticate");
        assert_eq!(HeaderName::RAck.as_str(), "RAck");
    }

    #[test]
    fn extension_names_title_cased() {
        assert_eq!(
            HeaderName::from_str("x-custom-header").unwrap().as_str(),
            "X-Custom-Header"
        );
        // All-caps extension names survive untouched
        assert_eq!(
            HeaderName::from_str("X-FS-SUPPORT").unwrap().as_str(),
            "X-FS-SUPPORT"
        );
    }

    #[test]
    fn empty_rejected() {
        assert!(HeaderName::from_str("").is_err());
    }
}
