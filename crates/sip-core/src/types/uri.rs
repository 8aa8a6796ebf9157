//! Lightweight SIP URI handling.
//!
//! This stack needs URIs for request targets and `Contact` extraction, not
//! for full RFC 3261 §19 grammar coverage: scheme, user, host, port, and
//! URI parameters are modeled; escaping, embedded headers, and telephone
//! subscriber syntax are passed through opaquely in the covered fields.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// URI scheme: `sip` or `sips`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scheme {
    /// Plain SIP
    Sip,
    /// SIP over TLS
    Sips,
}

impl Scheme {
    /// Scheme text without the colon
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Sip => "sip",
            Scheme::Sips => "sips",
        }
    }

    /// Default port for this scheme
    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Sip => 5060,
            Scheme::Sips => 5061,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A parsed SIP URI
///
/// # Examples
///
/// ```rust
/// use voxsip_sip_core::Uri;
/// use std::str::FromStr;
///
/// let uri = Uri::from_str("sip:alice@example.com:5080;transport=tcp").unwrap();
/// assert_eq!(uri.user.as_deref(), Some("alice"));
/// assert_eq!(uri.host, "example.com");
/// assert_eq!(uri.port, Some(5080));
/// assert_eq!(uri.param("transport"), Some("tcp"));
/// assert_eq!(uri.host_port(), ("example.com", 5080));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Uri {
    /// `sip` or `sips`
    pub scheme: Scheme,
    /// User part before `@`, if any
    pub user: Option<String>,
    /// Host (name or IP literal)
    pub host: String,
    /// Explicit port, if any
    pub port: Option<u16>,
    /// URI parameters after the host, `;name=value` or bare `;name`
    pub params: Vec<(String, Option<String>)>,
}

impl Uri {
    /// Builds a bare `sip:host` URI
    pub fn sip(host: impl Into<String>) -> Self {
        Uri {
            scheme: Scheme::Sip,
            user: None,
            host: host.into(),
            port: None,
            params: Vec::new(),
        }
    }

    /// Builds a `sip:user@host:port` URI
    pub fn sip_user(user: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Uri {
            scheme: Scheme::Sip,
            user: Some(user.into()),
            host: host.into(),
            port: Some(port),
            params: Vec::new(),
        }
    }

    /// Returns a URI parameter value (empty string for value-less params)
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_deref().unwrap_or(""))
    }

    /// Host and effective port (scheme default when unspecified)
    pub fn host_port(&self) -> (&str, u16) {
        (&self.host, self.port.unwrap_or(self.scheme.default_port()))
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.scheme.as_str())?;
        if let Some(user) = &self.user {
            write!(f, "{}@", user)?;
        }
        write!(f, "{}", self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        for (name, value) in &self.params {
            match value {
                Some(v) => write!(f, ";{}={}", name, v)?,
                None => write!(f, ";{}", name)?,
            }
        }
        Ok(())
    }
}

impl FromStr for Uri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (scheme, rest) = if let Some(rest) = s.strip_prefix("sips:") {
            (Scheme::Sips, rest)
        } else if let Some(rest) = s.strip_prefix("sip:") {
            (Scheme::Sip, rest)
        } else {
            return Err(Error::InvalidUri(format!("unsupported scheme: {:?}", s)));
        };

        let (addr, params_str) = match rest.find(';') {
            Some(index) => (&rest[..index], Some(&rest[index + 1..])),
            None => (rest, None),
        };

        let (user, host_port) = match addr.rfind('@') {
            Some(index) => (Some(addr[..index].to_string()), &addr[index + 1..]),
            None => (None, addr),
        };

        // IPv6 literals keep their brackets as part of the host
        let (host, port) = if host_port.starts_with('[') {
            match host_port.find(']') {
                Some(close) => {
                    let host = &host_port[..=close];
                    let port = match host_port[close + 1..].strip_prefix(':') {
                        Some(p) => Some(p.parse::<u16>().map_err(|_| {
                            Error::InvalidUri(format!("bad port in {:?}", s))
                        })?),
                        None => None,
                    };
                    (host.to_string(), port)
                }
                None => return Err(Error::InvalidUri(format!("unterminated IPv6 host: {:?}", s))),
            }
        } else {
            match host_port.rfind(':') {
                Some(index) => {
                    let port = host_port[index + 1..]
                        .parse::<u16>()
                        .map_err(|_| Error::InvalidUri(format!("bad port in {:?}", s)))?;
                    (host_port[..index].to_string(), Some(port))
                }
                None => (host_port.to_string(), None),
            }
        };

        if host.is_empty() {
            return Err(Error::InvalidUri(format!("missing host: {:?}", s)));
        }

        let mut params = Vec::new();
        if let Some(params_str) = params_str {
            for part in params_str.split(';') {
                if part.is_empty() {
                    continue;
                }
                match part.split_once('=') {
                    Some((name, value)) => params.push((name.to_string(), Some(value.to_string()))),
                    None => params.push((part.to_string(), None)),
                }
            }
        }

        Ok(Uri {
            scheme,
            user,
            host,
            port,
            params,
        })
    }
}

/// Extracts the addr-spec from a name-addr header value.
///
/// `"Bob" <sip:bob@example.com>;tag=abc` → `sip:bob@example.com`;
/// a bare `sip:bob@example.com;tag=abc` loses its header parameters.
pub fn addr_spec(value: &str) -> &str {
    if let (Some(open), Some(close)) = (value.find('<'), value.rfind('>')) {
        if open < close {
            return &value[open + 1..close];
        }
    }
    match value.find(';') {
        Some(index) => value[..index].trim(),
        None => value.trim(),
    }
}

/// Parses the header parameters that follow a name-addr or value token.
///
/// Parameters inside angle brackets belong to the URI, not the header, and
/// are skipped. Values are unquoted; parameter names are lower-cased.
pub fn header_params(value: &str) -> Vec<(String, String)> {
    let after_addr = match value.rfind('>') {
        Some(close) => &value[close + 1..],
        None => value,
    };
    let mut params = Vec::new();
    // the first segment is the value token itself (or empty after '>')
    for part in after_addr.split(';').skip(1) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match part.split_once('=') {
            Some((name, raw)) => params.push((
                name.trim().to_ascii_lowercase(),
                raw.trim().trim_matches('"').to_string(),
            )),
            None => params.push((part.to_ascii_lowercase(), String::new())),
        }
    }
    params
}

/// Returns a single header parameter (e.g. `tag`, `branch`) from a value
pub fn header_param<'a>(value: &'a str, name: &str) -> Option<String> {
    header_params(value)
        .into_iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v)
}
