//! HTTP Digest authentication for SIP (RFC 7616, MD5 profile).
//!
//! Covers the challenge-response cycle a UAC needs: parsing
//! `WWW-Authenticate` / `Proxy-Authenticate` challenges and computing the
//! matching `Authorization` / `Proxy-Authorization` value. Only `qop=auth`
//! and the MD5 algorithm are computed; `auth-int` and SHA-256 challenges
//! parse but are rejected at computation time.
//!
//! Digest provides request authentication, not confidentiality; run over
//! TLS when the path is untrusted.

use std::fmt::Write as _;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::header_name::HeaderName;
use crate::types::method::Method;
use crate::types::status::StatusCode;

/// Username/password pair, optionally pinned to a realm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestCredentials {
    /// Authentication username
    pub username: String,
    /// Authentication password
    pub password: String,
    /// When set, these credentials only apply to this realm
    pub realm: Option<String>,
}

impl DigestCredentials {
    /// Creates credentials valid for any realm
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        DigestCredentials {
            username: username.into(),
            password: password.into(),
            realm: None,
        }
    }

    /// True when these credentials may answer a challenge for `realm`
    pub fn matches_realm(&self, realm: &str) -> bool {
        match &self.realm {
            Some(own) => own == realm,
            None => true,
        }
    }
}

/// A parsed digest challenge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestChallenge {
    /// Protection realm (required)
    pub realm: String,
    /// Server nonce (required)
    pub nonce: String,
    /// Quality of protection offered, e.g. `auth`
    pub qop: Option<String>,
    /// Digest algorithm; absent means MD5
    pub algorithm: Option<String>,
    /// Opaque blob to echo back
    pub opaque: Option<String>,
    /// True when the server marked the previous nonce stale
    pub stale: bool,
}

/// Splits a challenge parameter list on commas outside quoted strings
fn split_params(value: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    for (index, ch) in value.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(&value[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    parts.push(&value[start..]);
    parts
}

impl DigestChallenge {
    /// Parses a `WWW-Authenticate` / `Proxy-Authenticate` header value.
    ///
    /// Requires the `Digest` scheme and the `realm` and `nonce` parameters;
    /// everything else is optional. Values are unquoted; parameter names are
    /// matched case-insensitively.
    pub fn parse(header_value: &str) -> Result<Self> {
        let value = header_value.trim();
        let params_str = value
            .strip_prefix("Digest ")
            .or_else(|| value.strip_prefix("digest "))
            .ok_or_else(|| {
                Error::InvalidChallenge(format!("not a Digest challenge: {:?}", header_value))
            })?;

        let mut realm = None;
        let mut nonce = None;
        let mut qop = None;
        let mut algorithm = None;
        let mut opaque = None;
        let mut stale = false;

        for part in split_params(params_str) {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (key, raw) = match part.split_once('=') {
                Some(pair) => pair,
                None => continue,
            };
            let key = key.trim().to_ascii_lowercase();
            let unquoted = raw.trim().trim_matches('"').to_string();
            match key.as_str() {
                "realm" => realm = Some(unquoted),
                "nonce" => nonce = Some(unquoted),
                "qop" => qop = Some(unquoted),
                "algorithm" => algorithm = Some(unquoted),
                "opaque" => opaque = Some(unquoted),
                "stale" => stale = unquoted.eq_ignore_ascii_case("true"),
                _ => {}
            }
        }

        Ok(DigestChallenge {
            realm: realm
                .ok_or_else(|| Error::InvalidChallenge("challenge missing realm".to_string()))?,
            nonce: nonce
                .ok_or_else(|| Error::InvalidChallenge("challenge missing nonce".to_string()))?,
            qop,
            algorithm,
            opaque,
            stale,
        })
    }

    /// The qop value the client will use, if the server offered one we speak.
    ///
    /// Servers may offer a list (`auth,auth-int`); only `auth` is selected.
    pub fn usable_qop(&self) -> Option<&str> {
        self.qop.as_deref().and_then(|offered| {
            offered
                .split(',')
                .map(str::trim)
                .find(|qop| qop.eq_ignore_ascii_case("auth"))
        })
    }
}

/// Returns the credential header name answering a challenge status:
/// `Authorization` for 401, `Proxy-Authorization` for 407
pub fn credential_header_for(status: StatusCode) -> Option<HeaderName> {
    match status.as_u16() {
        401 => Some(HeaderName::Authorization),
        407 => Some(HeaderName::ProxyAuthorization),
        _ => None,
    }
}

/// Returns the challenge header name carried by a challenge status:
/// `WWW-Authenticate` for 401, `Proxy-Authenticate` for 407
pub fn challenge_header_for(status: StatusCode) -> Option<HeaderName> {
    match status.as_u16() {
        401 => Some(HeaderName::WwwAuthenticate),
        407 => Some(HeaderName::ProxyAuthenticate),
        _ => None,
    }
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// Generates an 8-byte cryptographically random cnonce, hex-encoded
pub fn generate_cnonce() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut out = String::with_capacity(16);
    for byte in bytes {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

/// Computes an `Authorization` / `Proxy-Authorization` header value.
///
/// `nonce_count` is the per-(Call-ID, method) counter maintained by the
/// caller, 1-based. `cnonce` may be pinned for reproducible tests; pass
/// `None` to generate a fresh one.
pub fn compute_authorization(
    method: &Method,
    uri: &str,
    challenge: &DigestChallenge,
    credentials: &DigestCredentials,
    nonce_count: u32,
    cnonce: Option<&str>,
) -> Result<String> {
    if let Some(algorithm) = &challenge.algorithm {
        if !algorithm.eq_ignore_ascii_case("md5") {
            return Err(Error::InvalidChallenge(format!(
                "unsupported digest algorithm: {}",
                algorithm
            )));
        }
    }

    let ha1 = md5_hex(&format!(
        "{}:{}:{}",
        credentials.username, challenge.realm, credentials.password
    ));
    let ha2 = md5_hex(&format!("{}:{}", method, uri));

    let qop = challenge.usable_qop();
    if challenge.qop.is_some() && qop.is_none() {
        return Err(Error::InvalidChallenge(format!(
            "unsupported qop: {:?}",
            challenge.qop
        )));
    }

    let nc_value = format!("{:08x}", nonce_count);
    let cnonce_owned;
    let cnonce = match cnonce {
        Some(value) => value,
        None => {
            cnonce_owned = generate_cnonce();
            &cnonce_owned
        }
    };

    let response = match qop {
        Some(qop) => md5_hex(&format!(
            "{}:{}:{}:{}:{}:{}",
            ha1, challenge.nonce, nc_value, cnonce, qop, ha2
        )),
        None => md5_hex(&format!("{}:{}:{}", ha1, challenge.nonce, ha2)),
    };

    let mut header = format!(
        "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\", algorithm=MD5",
        credentials.username, challenge.realm, challenge.nonce, uri, response
    );
    if let Some(opaque) = &challenge.opaque {
        let _ = write!(header, ", opaque=\"{}\"", opaque);
    }
    if let Some(qop) = qop {
        let _ = write!(header, ", qop={}, nc={}, cnonce=\"{}\"", qop, nc_value, cnonce);
    }
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_challenge_basic() {
        let challenge = DigestChallenge::parse(
            "Digest realm=\"test\", nonce=\"abc\", qop=\"auth\", algorithm=MD5",
        )
        .unwrap();
        assert_eq!(challenge.realm, "test");
        assert_eq!(challenge.nonce, "abc");
        assert_eq!(challenge.qop.as_deref(), Some("auth"));
        assert_eq!(challenge.algorithm.as_deref(), Some("MD5"));
        assert!(!challenge.stale);
    }

    #[test]
    fn parse_challenge_quoted_commas() {
        let challenge = DigestChallenge::parse(
            "Digest realm=\"sip, with comma\", nonce=\"n1\", opaque=\"o,o\"",
        )
        .unwrap();
        assert_eq!(challenge.realm, "sip, with comma");
        assert_eq!(challenge.opaque.as_deref(), Some("o,o"));
    }

    #[test]
    fn parse_challenge_stale() {
        let challenge =
            DigestChallenge::parse("Digest realm=\"r\", nonce=\"n2\", stale=true").unwrap();
        assert!(challenge.stale);
        let challenge =
            DigestChallenge::parse("Digest realm=\"r\", nonce=\"n2\", stale=FALSE").unwrap();
        assert!(!challenge.stale);
    }

    #[test]
    fn parse_rejects_non_digest() {
        assert!(DigestChallenge::parse("Bearer token").is_err());
        assert!(DigestChallenge::parse("Digest nonce=\"n\"").is_err());
        assert!(DigestChallenge::parse("Digest realm=\"r\"").is_err());
    }

    #[test]
    fn qop_list_selects_auth() {
        let challenge =
            DigestChallenge::parse("Digest realm=\"r\", nonce=\"n\", qop=\"auth-int, auth\"")
                .unwrap();
        assert_eq!(challenge.usable_qop(), Some("auth"));
    }

    #[test]
    fn digest_with_qop_matches_reference_vector() {
        // MD5("user:test:pwd") = a345025238a00962a27208c8796d1b3a
        // MD5("REGISTER:sip:test") = 8aa6b1fbbdca6aa7d9057260bd71d47c
        let challenge =
            DigestChallenge::parse("Digest realm=\"test\", nonce=\"abc\", qop=\"auth\"").unwrap();
        let credentials = DigestCredentials::new("user", "pwd");
        let header = compute_authorization(
            &Method::Register,
            "sip:test",
            &challenge,
            &credentials,
            1,
            Some("deadbeef"),
        )
        .unwrap();

        assert!(header.starts_with("Digest username=\"user\", realm=\"test\""));
        assert!(header.contains("response=\"794b384571281c38a42c520ed396ebc1\""));
        assert!(header.contains("nc=00000001"));
        assert!(header.contains("cnonce=\"deadbeef\""));
        assert!(header.contains("qop=auth"));
    }

    #[test]
    fn digest_without_qop_uses_short_form() {
        let challenge = DigestChallenge::parse("Digest realm=\"test\", nonce=\"abc\"").unwrap();
        let credentials = DigestCredentials::new("user", "pwd");
        let header = compute_authorization(
            &Method::Register,
            "sip:test",
            &challenge,
            &credentials,
            1,
            Some("deadbeef"),
        )
        .unwrap();

        assert!(header.contains("response=\"aa47d3f8990b6d1c80a626554c502662\""));
        assert!(!header.contains("qop="));
        assert!(!header.contains("nc="));
    }

    #[test]
    fn unsupported_algorithm_rejected() {
        let challenge =
            DigestChallenge::parse("Digest realm=\"r\", nonce=\"n\", algorithm=SHA-256").unwrap();
        let credentials = DigestCredentials::new("u", "p");
        assert!(compute_authorization(
            &Method::Register,
            "sip:r",
            &challenge,
            &credentials,
            1,
            None
        )
        .is_err());
    }

    #[test]
    fn header_name_selection() {
        assert_eq!(
            credential_header_for(StatusCode::Unauthorized),
            Some(HeaderName::Authorization)
        );
        assert_eq!(
            credential_header_for(StatusCode::ProxyAuthenticationRequired),
            Some(HeaderName::ProxyAuthorization)
        );
        assert_eq!(credential_header_for(StatusCode::Ok), None);
    }

    #[test]
    fn cnonce_is_sixteen_hex_chars() {
        let cnonce = generate_cnonce();
        assert_eq!(cnonce.len(), 16);
        assert!(cnonce.bytes().all(|b| b.is_ascii_hexdigit()));
    }
}
