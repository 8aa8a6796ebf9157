//! Digest-authentication retry.
//!
//! The transaction manager surfaces `AuthChallenge` events; the UA layer
//! answers them by sending the request [`retry_request`] builds: a fresh
//! transaction with a new branch, CSeq+1, and the computed credential
//! header. Nonce counts live here too, keyed per (Call-ID, method) as the
//! digest `nc` parameter requires.

use std::collections::HashMap;

use voxsip_sip_core::auth::{
    compute_authorization, credential_header_for, DigestChallenge, DigestCredentials,
};
use voxsip_sip_core::{HeaderName, Request, StatusCode};

use crate::errors::{Error, Result};
use crate::transaction::key::generate_branch;

/// Per-(Call-ID, method) nonce counter backing the digest `nc` parameter
#[derive(Debug, Default)]
pub struct NonceCounter {
    counts: HashMap<(String, String), u32>,
}

impl NonceCounter {
    /// Creates an empty counter table
    pub fn new() -> Self {
        NonceCounter::default()
    }

    /// Returns the next count for this (Call-ID, method), starting at 1
    pub fn next(&mut self, call_id: &str, method: &str) -> u32 {
        let entry = self
            .counts
            .entry((call_id.to_string(), method.to_string()))
            .or_insert(0);
        *entry += 1;
        *entry
    }

    /// Resets the count after a stale-nonce challenge (next use yields 1)
    pub fn reset(&mut self, call_id: &str, method: &str) {
        self.counts
            .remove(&(call_id.to_string(), method.to_string()));
    }
}

/// Builds the credentialed retry for a challenged request.
///
/// Pure: the original request is not touched. The result differs from the
/// original in exactly three ways: a fresh top-Via branch, CSeq
/// incremented by one, and the `Authorization` / `Proxy-Authorization`
/// header (selected by the challenge status) computed from `challenge` and
/// `credentials`.
pub fn retry_request(
    original: &Request,
    challenge: &DigestChallenge,
    credentials: &DigestCredentials,
    nonce_count: u32,
    challenge_status: StatusCode,
) -> Result<Request> {
    if !credentials.matches_realm(&challenge.realm) {
        return Err(Error::AuthFailed {
            realm: challenge.realm.clone(),
        });
    }
    let credential_header = credential_header_for(challenge_status).ok_or_else(|| {
        Error::Protocol(format!(
            "{} is not an authentication challenge",
            challenge_status.as_u16()
        ))
    })?;

    let mut request = original.clone();

    // fresh transaction: new branch on the top Via
    if let Some(via) = original.top_via() {
        let rebranched = match via.find(";branch=") {
            Some(index) => {
                let after = &via[index + ";branch=".len()..];
                let rest = after.find(';').map(|i| &after[i..]).unwrap_or("");
                format!("{};branch={}{}", &via[..index], generate_branch(), rest)
            }
            None => format!("{};branch={}", via, generate_branch()),
        };
        request.headers.set(HeaderName::Via, rebranched);
    }

    // CSeq+1, same method
    let cseq = original
        .cseq()
        .ok_or_else(|| Error::MissingHeader("CSeq".to_string()))?;
    request.headers.set(
        HeaderName::CSeq,
        format!("{} {}", cseq.seq + 1, cseq.method),
    );

    let authorization = compute_authorization(
        &original.method,
        &original.uri.to_string(),
        challenge,
        credentials,
        nonce_count,
        None,
    )?;
    request.headers.set(credential_header, authorization);

    Ok(request)
}
