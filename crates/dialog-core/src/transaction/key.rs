//! Transaction identity and branch matching (RFC 3261 §17.1.3 / §17.2.3).

use std::fmt;

use uuid::Uuid;
use voxsip_sip_core::{Message, Method, Request, Response};

/// Magic cookie every RFC 3261 branch parameter starts with
pub const RFC3261_BRANCH_MAGIC_COOKIE: &str = "z9hG4bK";

/// Generates a fresh RFC 3261 branch parameter
pub fn generate_branch() -> String {
    format!(
        "{}{}",
        RFC3261_BRANCH_MAGIC_COOKIE,
        &Uuid::new_v4().simple().to_string()[..16]
    )
}

/// Transaction identity: top-Via branch + Call-ID + CSeq method.
///
/// ACK and CANCEL correlate to the INVITE they reference, so key
/// construction maps their method to the method being matched (ACK always;
/// CANCEL only on the server side, where the CANCEL transaction itself is
/// distinct but the cancelled INVITE is found by branch).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionKey {
    /// Top Via branch parameter
    pub branch: String,
    /// Call-ID header value
    pub call_id: String,
    /// CSeq method (the method being matched, see above)
    pub method: Method,
    /// Server-side transactions are keyed separately from client-side
    pub is_server: bool,
}

impl TransactionKey {
    /// Creates a key from its parts
    pub fn new(
        branch: impl Into<String>,
        call_id: impl Into<String>,
        method: Method,
        is_server: bool,
    ) -> Self {
        TransactionKey {
            branch: branch.into(),
            call_id: call_id.into(),
            method,
            is_server,
        }
    }

    /// Key for a client transaction built from an outbound request
    pub fn from_client_request(request: &Request) -> Option<Self> {
        Some(TransactionKey::new(
            request.via_branch()?,
            request.call_id()?,
            request.method.clone(),
            false,
        ))
    }

    /// Key a response should match against (client side).
    ///
    /// Uses the response's top-Via branch and CSeq method, per §17.1.3.
    pub fn from_response(response: &Response) -> Option<Self> {
        Some(TransactionKey::new(
            response.via_branch()?,
            response.call_id()?,
            response.cseq()?.method,
            false,
        ))
    }

    /// Key for the server transaction an inbound request belongs to.
    ///
    /// ACK maps onto the INVITE server transaction it acknowledges.
    pub fn from_server_request(request: &Request) -> Option<Self> {
        let method = match request.method {
            Method::Ack => Method::Invite,
            ref other => other.clone(),
        };
        Some(TransactionKey::new(
            request.via_branch()?,
            request.call_id()?,
            method,
            true,
        ))
    }

    /// True when the branch carries the RFC 3261 magic cookie; without it
    /// the full-header fallback matching applies
    pub fn has_magic_cookie(&self) -> bool {
        self.branch.starts_with(RFC3261_BRANCH_MAGIC_COOKIE)
    }
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            if self.is_server { "uas" } else { "uac" },
            self.branch,
            self.call_id,
            self.method
        )
    }
}

/// RFC 3261 §17.1.3 fallback when the peer's Via lacks the magic cookie:
/// match on Call-ID, CSeq, and From/To tags of the original request.
pub fn response_matches_request(request: &Request, response: &Response) -> bool {
    let Some(request_cseq) = request.cseq() else {
        return false;
    };
    let Some(response_cseq) = response.cseq() else {
        return false;
    };
    request_cseq == response_cseq
        && request.call_id() == response.call_id()
        && request.from_tag() == response.from_tag()
}

/// True when `message` is a response that matches transaction `key`
pub fn response_key_matches(key: &TransactionKey, message: &Message) -> bool {
    match message {
        Message::Response(response) => {
            TransactionKey::from_response(response).as_ref() == Some(key)
        }
        Message::Request(_) => false,
    }
}
