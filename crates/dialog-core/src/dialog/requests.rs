//! Request construction that sits outside an established dialog.

use voxsip_sip_core::{HeaderName, Method, Request};

/// Builds a CANCEL for a pending INVITE (RFC 3261 §9.1).
///
/// CANCEL shares the INVITE's request-URI, Call-ID, From, To (still without
/// a tag), CSeq *number*, and top Via (same branch); only the methods
/// differ. The caller must not send it before a provisional response has
/// arrived.
pub fn make_cancel(invite: &Request) -> Request {
    let mut cancel = Request::new(Method::Cancel, invite.uri.clone());
    if let Some(via) = invite.top_via() {
        cancel.headers.push(HeaderName::Via, via);
    }
    cancel.headers.push(HeaderName::MaxForwards, "70");
    if let Some(from) = invite.from() {
        cancel.headers.push(HeaderName::From, from);
    }
    if let Some(to) = invite.to() {
        cancel.headers.push(HeaderName::To, to);
    }
    if let Some(call_id) = invite.call_id() {
        cancel.headers.push(HeaderName::CallId, call_id);
    }
    if let Some(cseq) = invite.cseq() {
        cancel
            .headers
            .push(HeaderName::CSeq, format!("{} CANCEL", cseq.seq));
    }
    for route in invite.headers.get_all(&HeaderName::Route) {
        cancel.headers.push(HeaderName::Route, route);
    }
    cancel
}
