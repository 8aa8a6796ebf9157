//! Dialog state (RFC 3261 §12): identity, CSeq discipline, route sets, and
//! construction of in-dialog requests.

pub mod requests;

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use tracing::debug;

use voxsip_sip_core::{addr_spec, HeaderName, Method, Request, Response, Uri};

use crate::errors::{Error, Result};
use crate::transaction::key::generate_branch;

/// Dialog identity: `(Call-ID, local-tag, remote-tag)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DialogId {
    /// Call-ID shared by both parties
    pub call_id: String,
    /// Our tag (From tag on requests we send)
    pub local_tag: String,
    /// Peer's tag (To tag on responses to our requests)
    pub remote_tag: String,
}

impl fmt::Display for DialogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.call_id, self.local_tag, self.remote_tag)
    }
}

/// Dialog lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogState {
    /// Created by a provisional response carrying a To-tag
    Early,
    /// Established by a 2xx to INVITE
    Confirmed,
    /// Ended by BYE or a non-recoverable error
    Terminated,
}

/// One peer-to-peer dialog, UAC view.
///
/// Holds the exact `From`/`To` header values exchanged during establishment
/// so in-dialog requests echo them verbatim, plus the route set (reversed
/// `Record-Route`) and the remote target from `Contact`.
#[derive(Debug, Clone)]
pub struct Dialog {
    /// Dialog identity
    pub id: DialogId,
    /// Current state
    pub state: DialogState,
    /// Our From header value, tag included
    pub local_from: String,
    /// Peer's To header value, tag included
    pub remote_to: String,
    /// Where in-dialog requests are addressed (peer's Contact)
    pub remote_target: Uri,
    /// Proxies future requests must traverse, learned from Record-Route
    pub route_set: Vec<String>,
    /// Last CSeq number we used
    pub local_cseq: u32,
    /// Highest CSeq number seen from the peer
    pub remote_cseq: Option<u32>,
    /// True when the dialog was established over sips
    pub secure: bool,
    /// Reliable provisionals already acknowledged with PRACK
    acked_rseqs: HashSet<u32>,
}

impl Dialog {
    /// Builds a dialog from a response to our INVITE.
    ///
    /// Returns `None` when the response carries no To-tag (no dialog yet).
    /// Provisionals yield an `Early` dialog, 2xx a `Confirmed` one; the
    /// route set is the response's `Record-Route` values in reverse and the
    /// remote target its first `Contact`.
    pub fn from_uac_response(invite: &Request, response: &Response) -> Option<Dialog> {
        let remote_tag = response.to_tag()?;
        let local_tag = invite.from_tag()?;
        let call_id = invite.call_id()?.to_string();

        let state = if response.status.is_provisional() {
            DialogState::Early
        } else if response.status.is_success() {
            DialogState::Confirmed
        } else {
            return None;
        };

        let remote_target = response
            .contact()
            .and_then(|value| Uri::from_str(addr_spec(value)).ok())
            .unwrap_or_else(|| invite.uri.clone());

        let route_set: Vec<String> = response
            .headers
            .get_all(&HeaderName::RecordRoute)
            .map(str::to_string)
            .rev()
            .collect();

        let dialog = Dialog {
            id: DialogId {
                call_id,
                local_tag,
                remote_tag,
            },
            state,
            local_from: invite.from()?.to_string(),
            remote_to: response.to()?.to_string(),
            remote_target,
            route_set,
            local_cseq: invite.cseq()?.seq,
            remote_cseq: None,
            secure: invite.uri.scheme == voxsip_sip_core::types::uri::Scheme::Sips,
            acked_rseqs: HashSet::new(),
        };
        debug!(id = %dialog.id, state = ?dialog.state, "dialog created");
        Some(dialog)
    }

    /// Promotes an early dialog on the 2xx; refreshes target and routes
    pub fn confirm(&mut self, response: &Response) {
        if self.state == DialogState::Early {
            self.state = DialogState::Confirmed;
            if let Some(contact) = response.contact() {
                if let Ok(uri) = Uri::from_str(addr_spec(contact)) {
                    self.remote_target = uri;
                }
            }
            self.route_set = response
                .headers
                .get_all(&HeaderName::RecordRoute)
                .map(str::to_string)
                .rev()
                .collect();
            if let Some(to) = response.to() {
                self.remote_to = to.to_string();
            }
            debug!(id = %self.id, "dialog confirmed");
        }
    }

    /// Marks the dialog dead
    pub fn terminate(&mut self) {
        self.state = DialogState::Terminated;
        debug!(id = %self.id, "dialog terminated");
    }

    /// Next CSeq number for an outbound in-dialog request
    pub fn next_local_cseq(&mut self) -> u32 {
        self.local_cseq += 1;
        self.local_cseq
    }

    /// Validates the CSeq on a request from the peer (strictly increasing)
    pub fn check_remote_cseq(&mut self, seq: u32) -> Result<()> {
        if let Some(last) = self.remote_cseq {
            if seq <= last {
                return Err(Error::Protocol(format!(
                    "remote CSeq regression: {} after {}",
                    seq, last
                )));
            }
        }
        self.remote_cseq = Some(seq);
        Ok(())
    }

    /// Builds an in-dialog request: fresh branch, incremented CSeq,
    /// dialog-exact From/To, route set copied, request-URI = remote target.
    pub fn make_request(&mut self, method: Method, via_sent_by: &str, transport: &str) -> Request {
        let seq = self.next_local_cseq();
        self.make_request_with_cseq(method, seq, via_sent_by, transport)
    }

    fn make_request_with_cseq(
        &self,
        method: Method,
        seq: u32,
        via_sent_by: &str,
        transport: &str,
    ) -> Request {
        let mut request = Request::new(method.clone(), self.remote_target.clone());
        request.headers.push(
            HeaderName::Via,
            format!(
                "SIP/2.0/{} {};branch={}",
                transport.to_ascii_uppercase(),
                via_sent_by,
                generate_branch()
            ),
        );
        request.headers.push(HeaderName::MaxForwards, "70");
        request
            .headers
            .push(HeaderName::From, self.local_from.clone());
        request.headers.push(HeaderName::To, self.remote_to.clone());
        request
            .headers
            .push(HeaderName::CallId, self.id.call_id.clone());
        request
            .headers
            .push(HeaderName::CSeq, format!("{} {}", seq, method));
        for route in &self.route_set {
            request.headers.push(HeaderName::Route, route.clone());
        }
        request
    }

    /// Builds the out-of-transaction ACK for a 2xx: new branch, request-URI
    /// = remote target, CSeq number reused from the INVITE with method ACK.
    pub fn make_ack(&self, invite_cseq: u32, via_sent_by: &str, transport: &str) -> Request {
        self.make_request_with_cseq(Method::Ack, invite_cseq, via_sent_by, transport)
    }

    /// Builds a PRACK for a reliable provisional (RFC 3262 §4).
    ///
    /// Returns `None` when the response has no `RSeq` or that RSeq was
    /// already acknowledged (retransmitted reliable provisionals are
    /// absorbed).
    pub fn make_prack(
        &mut self,
        response: &Response,
        via_sent_by: &str,
        transport: &str,
    ) -> Option<Request> {
        let rseq: u32 = response
            .header(&HeaderName::RSeq)
            .and_then(|value| value.trim().parse().ok())?;
        let cseq = response.cseq()?;
        if !self.acked_rseqs.insert(rseq) {
            return None;
        }

        // PRACK is a normal in-dialog request with its own CSeq
        let seq = self.next_local_cseq();
        let mut prack = self.make_request_with_cseq(Method::Prack, seq, via_sent_by, transport);
        prack.headers.push(
            HeaderName::RAck,
            format!("{} {} {}", rseq, cseq.seq, cseq.method),
        );
        Some(prack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxsip_sip_core::prelude::*;

    fn invite() -> Request {
        RequestBuilder::new(Method::Invite, "sip:bob@peer.example.com")
            .unwrap()
            .via("us.example.com:5060", "UDP", Some("z9hG4bKdlg"))
            .from("Alice", "sip:alice@us.example.com", Some("local-tag"))
            .to("Bob", "sip:bob@peer.example.com", None)
            .call_id("dlg@us")
            .cseq(4)
            .build()
    }

    fn ok_response(invite: &Request) -> Response {
        let mut response = ResponseBuilder::from_request(invite, StatusCode::Ok, None)
            .to_tag("remote-tag")
            .contact("sip:bob@192.0.2.2:5080", None)
            .build();
        response
            .headers
            .push(HeaderName::RecordRoute, "<sip:p2.example.com;lr>");
        response
            .headers
            .push(HeaderName::RecordRoute, "<sip:p1.example.com;lr>");
        response
    }

    #[test]
    fn confirmed_dialog_from_2xx() {
        let invite = invite();
        let dialog = Dialog::from_uac_response(&invite, &ok_response(&invite)).unwrap();

        assert_eq!(dialog.state, DialogState::Confirmed);
        assert_eq!(dialog.id.local_tag, "local-tag");
        assert_eq!(dialog.id.remote_tag, "remote-tag");
        assert_eq!(dialog.remote_target.host, "192.0.2.2");
        // Record-Route reversed
        assert_eq!(
            dialog.route_set,
            vec!["<sip:p1.example.com;lr>", "<sip:p2.example.com;lr>"]
        );
        assert_eq!(dialog.local_cseq, 4);
    }

    #[test]
    fn early_dialog_from_provisional_with_tag() {
        let invite = invite();
        let ringing = ResponseBuilder::from_request(&invite, StatusCode::Ringing, None)
            .to_tag("early-tag")
            .build();
        let dialog = Dialog::from_uac_response(&invite, &ringing).unwrap();
        assert_eq!(dialog.state, DialogState::Early);
    }

    #[test]
    fn no_dialog_without_to_tag() {
        let invite = invite();
        let trying = ResponseBuilder::from_request(&invite, StatusCode::Trying, None).build();
        assert!(Dialog::from_uac_response(&invite, &trying).is_none());
    }

    #[test]
    fn in_dialog_request_increments_cseq() {
        let invite = invite();
        let mut dialog = Dialog::from_uac_response(&invite, &ok_response(&invite)).unwrap();

        let bye = dialog.make_request(Method::Bye, "us.example.com:5060", "UDP");
        assert_eq!(bye.method, Method::Bye);
        assert_eq!(bye.cseq().unwrap().seq, 5);
        assert_eq!(bye.uri.host, "192.0.2.2");
        assert_eq!(bye.from_tag().as_deref(), Some("local-tag"));
        assert_eq!(bye.to_tag().as_deref(), Some("remote-tag"));
        assert_eq!(bye.headers.get_all(&HeaderName::Route).count(), 2);
        // fresh branch, not the INVITE's
        assert_ne!(bye.via_branch().as_deref(), Some("z9hG4bKdlg"));

        let second = dialog.make_request(Method::Info, "us.example.com:5060", "UDP");
        assert_eq!(second.cseq().unwrap().seq, 6);
    }

    #[test]
    fn ack_reuses_invite_cseq_with_new_branch() {
        let invite = invite();
        let dialog = Dialog::from_uac_response(&invite, &ok_response(&invite)).unwrap();

        let ack = dialog.make_ack(4, "us.example.com:5060", "UDP");
        assert_eq!(ack.method, Method::Ack);
        assert_eq!(ack.cseq().unwrap().seq, 4);
        assert_eq!(ack.cseq().unwrap().method, Method::Ack);
        assert_eq!(ack.uri.host, "192.0.2.2");
        assert_ne!(ack.via_branch().as_deref(), Some("z9hG4bKdlg"));
    }

    #[test]
    fn remote_cseq_must_increase() {
        let invite = invite();
        let mut dialog = Dialog::from_uac_response(&invite, &ok_response(&invite)).unwrap();
        dialog.check_remote_cseq(10).unwrap();
        dialog.check_remote_cseq(11).unwrap();
        assert!(dialog.check_remote_cseq(11).is_err());
        assert!(dialog.check_remote_cseq(5).is_err());
    }

    #[test]
    fn prack_only_once_per_rseq() {
        let invite = invite();
        let ringing = ResponseBuilder::from_request(&invite, StatusCode::SessionProgress, None)
            .to_tag("early-tag")
            .header(HeaderName::Require, "100rel")
            .header(HeaderName::RSeq, "9021")
            .build();
        let mut dialog = Dialog::from_uac_response(&invite, &ringing).unwrap();

        let prack = dialog
            .make_prack(&ringing, "us.example.com:5060", "UDP")
            .unwrap();
        assert_eq!(prack.method, Method::Prack);
        assert_eq!(
            prack.header(&HeaderName::RAck),
            Some("9021 4 INVITE")
        );
        assert_eq!(prack.cseq().unwrap().seq, 5);

        // retransmitted reliable provisional: absorbed
        assert!(dialog
            .make_prack(&ringing, "us.example.com:5060", "UDP")
            .is_none());
    }
}
