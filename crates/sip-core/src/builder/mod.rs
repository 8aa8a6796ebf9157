//! Fluent builders for SIP requests and responses.
//!
//! Builders do not validate completeness; they exist to make the common
//! header set easy to assemble. `Content-Length` is always recomputed at
//! render time, so it never needs to be set here.

use std::str::FromStr;

use bytes::Bytes;

use crate::error::Result;
use crate::types::cseq::CSeq;
use crate::types::header_name::HeaderName;
use crate::types::headers::Headers;
use crate::types::message::{Request, Response};
use crate::types::method::Method;
use crate::types::status::StatusCode;
use crate::types::uri::Uri;

/// Builder for [`Request`]
///
/// # Examples
///
/// ```rust
/// use voxsip_sip_core::prelude::*;
///
/// let request = RequestBuilder::new(Method::Register, "sip:example.com").unwrap()
///     .from("Alice", "sip:alice@example.com", Some("a73kszlfl"))
///     .to("Alice", "sip:alice@example.com", None)
///     .call_id("1j9FpLxk3uxtm8tn@host")
///     .cseq(1)
///     .via("192.0.2.4:5060", "UDP", Some("z9hG4bKnashds7"))
///     .max_forwards(70)
///     .header(HeaderName::Expires, "300")
///     .build();
/// assert_eq!(request.method, Method::Register);
/// ```
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    method: Method,
    uri: Uri,
    headers: Headers,
    body: Bytes,
}

fn name_addr(display: &str, uri: &str, tag: Option<&str>) -> String {
    let mut value = if display.is_empty() {
        format!("<{}>", uri)
    } else {
        format!("\"{}\" <{}>", display, uri)
    };
    if let Some(tag) = tag {
        value.push_str(";tag=");
        value.push_str(tag);
    }
    value
}

impl RequestBuilder {
    /// Starts a request towards `uri`.
    ///
    /// Fails when `uri` does not parse as a SIP URI.
    pub fn new(method: Method, uri: &str) -> Result<Self> {
        Ok(RequestBuilder {
            method,
            uri: Uri::from_str(uri)?,
            headers: Headers::new(),
            body: Bytes::new(),
        })
    }

    /// Starts a request towards an already-parsed URI
    pub fn from_uri(method: Method, uri: Uri) -> Self {
        RequestBuilder {
            method,
            uri,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Adds a From header with optional display name and tag
    pub fn from(mut self, display: &str, uri: &str, tag: Option<&str>) -> Self {
        self.headers
            .set(HeaderName::From, name_addr(display, uri, tag));
        self
    }

    /// Adds a To header with optional display name and tag
    pub fn to(mut self, display: &str, uri: &str, tag: Option<&str>) -> Self {
        self.headers.set(HeaderName::To, name_addr(display, uri, tag));
        self
    }

    /// Sets the raw To header value (for echoing dialog-exact values)
    pub fn to_raw(mut self, value: impl Into<String>) -> Self {
        self.headers.set(HeaderName::To, value);
        self
    }

    /// Sets the raw From header value
    pub fn from_raw(mut self, value: impl Into<String>) -> Self {
        self.headers.set(HeaderName::From, value);
        self
    }

    /// Sets the Call-ID
    pub fn call_id(mut self, call_id: impl Into<String>) -> Self {
        self.headers.set(HeaderName::CallId, call_id);
        self
    }

    /// Sets the CSeq number; the method comes from the request line
    pub fn cseq(mut self, seq: u32) -> Self {
        let cseq = CSeq::new(seq, self.method.clone());
        self.headers.set(HeaderName::CSeq, cseq.to_string());
        self
    }

    /// Adds a Via header: `SIP/2.0/<transport> <sent_by>;branch=<branch>`
    pub fn via(mut self, sent_by: &str, transport: &str, branch: Option<&str>) -> Self {
        let mut value = format!("SIP/2.0/{} {}", transport.to_ascii_uppercase(), sent_by);
        if let Some(branch) = branch {
            value.push_str(";branch=");
            value.push_str(branch);
        }
        self.headers.set(HeaderName::Via, value);
        self
    }

    /// Sets Max-Forwards
    pub fn max_forwards(mut self, hops: u32) -> Self {
        self.headers.set(HeaderName::MaxForwards, hops.to_string());
        self
    }

    /// Adds a Contact header
    pub fn contact(mut self, uri: &str, display: Option<&str>) -> Self {
        self.headers
            .set(HeaderName::Contact, name_addr(display.unwrap_or(""), uri, None));
        self
    }

    /// Sets User-Agent
    pub fn user_agent(mut self, value: impl Into<String>) -> Self {
        self.headers.set(HeaderName::UserAgent, value);
        self
    }

    /// Sets an arbitrary header, replacing earlier values of the same name
    pub fn header(mut self, name: HeaderName, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Appends a header without replacing earlier values (Via, Route)
    pub fn push_header(mut self, name: HeaderName, value: impl Into<String>) -> Self {
        self.headers.push(name, value);
        self
    }

    /// Sets Content-Type
    pub fn content_type(mut self, value: impl Into<String>) -> Self {
        self.headers.set(HeaderName::ContentType, value);
        self
    }

    /// Sets the body bytes
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Finishes the request
    pub fn build(self) -> Request {
        Request {
            method: self.method,
            uri: self.uri,
            headers: self.headers,
            body: self.body,
        }
    }
}

/// Builder for [`Response`]
///
/// `from_request` pre-populates the header set a UAS must echo: all Via
/// headers in order, From, To, Call-ID, and CSeq.
#[derive(Debug, Clone)]
pub struct ResponseBuilder {
    status: StatusCode,
    reason: String,
    headers: Headers,
    body: Bytes,
}

impl ResponseBuilder {
    /// Starts a response; `reason` defaults to the canonical phrase
    pub fn new(status: StatusCode, reason: Option<&str>) -> Self {
        ResponseBuilder {
            status,
            reason: reason.unwrap_or(status.reason_phrase()).to_string(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Starts a response echoing the request's Via/From/To/Call-ID/CSeq
    pub fn from_request(request: &Request, status: StatusCode, reason: Option<&str>) -> Self {
        let mut builder = ResponseBuilder::new(status, reason);
        for via in request.headers.get_all(&HeaderName::Via) {
            builder.headers.push(HeaderName::Via, via);
        }
        for name in [
            HeaderName::From,
            HeaderName::To,
            HeaderName::CallId,
            HeaderName::CSeq,
        ] {
            if let Some(value) = request.headers.get(&name) {
                builder.headers.push(name, value.to_string());
            }
        }
        builder
    }

    /// Appends `;tag=` to the To header unless one is already present
    pub fn to_tag(mut self, tag: &str) -> Self {
        if let Some(current) = self.headers.get(&HeaderName::To) {
            if !crate::types::uri::header_params(current)
                .iter()
                .any(|(name, _)| name == "tag")
            {
                let value = format!("{};tag={}", current, tag);
                self.headers.set(HeaderName::To, value);
            }
        }
        self
    }

    /// Sets an arbitrary header, replacing earlier values of the same name
    pub fn header(mut self, name: HeaderName, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Sets Contact
    pub fn contact(mut self, uri: &str, display: Option<&str>) -> Self {
        self.headers
            .set(HeaderName::Contact, name_addr(display.unwrap_or(""), uri, None));
        self
    }

    /// Sets Server
    pub fn server(mut self, value: impl Into<String>) -> Self {
        self.headers.set(HeaderName::Server, value);
        self
    }

    /// Sets Content-Type
    pub fn content_type(mut self, value: impl Into<String>) -> Self {
        self.headers.set(HeaderName::ContentType, value);
        self
    }

    /// Sets the body bytes
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Finishes the response
    pub fn build(self) -> Response {
        Response {
            status: self.status,
            reason: self.reason,
            headers: self.headers,
            body: self.body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_message;

    #[test]
    fn request_builder_round_trip() {
        let request = RequestBuilder::new(Method::Invite, "sip:bob@example.com")
            .unwrap()
            .from("Alice", "sip:alice@example.com", Some("1928301774"))
            .to("Bob", "sip:bob@example.com", None)
            .call_id("a84b4c76e66710@pc33.atlanta.com")
            .cseq(314159)
            .via("pc33.atlanta.com", "udp", Some("z9hG4bK776asdhds"))
            .max_forwards(70)
            .contact("sip:alice@pc33.atlanta.com", None)
            .content_type("application/sdp")
            .body(&b"v=0\r\n"[..])
            .build();

        let parsed = parse_message(&request.to_bytes()).unwrap();
        let reparsed = parsed.as_request().unwrap();
        assert_eq!(reparsed.method, Method::Invite);
        assert_eq!(reparsed.cseq(), Some(CSeq::new(314159, Method::Invite)));
        assert_eq!(
            reparsed.top_via(),
            Some("SIP/2.0/UDP pc33.atlanta.com;branch=z9hG4bK776asdhds")
        );
        assert_eq!(&reparsed.body[..], b"v=0\r\n");
    }

    #[test]
    fn response_from_request_echoes_header_set() {
        let request = RequestBuilder::new(Method::Bye, "sip:bob@example.com")
            .unwrap()
            .from("", "sip:alice@example.com", Some("ft"))
            .to("", "sip:bob@example.com", Some("tt"))
            .call_id("cid")
            .cseq(2)
            .via("host:5060", "UDP", Some("z9hG4bKxyz"))
            .build();

        let response = ResponseBuilder::from_request(&request, StatusCode::Ok, None).build();
        assert_eq!(response.top_via(), request.top_via());
        assert_eq!(response.from(), request.from());
        assert_eq!(response.to(), request.to());
        assert_eq!(response.call_id(), request.call_id());
        assert_eq!(response.cseq(), request.cseq());
    }

    #[test]
    fn to_tag_added_once() {
        let request = RequestBuilder::new(Method::Invite, "sip:bob@example.com")
            .unwrap()
            .to("", "sip:bob@example.com", None)
            .build();
        let response = ResponseBuilder::from_request(&request, StatusCode::Ringing, None)
            .to_tag("abc")
            .to_tag("def")
            .build();
        assert_eq!(response.to_tag().as_deref(), Some("abc"));
    }
}
