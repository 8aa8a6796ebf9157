//! SIP request, response, and the tagged sum over both.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use super::cseq::CSeq;
use super::header_name::HeaderName;
use super::headers::Headers;
use super::method::Method;
use super::status::StatusCode;
use super::uri::{header_param, Uri};

/// The one protocol version this stack speaks
pub const SIP_VERSION: &str = "SIP/2.0";

/// A SIP request
///
/// Mandatory headers (`Via`, `From`, `To`, `Call-ID`, `CSeq`, `Max-Forwards`)
/// are not enforced structurally; builders add them and the parser surfaces
/// whatever arrived. Accessors return `None` when a header is absent so the
/// layers above can decide between rejection and repair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Request method
    pub method: Method,
    /// Request-URI
    pub uri: Uri,
    /// All headers in insertion order
    pub headers: Headers,
    /// Message body, exact bytes
    pub body: Bytes,
}

/// A SIP response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Status code, always within [100, 699]
    pub status: StatusCode,
    /// Reason phrase as constructed or received (may differ from canonical)
    pub reason: String,
    /// All headers in insertion order
    pub headers: Headers,
    /// Message body, exact bytes
    pub body: Bytes,
}

/// Either a request or a response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// A SIP request
    Request(Request),
    /// A SIP response
    Response(Response),
}

macro_rules! common_accessors {
    () => {
        /// First value of `name`
        pub fn header(&self, name: &HeaderName) -> Option<&str> {
            self.headers.get(name)
        }

        /// Call-ID header value
        pub fn call_id(&self) -> Option<&str> {
            self.headers.get(&HeaderName::CallId)
        }

        /// Parsed CSeq header
        pub fn cseq(&self) -> Option<CSeq> {
            self.headers
                .get(&HeaderName::CSeq)
                .and_then(|v| v.parse().ok())
        }

        /// Raw From header value
        pub fn from(&self) -> Option<&str> {
            self.headers.get(&HeaderName::From)
        }

        /// Raw To header value
        pub fn to(&self) -> Option<&str> {
            self.headers.get(&HeaderName::To)
        }

        /// `tag` parameter of the From header
        pub fn from_tag(&self) -> Option<String> {
            self.from().and_then(|v| header_param(v, "tag"))
        }

        /// `tag` parameter of the To header
        pub fn to_tag(&self) -> Option<String> {
            self.to().and_then(|v| header_param(v, "tag"))
        }

        /// Topmost Via header value
        pub fn top_via(&self) -> Option<&str> {
            self.headers.get(&HeaderName::Via)
        }

        /// `branch` parameter of the topmost Via
        pub fn via_branch(&self) -> Option<String> {
            self.top_via().and_then(|v| header_param(v, "branch"))
        }

        /// First Contact header value
        pub fn contact(&self) -> Option<&str> {
            self.headers.get(&HeaderName::Contact)
        }

        /// Content-Type header value
        pub fn content_type(&self) -> Option<&str> {
            self.headers.get(&HeaderName::ContentType)
        }

        /// Body as UTF-8, lossily converted
        pub fn body_str(&self) -> std::borrow::Cow<'_, str> {
            String::from_utf8_lossy(&self.body)
        }
    };
}

impl Request {
    /// Creates a request with empty headers and body
    pub fn new(method: Method, uri: Uri) -> Self {
        Request {
            method,
            uri,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    common_accessors!();

    /// Serializes to canonical wire form.
    ///
    /// `Content-Length` is recomputed from the actual body length; header
    /// order is otherwise preserved.
    pub fn to_bytes(&self) -> Bytes {
        let mut headers = self.headers.clone();
        headers.set(HeaderName::ContentLength, self.body.len().to_string());

        let mut buf = BytesMut::with_capacity(256 + self.body.len());
        buf.put_slice(self.method.as_str().as_bytes());
        buf.put_u8(b' ');
        buf.put_slice(self.uri.to_string().as_bytes());
        buf.put_u8(b' ');
        buf.put_slice(SIP_VERSION.as_bytes());
        buf.put_slice(b"\r\n");
        buf.put_slice(headers.to_string().as_bytes());
        buf.put_slice(b"\r\n");
        buf.put_slice(&self.body);
        buf.freeze()
    }
}

impl Response {
    /// Creates a response with the canonical reason phrase and no headers
    pub fn new(status: StatusCode) -> Self {
        Response {
            status,
            reason: status.reason_phrase().to_string(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    common_accessors!();

    /// Serializes to canonical wire form, recomputing `Content-Length`
    pub fn to_bytes(&self) -> Bytes {
        let mut headers = self.headers.clone();
        headers.set(HeaderName::ContentLength, self.body.len().to_string());

        let mut buf = BytesMut::with_capacity(256 + self.body.len());
        buf.put_slice(SIP_VERSION.as_bytes());
        buf.put_u8(b' ');
        buf.put_slice(self.status.as_u16().to_string().as_bytes());
        buf.put_u8(b' ');
        buf.put_slice(self.reason.as_bytes());
        buf.put_slice(b"\r\n");
        buf.put_slice(headers.to_string().as_bytes());
        buf.put_slice(b"\r\n");
        buf.put_slice(&self.body);
        buf.freeze()
    }
}

impl Message {
    /// True for the request variant
    pub fn is_request(&self) -> bool {
        matches!(self, Message::Request(_))
    }

    /// True for the response variant
    pub fn is_response(&self) -> bool {
        matches!(self, Message::Response(_))
    }

    /// Shared header view regardless of variant
    pub fn headers(&self) -> &Headers {
        match self {
            Message::Request(req) => &req.headers,
            Message::Response(resp) => &resp.headers,
        }
    }

    /// Call-ID header value
    pub fn call_id(&self) -> Option<&str> {
        self.headers().get(&HeaderName::CallId)
    }

    /// Parsed CSeq header
    pub fn cseq(&self) -> Option<CSeq> {
        self.headers()
            .get(&HeaderName::CSeq)
            .and_then(|v| v.parse().ok())
    }

    /// `branch` parameter of the topmost Via
    pub fn via_branch(&self) -> Option<String> {
        self.headers()
            .get(&HeaderName::Via)
            .and_then(|v| header_param(v, "branch"))
    }

    /// Serializes either variant to wire form
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Message::Request(req) => req.to_bytes(),
            Message::Response(resp) => resp.to_bytes(),
        }
    }

    /// Borrows the request, if this is one
    pub fn as_request(&self) -> Option<&Request> {
        match self {
            Message::Request(req) => Some(req),
            Message::Response(_) => None,
        }
    }

    /// Borrows the response, if this is one
    pub fn as_response(&self) -> Option<&Response> {
        match self {
            Message::Request(_) => None,
            Message::Response(resp) => Some(resp),
        }
    }

    /// Consumes into the request, if this is one
    pub fn into_request(self) -> Option<Request> {
        match self {
            Message::Request(req) => Some(req),
            Message::Response(_) => None,
        }
    }

    /// Consumes into the response, if this is one
    pub fn into_response(self) -> Option<Response> {
        match self {
            Message::Request(_) => None,
            Message::Response(resp) => Some(resp),
        }
    }
}

impl From<Request> for Message {
    fn from(req: Request) -> Self {
        Message::Request(req)
    }
}

impl From<Response> for Message {
    fn from(resp: Response) -> Self {
        Message::Response(resp)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Request(req) => write!(f, "{} {}", req.method, req.uri),
            Message::Response(resp) => write!(f, "{} {}", resp.status.as_u16(), resp.reason),
        }
    }
}
