//! # voxsip-sip-core
//!
//! Core SIP message codec for the voxsip user-agent stack.
//!
//! This crate converts between byte buffers and structured SIP messages and
//! provides the digest-authentication primitives used by the layers above.
//! It deliberately stops at the wire: sockets, transactions, and dialogs are
//! the business of `voxsip-sip-transport` and `voxsip-dialog-core`.
//!
//! ## Overview
//!
//! - **Message types**: [`Request`], [`Response`], and the [`Message`] sum
//!   over both, with a case-insensitive, insertion-ordered [`Headers`]
//!   container.
//! - **Parsing**: [`parse_message`] is total: adversarial input produces an
//!   [`Error`], never a panic. Folded headers, compact header names, and
//!   lenient line endings are handled per RFC 3261 §7.3.
//! - **Rendering**: `to_bytes()` emits canonical CRLF form and recomputes
//!   `Content-Length` from the actual body.
//! - **Builders**: [`RequestBuilder`] and [`ResponseBuilder`] for fluent
//!   message construction; `ResponseBuilder::from_request` copies the header
//!   set a UAS must echo.
//! - **Digest auth**: [`auth::DigestChallenge`] parsing and RFC 7616 MD5
//!   response computation.
//!
//! ## Example
//!
//! ```rust
//! use voxsip_sip_core::prelude::*;
//!
//! let request = RequestBuilder::new(Method::Options, "sip:bob@example.com").unwrap()
//!     .from("Alice", "sip:alice@example.com", Some("1928301774"))
//!     .to("Bob", "sip:bob@example.com", None)
//!     .call_id("a84b4c76e66710@pc33.atlanta.com")
//!     .cseq(1)
//!     .via("pc33.atlanta.com:5060", "UDP", Some("z9hG4bK776asdhds"))
//!     .max_forwards(70)
//!     .build();
//!
//! let bytes = request.to_bytes();
//! let reparsed = parse_message(&bytes).unwrap();
//! assert!(reparsed.is_request());
//! ```

pub mod auth;
pub mod builder;
pub mod error;
pub mod parser;
pub mod types;

pub use error::{Error, Result};
pub use parser::parse_message;
pub use types::cseq::CSeq;
pub use types::header_name::HeaderName;
pub use types::headers::Headers;
pub use types::message::{Message, Request, Response, SIP_VERSION};
pub use types::method::Method;
pub use types::status::StatusCode;
pub use types::uri::{addr_spec, Uri};
pub use builder::{RequestBuilder, ResponseBuilder};

/// Re-export of commonly used types for easier consumption.
pub mod prelude {
    pub use crate::auth::{DigestChallenge, DigestCredentials};
    pub use crate::builder::{RequestBuilder, ResponseBuilder};
    pub use crate::error::{Error, Result};
    pub use crate::parser::parse_message;
    pub use crate::types::cseq::CSeq;
    pub use crate::types::header_name::HeaderName;
    pub use crate::types::headers::Headers;
    pub use crate::types::message::{Message, Request, Response, SIP_VERSION};
    pub use crate::types::method::Method;
    pub use crate::types::status::StatusCode;
    pub use crate::types::uri::{addr_spec, header_params, Uri};
}
