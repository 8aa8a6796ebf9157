//! # voxsip-sip-client
//!
//! High-level SIP user agent built on the voxsip stack: place calls,
//! register, send instant messages, and probe capabilities as a UAC, while
//! a minimal UAS surface answers in-dialog requests (BYE, ACK, CANCEL) and
//! OPTIONS probes.
//!
//! ## Layers underneath
//!
//! - `voxsip-sip-core`: message codec and digest-auth primitives
//! - `voxsip-sip-transport`: UDP/TCP/TLS sockets and framing
//! - `voxsip-dialog-core`: RFC 3261 transactions and dialogs
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use voxsip_sip_client::{Client, ClientConfig, EventKind, InviteOptions, SdpOffer};
//!
//! # async fn example() -> voxsip_sip_client::Result<()> {
//! let client = Client::connect(
//!     ClientConfig::new("sip.example.com", 5060)
//!         .identity("alice")
//!         .credentials("alice", "secret"),
//! )
//! .await?;
//!
//! client.on(EventKind::CallHangup, |event| {
//!     println!("hangup: {:?}", event);
//! });
//!
//! let call = client
//!     .invite(
//!         "sip:bob@sip.example.com",
//!         InviteOptions {
//!             sdp: SdpOffer::Default,
//!             ..Default::default()
//!         },
//!     )
//!     .await?;
//! call.bye(None).await?;
//! client.close().await;
//! # Ok(())
//! # }
//! ```

pub mod call;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod handlers;
pub mod media;

pub use call::{CallState, TerminatedBy};
pub use client::{
    Call, Client, InviteOptions, MessageOptions, RegistrationStatus, RequestOptions, SdpOffer,
};
pub use config::{ClientConfig, Protocol};
pub use error::{Error, Result};
pub use events::{Event, EventKind};
pub use handlers::{HandlerChain, HandlerContext, SipHandler};
