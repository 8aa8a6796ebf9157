//! # voxsip-dialog-core
//!
//! Transaction and dialog layers of the voxsip SIP stack.
//!
//! The transaction layer implements the four RFC 3261 §17 state machines
//! (INVITE and non-INVITE, client and server, with the RFC 6026 `Accepted`
//! refinement) as pure machines that emit [`transaction::Action`]s; the
//! [`transaction::TransactionManager`] owns the table, drives timers, and
//! performs the transport I/O the actions describe. Keeping the machines
//! side-effect free makes every arc of the state charts testable without a
//! socket.
//!
//! The dialog layer tracks `(Call-ID, local-tag, remote-tag)` peer
//! relationships: early and confirmed dialogs, CSeq discipline, route sets,
//! and the construction of in-dialog requests (BYE, ACK, CANCEL, PRACK).
//!
//! Digest-authentication retries live in [`auth`]: a pure
//! [`auth::retry_request`] builds the follow-up request (fresh branch,
//! CSeq+1, computed credential header) while the manager decides *when* a
//! 401/407 is worth retrying.

pub mod auth;
pub mod dialog;
pub mod errors;
pub mod transaction;

pub use errors::{Error, Result};
pub use transaction::key::{generate_branch, TransactionKey, RFC3261_BRANCH_MAGIC_COOKIE};
pub use transaction::manager::TransactionManager;
pub use transaction::timer::TimerSettings;
pub use transaction::{TransactionEvent, TransactionKind, TransactionState};
pub use dialog::{Dialog, DialogId, DialogState};
