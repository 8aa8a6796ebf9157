//! RFC 3261 §17 transaction layer.
//!
//! Each state machine ([`client::ClientInviteMachine`],
//! [`client::ClientNonInviteMachine`], [`server::ServerInviteMachine`],
//! [`server::ServerNonInviteMachine`]) is pure: inputs are responses,
//! requests, and timer fires; outputs are [`Action`]s. The
//! [`manager::TransactionManager`] interprets actions (writing to the
//! transport, scheduling timers, notifying the transaction user) and owns
//! the transaction table.

pub mod client;
pub mod key;
pub mod manager;
pub mod server;
pub mod timer;

use std::net::SocketAddr;
use std::time::Duration;

use voxsip_sip_core::auth::DigestChallenge;
use voxsip_sip_core::{Message, Request, Response};

use key::TransactionKey;
use timer::TimerKind;

/// Which of the four RFC 3261 state machines a transaction runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionKind {
    /// UAC INVITE (§17.1.1)
    InviteClient,
    /// UAC non-INVITE (§17.1.2)
    NonInviteClient,
    /// UAS INVITE (§17.2.1)
    InviteServer,
    /// UAS non-INVITE (§17.2.2)
    NonInviteServer,
}

/// Transaction states across all four machines.
///
/// Not every state applies to every kind; `Calling` is INVITE-client only,
/// `Trying` non-INVITE, and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    /// Created but not yet started
    Initial,
    /// INVITE client: request sent, no response yet
    Calling,
    /// non-INVITE client: request sent, no response yet; also the initial
    /// server states
    Trying,
    /// A provisional response has been seen/sent
    Proceeding,
    /// A final non-2xx response has been seen/sent
    Completed,
    /// INVITE server: ACK consumed
    Confirmed,
    /// 2xx seen/sent (RFC 6026)
    Accepted,
    /// Done; the transaction can be dropped
    Terminated,
}

/// Side effects a state machine asks the manager to perform
#[derive(Debug)]
pub enum Action {
    /// Write a message to the transaction's remote address
    SendMessage(Message),
    /// Arm a timer for this transaction
    Schedule(TimerKind, Duration),
    /// Tell the transaction user something happened
    NotifyTu(TransactionEvent),
    /// Remove the transaction from the table
    Destroy,
}

/// Events delivered to the transaction user (the dialog/UA layer)
#[derive(Debug, Clone)]
pub enum TransactionEvent {
    /// 1xx response on a client transaction
    Provisional {
        /// Transaction it belongs to
        key: TransactionKey,
        /// The response
        response: Response,
    },
    /// 2xx response on a client transaction. For INVITE the TU owns the
    /// out-of-transaction ACK.
    Success {
        /// Transaction it belongs to
        key: TransactionKey,
        /// The response
        response: Response,
    },
    /// Final non-2xx response on a client transaction (the transaction
    /// already ACKed it when the request was an INVITE)
    Failure {
        /// Transaction it belongs to
        key: TransactionKey,
        /// The response
        response: Response,
    },
    /// 401/407 whose challenge the original request has not yet answered;
    /// the TU decides whether to retry with credentials
    AuthChallenge {
        /// Transaction that was challenged
        key: TransactionKey,
        /// The challenging response
        response: Response,
        /// Parsed digest challenge
        challenge: DigestChallenge,
    },
    /// Timer B/F fired with no final response
    TimedOut {
        /// Transaction that timed out
        key: TransactionKey,
    },
    /// The transport failed while sending for this transaction
    TransportError {
        /// Transaction affected
        key: TransactionKey,
        /// Description of the failure
        error: String,
    },
    /// A new server transaction was created for an inbound request; the TU
    /// must eventually respond via the manager
    NewRequest {
        /// The new server transaction
        key: TransactionKey,
        /// The request as received
        request: Request,
        /// Peer that sent it
        source: SocketAddr,
    },
    /// The INVITE server transaction consumed its ACK
    AckReceived {
        /// The INVITE server transaction
        key: TransactionKey,
        /// The ACK request
        request: Request,
    },
    /// A request that matches no server transaction and creates none
    /// (ACK to a 2xx, which belongs to the dialog layer)
    StrayRequest {
        /// The request
        request: Request,
        /// Peer that sent it
        source: SocketAddr,
    },
    /// A response that matches no client transaction
    StrayResponse {
        /// The response
        response: Response,
        /// Peer that sent it
        source: SocketAddr,
    },
    /// The transaction reached Terminated and left the table
    Terminated {
        /// The transaction that ended
        key: TransactionKey,
    },
}

impl TransactionEvent {
    /// The transaction key this event refers to, when it has one
    pub fn key(&self) -> Option<&TransactionKey> {
        match self {
            TransactionEvent::Provisional { key, .. }
            | TransactionEvent::Success { key, .. }
            | TransactionEvent::Failure { key, .. }
            | TransactionEvent::AuthChallenge { key, .. }
            | TransactionEvent::TimedOut { key }
            | TransactionEvent::TransportError { key, .. }
            | TransactionEvent::NewRequest { key, .. }
            | TransactionEvent::AckReceived { key, .. }
            | TransactionEvent::Terminated { key } => Some(key),
            TransactionEvent::StrayRequest { .. } | TransactionEvent::StrayResponse { .. } => None,
        }
    }
}
