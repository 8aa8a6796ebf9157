//! The transaction table and its driver.
//!
//! All machine transitions happen under one lock and produce [`Action`]s;
//! the I/O those actions describe (transport writes, timer arming, TU
//! notification) runs afterwards, outside the lock. Timer fires re-enter
//! through a channel, so no callback ever runs inside another callback.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use voxsip_sip_core::auth::{challenge_header_for, credential_header_for, DigestChallenge};
use voxsip_sip_core::{parse_message, Message, Method, Request, Response};
use voxsip_sip_transport::{Transport, TransportKind};

use super::client::{ClientInviteMachine, ClientNonInviteMachine};
use super::key::{response_matches_request, TransactionKey};
use super::server::{ServerInviteMachine, ServerNonInviteMachine};
use super::timer::{TimerKind, TimerSettings};
use super::{Action, TransactionEvent, TransactionState};
use crate::errors::{Error, Result};

const EVENT_CHANNEL_CAPACITY: usize = 128;

/// One of the four machines plus its wire context
enum Machine {
    InviteClient(ClientInviteMachine),
    NonInviteClient(ClientNonInviteMachine),
    InviteServer(ServerInviteMachine),
    NonInviteServer(ServerNonInviteMachine),
}

impl Machine {
    fn state(&self) -> TransactionState {
        match self {
            Machine::InviteClient(m) => m.state(),
            Machine::NonInviteClient(m) => m.state(),
            Machine::InviteServer(m) => m.state(),
            Machine::NonInviteServer(m) => m.state(),
        }
    }

    fn request(&self) -> &Request {
        match self {
            Machine::InviteClient(m) => m.request(),
            Machine::NonInviteClient(m) => m.request(),
            Machine::InviteServer(m) => m.request(),
            Machine::NonInviteServer(m) => m.request(),
        }
    }

    fn on_timer(&mut self, timer: TimerKind) -> Vec<Action> {
        match self {
            Machine::InviteClient(m) => m.on_timer(timer),
            Machine::NonInviteClient(m) => m.on_timer(timer),
            Machine::InviteServer(m) => m.on_timer(timer),
            Machine::NonInviteServer(m) => m.on_timer(timer),
        }
    }
}

struct Slot {
    machine: Machine,
    remote: SocketAddr,
}

struct ManagerInner {
    transport: Arc<dyn Transport>,
    settings: TimerSettings,
    table: Mutex<HashMap<TransactionKey, Slot>>,
    events_tx: mpsc::Sender<TransactionEvent>,
    timer_tx: Mutex<Option<mpsc::UnboundedSender<(TransactionKey, TimerKind)>>>,
}

/// Owns every live transaction and routes messages, timers, and TU
/// responses to the right machine.
#[derive(Clone)]
pub struct TransactionManager {
    inner: Arc<ManagerInner>,
}

impl TransactionManager {
    /// Creates a manager over `transport`; events for the transaction user
    /// arrive on the returned receiver.
    pub fn new(
        transport: Arc<dyn Transport>,
        settings: TimerSettings,
    ) -> (Self, mpsc::Receiver<TransactionEvent>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (timer_tx, mut timer_rx) = mpsc::unbounded_channel();

        let manager = TransactionManager {
            inner: Arc::new(ManagerInner {
                transport,
                settings,
                table: Mutex::new(HashMap::new()),
                events_tx,
                timer_tx: Mutex::new(Some(timer_tx)),
            }),
        };

        // timer fires re-enter the manager as ordinary loop work
        let timer_manager = manager.clone();
        tokio::spawn(async move {
            while let Some((key, timer)) = timer_rx.recv().await {
                timer_manager.on_timer(key, timer).await;
            }
            debug!("transaction timer loop terminated");
        });

        (manager, events_rx)
    }

    /// The transport this manager writes to
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// Timer settings in force
    pub fn settings(&self) -> &TimerSettings {
        &self.inner.settings
    }

    /// Whether retransmission timers apply on the current transport
    fn reliable(&self) -> bool {
        !self.inner.transport.kind().is_unreliable()
    }

    /// Number of live transactions (test and introspection hook)
    pub fn active_transactions(&self) -> usize {
        self.inner.table.lock().expect("table lock poisoned").len()
    }

    /// State of one transaction, if it is still in the table
    pub fn transaction_state(&self, key: &TransactionKey) -> Option<TransactionState> {
        self.inner
            .table
            .lock()
            .expect("table lock poisoned")
            .get(key)
            .map(|slot| slot.machine.state())
    }

    /// The request a live transaction was created for (the UAS needs the
    /// INVITE back when a CANCEL arrives for it)
    pub fn original_request(&self, key: &TransactionKey) -> Option<Request> {
        self.inner
            .table
            .lock()
            .expect("table lock poisoned")
            .get(key)
            .map(|slot| slot.machine.request().clone())
    }

    /// Starts a client transaction for `request` towards `destination`.
    ///
    /// The request must already carry a Via branch and Call-ID.
    pub async fn send_request(
        &self,
        request: Request,
        destination: SocketAddr,
    ) -> Result<TransactionKey> {
        let key = TransactionKey::from_client_request(&request)
            .ok_or_else(|| Error::MissingHeader("Via branch or Call-ID".to_string()))?;
        let reliable = self.reliable();

        let actions = {
            let mut table = self.inner.table.lock().expect("table lock poisoned");
            if table.contains_key(&key) {
                return Err(Error::InvalidState(format!(
                    "transaction {} already exists",
                    key
                )));
            }
            let (machine, actions) = if request.method.is_invite() {
                let mut m = ClientInviteMachine::new(
                    key.clone(),
                    request,
                    self.inner.settings.clone(),
                    reliable,
                );
                let actions = m.start();
                (Machine::InviteClient(m), actions)
            } else {
                let mut m = ClientNonInviteMachine::new(
                    key.clone(),
                    request,
                    self.inner.settings.clone(),
                    reliable,
                );
                let actions = m.start();
                (Machine::NonInviteClient(m), actions)
            };
            table.insert(
                key.clone(),
                Slot {
                    machine,
                    remote: destination,
                },
            );
            actions
        };

        self.execute(&key, destination, actions).await;
        Ok(key)
    }

    /// TU answer on a server transaction
    pub async fn respond(&self, key: &TransactionKey, response: Response) -> Result<()> {
        let (remote, actions) = {
            let mut table = self.inner.table.lock().expect("table lock poisoned");
            let slot = table
                .get_mut(key)
                .ok_or_else(|| Error::UnknownTransaction(key.to_string()))?;
            let actions = match &mut slot.machine {
                Machine::InviteServer(m) => m.respond(response),
                Machine::NonInviteServer(m) => m.respond(response),
                _ => {
                    return Err(Error::InvalidState(format!(
                        "{} is not a server transaction",
                        key
                    )))
                }
            };
            (slot.remote, actions)
        };
        self.execute(key, remote, actions).await;
        Ok(())
    }

    /// Sends a message that belongs to no transaction (the ACK for a 2xx)
    pub async fn send_outside_transaction(
        &self,
        message: Message,
        destination: SocketAddr,
    ) -> Result<()> {
        self.inner
            .transport
            .send(message.to_bytes(), destination)
            .await?;
        Ok(())
    }

    /// Entry point for raw frames from the transport.
    ///
    /// Unparsable frames are logged and dropped without touching the table
    /// (the malformed-datagram contract).
    pub async fn handle_frame(&self, bytes: &[u8], source: SocketAddr, kind: TransportKind) {
        let message = match parse_message(bytes) {
            Ok(message) => message,
            Err(e) => {
                warn!(%source, %kind, "dropping malformed frame: {}", e);
                return;
            }
        };
        match message {
            Message::Response(response) => self.handle_response(response, source).await,
            Message::Request(request) => self.handle_request(request, source).await,
        }
    }

    async fn handle_response(&self, response: Response, source: SocketAddr) {
        let matched = {
            let mut table = self.inner.table.lock().expect("table lock poisoned");
            let key = match TransactionKey::from_response(&response) {
                // a cookie-bearing branch either matches exactly or not at all
                Some(key) if key.has_magic_cookie() => {
                    table.contains_key(&key).then_some(key)
                }
                _ => {
                    // §17.1.3 fallback for peers without the magic cookie
                    table
                        .iter()
                        .filter(|(key, slot)| {
                            !key.is_server
                                && response_matches_request(slot.machine.request(), &response)
                        })
                        .map(|(key, _)| key.clone())
                        .next()
                }
            };

            key.map(|key| {
                let slot = table.get_mut(&key).expect("key just found");
                let remote = slot.remote;
                let challenge = unanswered_challenge(slot.machine.request(), &response);
                let actions = match &mut slot.machine {
                    Machine::InviteClient(m) => m.on_response(response.clone()),
                    Machine::NonInviteClient(m) => m.on_response(response.clone()),
                    // server machines never receive responses
                    _ => Vec::new(),
                };
                (key, remote, challenge, actions)
            })
        };

        match matched {
            Some((key, remote, challenge, mut actions)) => {
                // a fresh 401/407 becomes an auth challenge for the TU
                // instead of a plain failure
                if let Some(challenge) = challenge {
                    for action in actions.iter_mut() {
                        if let Action::NotifyTu(event @ TransactionEvent::Failure { .. }) = action {
                            *event = TransactionEvent::AuthChallenge {
                                key: key.clone(),
                                response: response.clone(),
                                challenge: challenge.clone(),
                            };
                        }
                    }
                }
                self.execute(&key, remote, actions).await;
            }
            None => {
                debug!(%source, status = response.status.as_u16(), "stray response");
                let _ = self
                    .inner
                    .events_tx
                    .send(TransactionEvent::StrayResponse { response, source })
                    .await;
            }
        }
    }

    async fn handle_request(&self, request: Request, source: SocketAddr) {
        let Some(key) = TransactionKey::from_server_request(&request) else {
            warn!(%source, "request without Via branch or Call-ID dropped");
            return;
        };
        let reliable = self.reliable();

        enum Outcome {
            Actions(SocketAddr, Vec<Action>),
            New(TransactionEvent),
            Stray,
        }

        let outcome = {
            let mut table = self.inner.table.lock().expect("table lock poisoned");
            match table.get_mut(&key) {
                Some(slot) => {
                    let remote = slot.remote;
                    let actions = match (&mut slot.machine, &request.method) {
                        (Machine::InviteServer(m), Method::Ack) => m.on_ack(request.clone()),
                        (Machine::InviteServer(m), _) => m.on_retransmission(),
                        (Machine::NonInviteServer(m), _) => m.on_retransmission(),
                        // a request never matches a client transaction
                        _ => Vec::new(),
                    };
                    Outcome::Actions(remote, actions)
                }
                None if request.method == Method::Ack => {
                    // ACK to a 2xx: no transaction, the dialog layer owns it
                    Outcome::Stray
                }
                None => {
                    let machine = if request.method.is_invite() {
                        Machine::InviteServer(ServerInviteMachine::new(
                            key.clone(),
                            request.clone(),
                            self.inner.settings.clone(),
                            reliable,
                        ))
                    } else {
                        Machine::NonInviteServer(ServerNonInviteMachine::new(
                            key.clone(),
                            request.clone(),
                            self.inner.settings.clone(),
                            reliable,
                        ))
                    };
                    table.insert(
                        key.clone(),
                        Slot {
                            machine,
                            remote: source,
                        },
                    );
                    Outcome::New(TransactionEvent::NewRequest {
                        key: key.clone(),
                        request: request.clone(),
                        source,
                    })
                }
            }
        };

        match outcome {
            Outcome::Actions(remote, actions) => self.execute(&key, remote, actions).await,
            Outcome::New(event) => {
                let _ = self.inner.events_tx.send(event).await;
            }
            Outcome::Stray => {
                let _ = self
                    .inner
                    .events_tx
                    .send(TransactionEvent::StrayRequest { request, source })
                    .await;
            }
        }
    }

    async fn on_timer(&self, key: TransactionKey, timer: TimerKind) {
        let fired = {
            let mut table = self.inner.table.lock().expect("table lock poisoned");
            table
                .get_mut(&key)
                .map(|slot| (slot.remote, slot.machine.on_timer(timer)))
        };
        if let Some((remote, actions)) = fired {
            self.execute(&key, remote, actions).await;
        }
    }

    async fn execute(&self, key: &TransactionKey, remote: SocketAddr, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::SendMessage(message) => {
                    if let Err(e) = self.inner.transport.send(message.to_bytes(), remote).await {
                        warn!(%key, "transport send failed: {}", e);
                        let _ = self
                            .inner
                            .events_tx
                            .send(TransactionEvent::TransportError {
                                key: key.clone(),
                                error: e.to_string(),
                            })
                            .await;
                    }
                }
                Action::Schedule(timer, duration) => {
                    self.schedule(key.clone(), timer, duration);
                }
                Action::NotifyTu(event) => {
                    let _ = self.inner.events_tx.send(event).await;
                }
                Action::Destroy => {
                    self.inner
                        .table
                        .lock()
                        .expect("table lock poisoned")
                        .remove(key);
                    debug!(%key, "transaction destroyed");
                }
            }
        }
    }

    fn schedule(&self, key: TransactionKey, timer: TimerKind, duration: Duration) {
        let timer_tx = self
            .inner
            .timer_tx
            .lock()
            .expect("timer lock poisoned")
            .clone();
        let Some(timer_tx) = timer_tx else {
            return;
        };
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = timer_tx.send((key, timer));
        });
    }

    /// Drops all transactions and stops the timer loop.
    pub fn shutdown(&self) {
        self.inner
            .timer_tx
            .lock()
            .expect("timer lock poisoned")
            .take();
        self.inner
            .table
            .lock()
            .expect("table lock poisoned")
            .clear();
    }
}

/// Extracts the digest challenge from a 401/407 that the original request
/// has not already answered for the same realm. A second challenge after a
/// credentialed attempt comes back `None`, which surfaces as a plain
/// failure (AuthFailed at the UA layer).
fn unanswered_challenge(request: &Request, response: &Response) -> Option<DigestChallenge> {
    let challenge_header = challenge_header_for(response.status)?;
    let credential_header = credential_header_for(response.status)?;
    let challenge = response
        .headers
        .get(&challenge_header)
        .and_then(|value| DigestChallenge::parse(value).ok())?;

    // stale=true invites a retry with the new nonce even though the
    // previous attempt carried credentials
    if challenge.stale {
        return Some(challenge);
    }

    let already_answered = request
        .headers
        .get_all(&credential_header)
        .any(|value| value.contains(&format!("realm=\"{}\"", challenge.realm)));
    if already_answered {
        None
    } else {
        Some(challenge)
    }
}
