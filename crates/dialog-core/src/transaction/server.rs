//! Server transaction state machines (RFC 3261 §17.2, RFC 6026).

use voxsip_sip_core::{Message, Request, Response};

use super::key::TransactionKey;
use super::timer::{TimerKind, TimerSettings};
use super::{Action, TransactionEvent, TransactionState};

/// UAS INVITE transaction (§17.2.1).
///
/// The TU answers through [`respond`](Self::respond); the machine owns
/// response retransmission, ACK consumption, and the G/H/I/L timers.
#[derive(Debug)]
pub struct ServerInviteMachine {
    key: TransactionKey,
    state: TransactionState,
    request: Request,
    settings: TimerSettings,
    reliable: bool,
    last_response: Option<Response>,
    retransmit_interval: std::time::Duration,
}

impl ServerInviteMachine {
    /// Creates the machine for a freshly received INVITE
    pub fn new(
        key: TransactionKey,
        request: Request,
        settings: TimerSettings,
        reliable: bool,
    ) -> Self {
        let retransmit_interval = settings.t1;
        ServerInviteMachine {
            key,
            state: TransactionState::Proceeding,
            request,
            settings,
            reliable,
            last_response: None,
            retransmit_interval,
        }
    }

    /// Current state
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// The INVITE this transaction answers
    pub fn request(&self) -> &Request {
        &self.request
    }

    fn terminate(&mut self, actions: &mut Vec<Action>) {
        self.state = TransactionState::Terminated;
        actions.push(Action::NotifyTu(TransactionEvent::Terminated {
            key: self.key.clone(),
        }));
        actions.push(Action::Destroy);
    }

    /// TU sends a response through the transaction
    pub fn respond(&mut self, response: Response) -> Vec<Action> {
        let mut actions = Vec::new();
        let status = response.status;

        match self.state {
            TransactionState::Proceeding => {
                actions.push(Action::SendMessage(Message::Response(response.clone())));
                self.last_response = Some(response);
                if status.is_provisional() {
                    // stay in Proceeding
                } else if status.is_success() {
                    // RFC 6026: absorb INVITE retransmissions while the TU
                    // retransmits the 2xx end-to-end
                    self.state = TransactionState::Accepted;
                    actions.push(Action::Schedule(
                        TimerKind::L,
                        self.settings.transaction_timeout(),
                    ));
                } else {
                    self.state = TransactionState::Completed;
                    if !self.reliable {
                        actions.push(Action::Schedule(TimerKind::G, self.retransmit_interval));
                    }
                    actions.push(Action::Schedule(
                        TimerKind::H,
                        self.settings.transaction_timeout(),
                    ));
                }
            }
            _ => {
                // late TU responses are dropped; the transaction already
                // answered
            }
        }
        actions
    }

    /// A retransmission of the INVITE arrived
    pub fn on_retransmission(&mut self) -> Vec<Action> {
        match self.state {
            TransactionState::Proceeding | TransactionState::Completed => self
                .last_response
                .as_ref()
                .map(|response| vec![Action::SendMessage(Message::Response(response.clone()))])
                .unwrap_or_default(),
            // Accepted: absorbed, 2xx retransmission is the TU's business
            _ => Vec::new(),
        }
    }

    /// The ACK for a non-2xx final response arrived
    pub fn on_ack(&mut self, ack: Request) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.state == TransactionState::Completed {
            self.state = TransactionState::Confirmed;
            actions.push(Action::NotifyTu(TransactionEvent::AckReceived {
                key: self.key.clone(),
                request: ack,
            }));
            if self.reliable {
                self.terminate(&mut actions);
            } else {
                actions.push(Action::Schedule(TimerKind::I, self.settings.t4));
            }
        }
        actions
    }

    /// Feeds a timer fire into the machine; stale timers are no-ops
    pub fn on_timer(&mut self, timer: TimerKind) -> Vec<Action> {
        let mut actions = Vec::new();
        match (timer, self.state) {
            (TimerKind::G, TransactionState::Completed) => {
                self.retransmit_interval = self.settings.next_retransmit(self.retransmit_interval);
                if let Some(response) = &self.last_response {
                    actions.push(Action::SendMessage(Message::Response(response.clone())));
                }
                actions.push(Action::Schedule(TimerKind::G, self.retransmit_interval));
            }
            (TimerKind::H, TransactionState::Completed) => {
                // no ACK ever came
                actions.push(Action::NotifyTu(TransactionEvent::TimedOut {
                    key: self.key.clone(),
                }));
                self.terminate(&mut actions);
            }
            (TimerKind::I, TransactionState::Confirmed)
            | (TimerKind::L, TransactionState::Accepted) => {
                self.terminate(&mut actions);
            }
            _ => {}
        }
        actions
    }
}

/// UAS non-INVITE transaction (§17.2.2):
/// `Trying → Proceeding → Completed → Terminated`.
#[derive(Debug)]
pub struct ServerNonInviteMachine {
    key: TransactionKey,
    state: TransactionState,
    request: Request,
    settings: TimerSettings,
    reliable: bool,
    last_response: Option<Response>,
}

impl ServerNonInviteMachine {
    /// Creates the machine for a freshly received request
    pub fn new(
        key: TransactionKey,
        request: Request,
        settings: TimerSettings,
        reliable: bool,
    ) -> Self {
        ServerNonInviteMachine {
            key,
            state: TransactionState::Trying,
            request,
            settings,
            reliable,
            last_response: None,
        }
    }

    /// Current state
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// The request this transaction answers
    pub fn request(&self) -> &Request {
        &self.request
    }

    fn terminate(&mut self, actions: &mut Vec<Action>) {
        self.state = TransactionState::Terminated;
        actions.push(Action::NotifyTu(TransactionEvent::Terminated {
            key: self.key.clone(),
        }));
        actions.push(Action::Destroy);
    }

    /// TU sends a response through the transaction
    pub fn respond(&mut self, response: Response) -> Vec<Action> {
        let mut actions = Vec::new();
        let status = response.status;

        match self.state {
            TransactionState::Trying | TransactionState::Proceeding => {
                actions.push(Action::SendMessage(Message::Response(response.clone())));
                self.last_response = Some(response);
                if status.is_provisional() {
                    self.state = TransactionState::Proceeding;
                } else if self.reliable {
                    self.terminate(&mut actions);
                } else {
                    self.state = TransactionState::Completed;
                    actions.push(Action::Schedule(
                        TimerKind::J,
                        self.settings.transaction_timeout(),
                    ));
                }
            }
            _ => {}
        }
        actions
    }

    /// A retransmission of the request arrived; replay the last response
    pub fn on_retransmission(&mut self) -> Vec<Action> {
        match self.state {
            TransactionState::Proceeding | TransactionState::Completed => self
                .last_response
                .as_ref()
                .map(|response| vec![Action::SendMessage(Message::Response(response.clone()))])
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    /// Feeds a timer fire into the machine; stale timers are no-ops
    pub fn on_timer(&mut self, timer: TimerKind) -> Vec<Action> {
        let mut actions = Vec::new();
        if timer == TimerKind::J && self.state == TransactionState::Completed {
            self.terminate(&mut actions);
        }
        actions
    }
}
