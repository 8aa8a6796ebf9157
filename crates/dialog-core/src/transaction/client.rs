//! Client transaction state machines (RFC 3261 §17.1, RFC 6026).

use voxsip_sip_core::{HeaderName, Message, Method, Request, Response};

use super::key::TransactionKey;
use super::timer::{TimerKind, TimerSettings};
use super::{Action, TransactionEvent, TransactionState};
use std::time::Duration;

/// Builds the in-transaction ACK for a non-2xx final response
/// (RFC 3261 §17.1.1.3): same branch and request-URI as the INVITE, To
/// copied from the response so the tag matches.
pub fn build_transaction_ack(invite: &Request, response: &Response) -> Request {
    let mut ack = Request::new(Method::Ack, invite.uri.clone());
    if let Some(via) = invite.top_via() {
        ack.headers.push(HeaderName::Via, via);
    }
    if let Some(from) = invite.from() {
        ack.headers.push(HeaderName::From, from);
    }
    if let Some(to) = response.to() {
        ack.headers.push(HeaderName::To, to);
    }
    if let Some(call_id) = invite.call_id() {
        ack.headers.push(HeaderName::CallId, call_id);
    }
    if let Some(cseq) = invite.cseq() {
        ack.headers
            .push(HeaderName::CSeq, format!("{} ACK", cseq.seq));
    }
    for route in invite.headers.get_all(&HeaderName::Route) {
        ack.headers.push(HeaderName::Route, route);
    }
    ack.headers.push(HeaderName::MaxForwards, "70");
    ack
}

/// UAC INVITE transaction (§17.1.1).
///
/// ```text
/// Calling ──1xx──▶ Proceeding ──2xx──▶ Accepted ──M──▶ Terminated
///    │                 │
///    │ 3xx-6xx (ACK)   │ 3xx-6xx (ACK)
///    ▼                 ▼
/// Completed ──────────D──────────────▶ Terminated
/// ```
#[derive(Debug)]
pub struct ClientInviteMachine {
    key: TransactionKey,
    state: TransactionState,
    request: Request,
    settings: TimerSettings,
    reliable: bool,
    retransmit_interval: Duration,
    last_ack: Option<Request>,
}

impl ClientInviteMachine {
    /// Creates the machine; call [`start`](Self::start) to send
    pub fn new(
        key: TransactionKey,
        request: Request,
        settings: TimerSettings,
        reliable: bool,
    ) -> Self {
        let retransmit_interval = settings.t1;
        ClientInviteMachine {
            key,
            state: TransactionState::Initial,
            request,
            settings,
            reliable,
            retransmit_interval,
            last_ack: None,
        }
    }

    /// Current state
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// The INVITE this transaction is sending
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

    /// Sends the INVITE and arms the initial timers
    pub fn start(&mut self) -> Vec<Action> {
        self.state = TransactionState::Calling;
        let mut actions = vec![Action::SendMessage(Message::Request(self.request.clone()))];
        if !self.reliable {
            actions.push(Action::Schedule(TimerKind::A, self.retransmit_interval));
        }
        actions.push(Action::Schedule(
            TimerKind::B,
            self.settings.transaction_timeout(),
        ));
        actions
    }

    /// Feeds a matched response into the machine
    pub fn on_response(&mut self, response: Response) -> Vec<Action> {
        let mut actions = Vec::new();
        let status = response.status;

        match self.state {
            TransactionState::Calling | TransactionState::Proceeding => {
                if status.is_provisional() {
                    self.state = TransactionState::Proceeding;
                    actions.push(Action::NotifyTu(TransactionEvent::Provisional {
                        key: self.key.clone(),
                        response,
                    }));
                } else if status.is_success() {
                    // TU builds the out-of-transaction ACK (new branch)
                    self.state = TransactionState::Accepted;
                    actions.push(Action::Schedule(
                        TimerKind::M,
                        self.settings.transaction_timeout(),
                    ));
                    actions.push(Action::NotifyTu(TransactionEvent::Success {
                        key: self.key.clone(),
                        response,
                    }));
                } else {
                    // transaction-scope ACK, same branch as the INVITE
                    let ack = build_transaction_ack(&self.request, &response);
                    actions.push(Action::SendMessage(Message::Request(ack.clone())));
                    self.last_ack = Some(ack);
                    actions.push(Action::NotifyTu(TransactionEvent::Failure {
                        key: self.key.clone(),
                        response,
                    }));
                    if self.reliable {
                        self.terminate(&mut actions);
                    } else {
                        self.state = TransactionState::Completed;
                        actions.push(Action::Schedule(TimerKind::D, self.settings.timer_d));
                    }
                }
            }
            TransactionState::Accepted => {
                // 2xx retransmissions are absorbed; the dialog layer already
                // has the response and will re-ACK on its own retransmissions
            }
            TransactionState::Completed => {
                if status.is_final() && !status.is_success() {
                    if let Some(ack) = &self.last_ack {
                        actions.push(Action::SendMessage(Message::Request(ack.clone())));
                    }
                }
            }
            _ => {}
        }
        actions
    }

    /// Feeds a timer fire into the machine; stale timers are no-ops
    pub fn on_timer(&mut self, timer: TimerKind) -> Vec<Action> {
        let mut actions = Vec::new();
        match (timer, self.state) {
            (TimerKind::A, TransactionState::Calling) => {
                self.retransmit_interval = self.settings.next_retransmit(self.retransmit_interval);
                actions.push(Action::SendMessage(Message::Request(self.request.clone())));
                actions.push(Action::Schedule(TimerKind::A, self.retransmit_interval));
            }
            (TimerKind::B, TransactionState::Calling) => {
                actions.push(Action::NotifyTu(TransactionEvent::TimedOut {
                    key: self.key.clone(),
                }));
                self.terminate(&mut actions);
            }
            (TimerKind::D, TransactionState::Completed)
            | (TimerKind::M, TransactionState::Accepted) => {
                self.terminate(&mut actions);
            }
            _ => {}
        }
        actions
    }
}

/// UAC non-INVITE transaction (§17.1.2):
/// `Trying → Proceeding → Completed → Terminated`.
#[derive(Debug)]
pub struct ClientNonInviteMachine {
    key: TransactionKey,
    state: TransactionState,
    request: Request,
    settings: TimerSettings,
    reliable: bool,
    retransmit_interval: Duration,
}

impl ClientNonInviteMachine {
    /// Creates the machine; call [`start`](Self::start) to send
    pub fn new(
        key: TransactionKey,
        request: Request,
        settings: TimerSettings,
        reliable: bool,
    ) -> Self {
        let retransmit_interval = settings.t1;
        ClientNonInviteMachine {
            key,
            state: TransactionState::Initial,
            request,
            settings,
            reliable,
            retransmit_interval,
        }
    }

    /// Current state
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// The request this transaction is sending
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

    /// Sends the request and arms Timer E/F
    pub fn start(&mut self) -> Vec<Action> {
        self.state = TransactionState::Trying;
        let mut actions = vec![Action::SendMessage(Message::Request(self.request.clone()))];
        if !self.reliable {
            actions.push(Action::Schedule(TimerKind::E, self.retransmit_interval));
        }
        actions.push(Action::Schedule(
            TimerKind::F,
            self.settings.transaction_timeout(),
        ));
        actions
    }

    /// Feeds a matched response into the machine
    pub fn on_response(&mut self, response: Response) -> Vec<Action> {
        let mut actions = Vec::new();
        let status = response.status;

        match self.state {
            TransactionState::Trying | TransactionState::Proceeding => {
                if status.is_provisional() {
                    self.state = TransactionState::Proceeding;
                    actions.push(Action::NotifyTu(TransactionEvent::Provisional {
                        key: self.key.clone(),
                        response,
                    }));
                } else {
                    let event = if status.is_success() {
                        TransactionEvent::Success {
                            key: self.key.clone(),
                            response,
                        }
                    } else {
                        TransactionEvent::Failure {
                            key: self.key.clone(),
                            response,
                        }
                    };
                    actions.push(Action::NotifyTu(event));
                    if self.reliable {
                        self.terminate(&mut actions);
                    } else {
                        self.state = TransactionState::Completed;
                        actions.push(Action::Schedule(TimerKind::K, self.settings.t4));
                    }
                }
            }
            // Completed: retransmitted finals are absorbed until Timer K
            _ => {}
        }
        actions
    }

    /// Feeds a timer fire into the machine; stale timers are no-ops
    pub fn on_timer(&mut self, timer: TimerKind) -> Vec<Action> {
        let mut actions = Vec::new();
        match (timer, self.state) {
            (TimerKind::E, TransactionState::Trying)
            | (TimerKind::E, TransactionState::Proceeding) => {
                self.retransmit_interval = self.settings.next_retransmit(self.retransmit_interval);
                actions.push(Action::SendMessage(Message::Request(self.request.clone())));
                actions.push(Action::Schedule(TimerKind::E, self.retransmit_interval));
            }
            (TimerKind::F, TransactionState::Trying)
            | (TimerKind::F, TransactionState::Proceeding) => {
                actions.push(Action::NotifyTu(TransactionEvent::TimedOut {
                    key: self.key.clone(),
                }));
                self.terminate(&mut actions);
            }
            (TimerKind::K, TransactionState::Completed) => {
                self.terminate(&mut actions);
            }
            _ => {}
        }
        actions
    }
}
