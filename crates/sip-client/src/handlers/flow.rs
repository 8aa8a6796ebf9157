//! Flow trackers: response categorization plus per-INVITE and per-REGISTER
//! state following.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

use voxsip_sip_core::{HeaderName, Method, Response};

use super::{HandlerContext, SipHandler};

/// RFC 3261 §7.2 response classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseCategory {
    /// 1xx
    Provisional,
    /// 2xx
    Success,
    /// 3xx
    Redirection,
    /// 4xx
    ClientError,
    /// 5xx
    ServerError,
    /// 6xx
    GlobalFailure,
}

impl ResponseCategory {
    /// Classifies a status code
    pub fn from_status(code: u16) -> ResponseCategory {
        match code {
            100..=199 => ResponseCategory::Provisional,
            200..=299 => ResponseCategory::Success,
            300..=399 => ResponseCategory::Redirection,
            400..=499 => ResponseCategory::ClientError,
            500..=599 => ResponseCategory::ServerError,
            _ => ResponseCategory::GlobalFailure,
        }
    }

    /// The `1xx`-style label
    pub fn label(&self) -> &'static str {
        match self {
            ResponseCategory::Provisional => "1xx",
            ResponseCategory::Success => "2xx",
            ResponseCategory::Redirection => "3xx",
            ResponseCategory::ClientError => "4xx",
            ResponseCategory::ServerError => "5xx",
            ResponseCategory::GlobalFailure => "6xx",
        }
    }
}

/// Stamps every response's category into the context metadata and keeps
/// per-category counters
#[derive(Default)]
pub struct ResponseFlowHandler {
    counts: Mutex<HashMap<ResponseCategory, u64>>,
}

impl ResponseFlowHandler {
    /// Creates a tracker with zeroed counters
    pub fn new() -> Self {
        ResponseFlowHandler::default()
    }

    /// Responses seen in `category` so far
    pub fn count(&self, category: ResponseCategory) -> u64 {
        *self
            .counts
            .lock()
            .expect("flow lock poisoned")
            .get(&category)
            .unwrap_or(&0)
    }
}

impl SipHandler for ResponseFlowHandler {
    fn on_response(&self, response: Response, context: &mut HandlerContext) -> Response {
        let category = ResponseCategory::from_status(response.status.as_u16());
        *self
            .counts
            .lock()
            .expect("flow lock poisoned")
            .entry(category)
            .or_insert(0) += 1;
        context
            .metadata
            .insert("response_category".to_string(), category.label().to_string());
        response
    }
}

/// Where an INVITE currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InviteFlowState {
    /// Nothing seen yet
    #[default]
    Idle,
    /// 100 Trying observed
    Trying,
    /// 180/183 observed
    Ringing,
    /// 2xx observed
    Connected,
    /// Final non-2xx observed
    Failed,
}

/// Tracks INVITE progress per Call-ID
#[derive(Default)]
pub struct InviteFlowHandler {
    states: Mutex<HashMap<String, InviteFlowState>>,
}

impl InviteFlowHandler {
    /// Creates an empty tracker
    pub fn new() -> Self {
        InviteFlowHandler::default()
    }

    /// Current flow state for a call
    pub fn state(&self, call_id: &str) -> InviteFlowState {
        *self
            .states
            .lock()
            .expect("invite flow lock poisoned")
            .get(call_id)
            .unwrap_or(&InviteFlowState::Idle)
    }
}

impl SipHandler for InviteFlowHandler {
    fn on_response(&self, response: Response, context: &mut HandlerContext) -> Response {
        let is_invite = response
            .cseq()
            .map(|cseq| cseq.method == Method::Invite)
            .unwrap_or(false);
        if !is_invite {
            return response;
        }
        let Some(call_id) = response.call_id().map(str::to_string) else {
            return response;
        };

        let state = match response.status.as_u16() {
            100 => InviteFlowState::Trying,
            101..=199 => InviteFlowState::Ringing,
            200..=299 => InviteFlowState::Connected,
            _ => InviteFlowState::Failed,
        };
        debug!(%call_id, ?state, "INVITE flow transition");
        self.states
            .lock()
            .expect("invite flow lock poisoned")
            .insert(call_id, state);
        context
            .metadata
            .insert("invite_flow".to_string(), format!("{:?}", state));
        response
    }
}

/// Registration status extracted from REGISTER responses
#[derive(Debug, Clone, Default)]
pub struct RegisterFlowState {
    /// REGISTER attempts seen (including challenged ones)
    pub attempts: u32,
    /// True after a 200 OK
    pub registered: bool,
    /// Expires value granted by the registrar
    pub expires: Option<u32>,
    /// Contacts echoed by the registrar
    pub contacts: Vec<String>,
}

/// Tracks REGISTER outcomes: attempts, granted expiry, bound contacts
#[derive(Default)]
pub struct RegisterFlowHandler {
    state: Mutex<RegisterFlowState>,
}

impl RegisterFlowHandler {
    /// Creates an empty tracker
    pub fn new() -> Self {
        RegisterFlowHandler::default()
    }

    /// Snapshot of the current registration state
    pub fn state(&self) -> RegisterFlowState {
        self.state.lock().expect("register flow lock poisoned").clone()
    }
}

impl SipHandler for RegisterFlowHandler {
    fn on_response(&self, response: Response, context: &mut HandlerContext) -> Response {
        let is_register = response
            .cseq()
            .map(|cseq| cseq.method == Method::Register)
            .unwrap_or(false);
        if !is_register {
            return response;
        }

        let mut state = self.state.lock().expect("register flow lock poisoned");
        state.attempts += 1;
        if response.status.is_success() {
            state.registered = true;
            state.expires = response
                .header(&HeaderName::Expires)
                .and_then(|value| value.trim().parse().ok());
            state.contacts = response
                .headers
                .get_all(&HeaderName::Contact)
                .map(str::to_string)
                .collect();
            // an explicit Expires: 0 is an unregistration
            if state.expires == Some(0) {
                state.registered = false;
            }
            context
                .metadata
                .insert("registered".to_string(), state.registered.to_string());
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxsip_sip_core::prelude::*;

    fn response(code: u16, cseq: &str) -> Response {
        let mut response = ResponseBuilder::new(StatusCode::from_u16(code).unwrap(), None).build();
        response.headers.push(HeaderName::CallId, "flow@test");
        response.headers.push(HeaderName::CSeq, cseq);
        response
    }

    #[test]
    fn categories() {
        assert_eq!(ResponseCategory::from_status(183), ResponseCategory::Provisional);
        assert_eq!(ResponseCategory::from_status(202), ResponseCategory::Success);
        assert_eq!(ResponseCategory::from_status(302), ResponseCategory::Redirection);
        assert_eq!(ResponseCategory::from_status(487), ResponseCategory::ClientError);
        assert_eq!(ResponseCategory::from_status(503), ResponseCategory::ServerError);
        assert_eq!(ResponseCategory::from_status(603), ResponseCategory::GlobalFailure);
    }

    #[test]
    fn response_flow_counts_and_stamps() {
        let handler = ResponseFlowHandler::new();
        let mut context = HandlerContext::new();
        handler.on_response(response(180, "1 INVITE"), &mut context);
        handler.on_response(response(200, "1 INVITE"), &mut context);
        assert_eq!(handler.count(ResponseCategory::Provisional), 1);
        assert_eq!(handler.count(ResponseCategory::Success), 1);
        assert_eq!(
            context.metadata.get("response_category").map(String::as_str),
            Some("2xx")
        );
    }

    #[test]
    fn invite_flow_follows_call() {
        let handler = InviteFlowHandler::new();
        let mut context = HandlerContext::new();

        handler.on_response(response(100, "1 INVITE"), &mut context);
        assert_eq!(handler.state("flow@test"), InviteFlowState::Trying);
        handler.on_response(response(180, "1 INVITE"), &mut context);
        assert_eq!(handler.state("flow@test"), InviteFlowState::Ringing);
        handler.on_response(response(200, "1 INVITE"), &mut context);
        assert_eq!(handler.state("flow@test"), InviteFlowState::Connected);

        // non-INVITE responses don't disturb the call state
        handler.on_response(response(486, "2 BYE"), &mut context);
        assert_eq!(handler.state("flow@test"), InviteFlowState::Connected);
    }

    #[test]
    fn register_flow_reads_expiry() {
        let handler = RegisterFlowHandler::new();
        let mut context = HandlerContext::new();

        let mut ok = response(200, "1 REGISTER");
        ok.headers.push(HeaderName::Expires, "300");
        ok.headers.push(HeaderName::Contact, "<sip:u@10.0.0.1:5060>");
        handler.on_response(ok, &mut context);

        let state = handler.state();
        assert!(state.registered);
        assert_eq!(state.expires, Some(300));
        assert_eq!(state.contacts.len(), 1);
    }

    #[test]
    fn register_flow_detects_unregistration() {
        let handler = RegisterFlowHandler::new();
        let mut context = HandlerContext::new();
        let mut ok = response(200, "2 REGISTER");
        ok.headers.push(HeaderName::Expires, "0");
        handler.on_response(ok, &mut context);
        assert!(!handler.state().registered);
    }
}
