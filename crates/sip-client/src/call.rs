//! Call handles and the call-state convenience FSM.

use std::time::{Duration, Instant};

use voxsip_sip_core::{Request, Response};

/// Coarse call lifecycle, a convenience view on top of the transaction and
/// dialog layers:
/// `Initiating → Proceeding → Connected → Terminated`, with `Failed` as a
/// sibling of `Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// INVITE sent, nothing back yet
    Initiating,
    /// A provisional response arrived
    Proceeding,
    /// 2xx received and ACKed
    Connected,
    /// The call ended normally
    Terminated,
    /// The INVITE failed (final non-2xx, timeout, or transport error)
    Failed,
}

impl CallState {
    /// Monotonic transition rules; anything else is invalid
    pub fn can_advance_to(&self, target: CallState) -> bool {
        use CallState::*;
        match self {
            Initiating => matches!(target, Proceeding | Connected | Failed | Terminated),
            Proceeding => matches!(target, Connected | Failed | Terminated),
            Connected => matches!(target, Terminated | Failed),
            Failed => matches!(target, Terminated),
            Terminated => false,
        }
    }
}

/// Who ended the call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminatedBy {
    /// We sent the BYE/CANCEL (or the INVITE failed)
    Local,
    /// The peer sent BYE
    Remote,
}

/// Internal per-call record, owned by the client's call table
#[derive(Debug)]
pub(crate) struct CallData {
    pub call_id: String,
    pub target_uri: String,
    pub from_tag: String,
    pub invite_branch: String,
    pub invite_cseq: u32,
    pub state: CallState,
    pub remote_tag: Option<String>,
    pub sdp: Option<String>,
    pub invite_request: Request,
    pub last_response: Option<Response>,
    pub created_at: Instant,
    pub connected_at: Option<Instant>,
    pub terminated_at: Option<Instant>,
    pub terminated_by: Option<TerminatedBy>,
}

impl CallData {
    pub(crate) fn new(
        call_id: String,
        target_uri: String,
        from_tag: String,
        invite_branch: String,
        invite_cseq: u32,
        invite_request: Request,
    ) -> Self {
        CallData {
            call_id,
            target_uri,
            from_tag,
            invite_branch,
            invite_cseq,
            state: CallState::Initiating,
            remote_tag: None,
            sdp: None,
            invite_request,
            last_response: None,
            created_at: Instant::now(),
            connected_at: None,
            terminated_at: None,
            terminated_by: None,
        }
    }

    /// Advances the FSM if the transition is legal; returns whether the
    /// state actually changed
    pub(crate) fn advance(&mut self, target: CallState) -> bool {
        if self.state == target {
            return false;
        }
        if !self.state.can_advance_to(target) {
            return false;
        }
        self.state = target;
        match target {
            CallState::Connected => self.connected_at = Some(self.connected_at.unwrap_or_else(Instant::now)),
            CallState::Terminated | CallState::Failed => {
                self.terminated_at = Some(self.terminated_at.unwrap_or_else(Instant::now))
            }
            _ => {}
        }
        true
    }

    /// How long the call has been (or was) connected
    pub(crate) fn duration(&self) -> Duration {
        match self.connected_at {
            Some(connected) => self
                .terminated_at
                .unwrap_or_else(Instant::now)
                .saturating_duration_since(connected),
            None => Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxsip_sip_core::prelude::*;

    fn data() -> CallData {
        let invite = RequestBuilder::new(Method::Invite, "sip:bob@example.com")
            .unwrap()
            .build();
        CallData::new(
            "c1".to_string(),
            "sip:bob@example.com".to_string(),
            "ft".to_string(),
            "z9hG4bKb".to_string(),
            1,
            invite,
        )
    }

    #[test]
    fn happy_path_transitions() {
        let mut call = data();
        assert!(call.advance(CallState::Proceeding));
        assert!(call.advance(CallState::Connected));
        assert!(call.connected_at.is_some());
        assert!(call.advance(CallState::Terminated));
        assert!(call.terminated_at.is_some());
    }

    #[test]
    fn terminated_is_final() {
        let mut call = data();
        call.advance(CallState::Terminated);
        assert!(!call.advance(CallState::Connected));
        assert!(!call.advance(CallState::Failed));
        assert_eq!(call.state, CallState::Terminated);
    }

    #[test]
    fn connected_cannot_regress_to_proceeding() {
        let mut call = data();
        call.advance(CallState::Connected);
        assert!(!call.advance(CallState::Proceeding));
    }

    #[test]
    fn failed_can_still_terminate() {
        let mut call = data();
        call.advance(CallState::Failed);
        assert!(call.advance(CallState::Terminated));
    }
}
