//! Typed client events and their subscriber registry.
//!
//! Events are the only push surface the client exposes: handlers are
//! registered per event kind with [`Client::on`](crate::Client::on) and run
//! synchronously on the client's event loop. A panicking handler is logged
//! and does not disturb the loop or other handlers.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use tracing::error;

use voxsip_sip_core::Response;

/// Discriminant used when subscribing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A final response to an OPTIONS probe arrived
    OptionsResponse,
    /// An INVITE completed with an SDP answer
    SdpNegotiated,
    /// A call ended, locally or by the remote party
    CallHangup,
}

/// A client event
#[derive(Debug, Clone)]
pub enum Event {
    /// Final response to an OPTIONS probe
    OptionsResponse {
        /// The response as received
        response: Response,
    },
    /// SDP answer accepted for a call
    SdpNegotiated {
        /// Call the answer belongs to
        call_id: String,
        /// The answer body, byte-exact
        sdp: String,
    },
    /// A call reached its end
    CallHangup {
        /// Call that ended
        call_id: String,
        /// True when the remote side hung up
        by_remote: bool,
    },
}

impl Event {
    /// The kind used for subscription matching
    pub fn kind(&self) -> EventKind {
        match self {
            Event::OptionsResponse { .. } => EventKind::OptionsResponse,
            Event::SdpNegotiated { .. } => EventKind::SdpNegotiated,
            Event::CallHangup { .. } => EventKind::CallHangup,
        }
    }
}

type EventHandlerFn = dyn Fn(&Event) + Send + Sync;

/// Per-client subscriber lists.
///
/// Instance-owned (never process-global) so independent clients keep
/// independent handler sets.
#[derive(Default)]
pub(crate) struct EventRegistry {
    handlers: Mutex<HashMap<EventKind, Vec<Arc<EventHandlerFn>>>>,
}

impl EventRegistry {
    pub(crate) fn new() -> Self {
        EventRegistry::default()
    }

    pub(crate) fn subscribe(&self, kind: EventKind, handler: Arc<EventHandlerFn>) {
        self.handlers
            .lock()
            .expect("event registry lock poisoned")
            .entry(kind)
            .or_default()
            .push(handler);
    }

    pub(crate) fn emit(&self, event: &Event) {
        let handlers = {
            let registry = self.handlers.lock().expect("event registry lock poisoned");
            registry.get(&event.kind()).cloned().unwrap_or_default()
        };
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                error!(kind = ?event.kind(), "event handler panicked");
            }
        }
    }
}
