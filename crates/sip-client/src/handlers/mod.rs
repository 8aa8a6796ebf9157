//! Pluggable message-interception chain.
//!
//! Handlers observe (and may rewrite) every request immediately before it
//! is sent and every response immediately after it is received. They run
//! synchronously, in insertion order, on the client's event loop; state a
//! handler keeps must use interior mutability (`Mutex`) because the chain
//! hands out `&self`.
//!
//! Handlers communicate with each other and with the client through the
//! context's string metadata map (`should_retry`, `retry_count`, …).

pub mod flow;
pub mod utility;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use tracing::warn;
use voxsip_sip_core::{Request, Response};

use crate::error::Error;

/// Context threaded through one chain invocation
#[derive(Debug, Default, Clone)]
pub struct HandlerContext {
    /// The request being sent (or the one a response answers), if known
    pub request: Option<Request>,
    /// The response being processed, once present
    pub response: Option<Response>,
    /// Where the request is going
    pub destination: Option<SocketAddr>,
    /// Where the response came from
    pub source: Option<SocketAddr>,
    /// Transaction key, rendered for logging/correlation
    pub transaction_id: Option<String>,
    /// Dialog id, rendered, once a dialog exists
    pub dialog_id: Option<String>,
    /// Free-form cross-handler signalling
    pub metadata: HashMap<String, String>,
}

impl HandlerContext {
    /// Creates an empty context
    pub fn new() -> Self {
        HandlerContext::default()
    }
}

/// One interception point.
///
/// Every method has a pass-through default, so implementors override only
/// what they care about.
pub trait SipHandler: Send + Sync {
    /// Called immediately before a request is sent; may rewrite it
    fn on_request(&self, request: Request, _context: &mut HandlerContext) -> Request {
        request
    }

    /// Called immediately after a response is received; may rewrite it
    fn on_response(&self, response: Response, _context: &mut HandlerContext) -> Response {
        response
    }

    /// Called when an operation fails
    fn on_error(&self, _error: &Error, _context: &mut HandlerContext) {}
}

/// Insertion-ordered handler chain.
///
/// A handler panic is contained: the offending handler is skipped for that
/// message and every handler's `on_error` still runs for real errors.
#[derive(Clone, Default)]
pub struct HandlerChain {
    handlers: Arc<Mutex<Vec<Arc<dyn SipHandler>>>>,
}

impl HandlerChain {
    /// Creates an empty chain
    pub fn new() -> Self {
        HandlerChain::default()
    }

    /// Appends a handler to the end of the chain
    pub fn add(&self, handler: Arc<dyn SipHandler>) {
        self.handlers
            .lock()
            .expect("handler chain lock poisoned")
            .push(handler);
    }

    /// Removes every handler
    pub fn clear(&self) {
        self.handlers
            .lock()
            .expect("handler chain lock poisoned")
            .clear();
    }

    /// Number of handlers installed
    pub fn len(&self) -> usize {
        self.handlers
            .lock()
            .expect("handler chain lock poisoned")
            .len()
    }

    /// True when no handlers are installed
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<dyn SipHandler>> {
        self.handlers
            .lock()
            .expect("handler chain lock poisoned")
            .clone()
    }

    /// Runs every `on_request` in order
    pub fn on_request(&self, mut request: Request, context: &mut HandlerContext) -> Request {
        for handler in self.snapshot() {
            let input = request.clone();
            match catch_unwind(AssertUnwindSafe(|| handler.on_request(input, context))) {
                Ok(rewritten) => request = rewritten,
                Err(_) => warn!("request handler panicked; skipping it"),
            }
        }
        request
    }

    /// Runs every `on_response` in order
    pub fn on_response(&self, mut response: Response, context: &mut HandlerContext) -> Response {
        for handler in self.snapshot() {
            let input = response.clone();
            match catch_unwind(AssertUnwindSafe(|| handler.on_response(input, context))) {
                Ok(rewritten) => response = rewritten,
                Err(_) => warn!("response handler panicked; skipping it"),
            }
        }
        response
    }

    /// Runs every `on_error` in order
    pub fn on_error(&self, error: &Error, context: &mut HandlerContext) {
        for handler in self.snapshot() {
            if catch_unwind(AssertUnwindSafe(|| handler.on_error(error, context))).is_err() {
                warn!("error handler panicked; skipping it");
            }
        }
    }
}
