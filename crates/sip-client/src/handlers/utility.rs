//! Ready-made utility handlers: logging, retry signalling, header
//! injection, and timeout bookkeeping.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use voxsip_sip_core::{HeaderName, Request, Response};

use super::{HandlerContext, SipHandler};
use crate::error::Error;

/// Logs outgoing requests, incoming responses, and errors
pub struct LoggingHandler {
    verbose: bool,
}

impl LoggingHandler {
    /// `verbose` includes peer addresses and reason phrases
    pub fn new(verbose: bool) -> Self {
        LoggingHandler { verbose }
    }
}

impl Default for LoggingHandler {
    fn default() -> Self {
        LoggingHandler::new(true)
    }
}

impl SipHandler for LoggingHandler {
    fn on_request(&self, request: Request, context: &mut HandlerContext) -> Request {
        match (self.verbose, context.destination) {
            (true, Some(destination)) => {
                info!(">>> Sending {} to {}", request.method, destination)
            }
            _ => info!(">>> Sending {}", request.method),
        }
        request
    }

    fn on_response(&self, response: Response, _context: &mut HandlerContext) -> Response {
        if self.verbose {
            info!("<<< Received {} {}", response.status.as_u16(), response.reason);
        } else {
            info!("<<< Received {}", response.status.as_u16());
        }
        response
    }

    fn on_error(&self, error: &Error, _context: &mut HandlerContext) {
        warn!("!!! Error: {}", error);
    }
}

/// Flags retryable failures (408/500/503 by default) in the context
/// metadata: `should_retry=true` plus a running `retry_count`.
///
/// The handler only signals; whether to actually re-send is the caller's
/// decision.
pub struct RetryHandler {
    max_retries: u32,
    retry_codes: Vec<u16>,
    counts: Mutex<HashMap<String, u32>>,
}

impl RetryHandler {
    /// Retry signalling with a per-transaction attempt cap
    pub fn new(max_retries: u32) -> Self {
        RetryHandler {
            max_retries,
            retry_codes: vec![408, 500, 503],
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the retryable status-code set
    pub fn with_codes(mut self, codes: Vec<u16>) -> Self {
        self.retry_codes = codes;
        self
    }
}

impl SipHandler for RetryHandler {
    fn on_response(&self, response: Response, context: &mut HandlerContext) -> Response {
        if self.retry_codes.contains(&response.status.as_u16()) {
            let key = context
                .transaction_id
                .clone()
                .or_else(|| response.call_id().map(str::to_string))
                .unwrap_or_default();
            let mut counts = self.counts.lock().expect("retry lock poisoned");
            let count = counts.entry(key).or_insert(0);
            if *count < self.max_retries {
                *count += 1;
                context
                    .metadata
                    .insert("should_retry".to_string(), "true".to_string());
                context
                    .metadata
                    .insert("retry_count".to_string(), count.to_string());
                info!(
                    "retry {}/{} signalled for status {}",
                    count,
                    self.max_retries,
                    response.status.as_u16()
                );
            }
        }
        response
    }
}

/// Injects fixed headers into outgoing requests
pub struct HeaderInjectionHandler {
    headers: Vec<(HeaderName, String)>,
    overwrite: bool,
}

impl HeaderInjectionHandler {
    /// `overwrite = false` only fills in missing headers
    pub fn new(headers: Vec<(HeaderName, String)>, overwrite: bool) -> Self {
        HeaderInjectionHandler { headers, overwrite }
    }
}

impl SipHandler for HeaderInjectionHandler {
    fn on_request(&self, mut request: Request, _context: &mut HandlerContext) -> Request {
        for (name, value) in &self.headers {
            if self.overwrite || !request.headers.contains(name) {
                request.headers.set(name.clone(), value.clone());
            }
        }
        request
    }
}

/// Records request round-trip times in the context metadata
/// (`request_duration_ms`) and warns when a soft deadline is exceeded.
pub struct TimeoutHandler {
    soft_deadline: Duration,
    started: Mutex<HashMap<String, Instant>>,
}

impl TimeoutHandler {
    /// Bookkeeping with a soft deadline used only for the warning log
    pub fn new(soft_deadline: Duration) -> Self {
        TimeoutHandler {
            soft_deadline,
            started: Mutex::new(HashMap::new()),
        }
    }

    fn key(context: &HandlerContext, fallback: Option<&str>) -> Option<String> {
        context
            .transaction_id
            .clone()
            .or_else(|| fallback.map(str::to_string))
    }
}

impl SipHandler for TimeoutHandler {
    fn on_request(&self, request: Request, context: &mut HandlerContext) -> Request {
        if let Some(key) = Self::key(context, request.call_id()) {
            self.started
                .lock()
                .expect("timeout lock poisoned")
                .insert(key, Instant::now());
        }
        request
    }

    fn on_response(&self, response: Response, context: &mut HandlerContext) -> Response {
        if response.status.is_final() {
            if let Some(key) = Self::key(context, response.call_id()) {
                if let Some(started) = self
                    .started
                    .lock()
                    .expect("timeout lock poisoned")
                    .remove(&key)
                {
                    let elapsed = started.elapsed();
                    context.metadata.insert(
                        "request_duration_ms".to_string(),
                        elapsed.as_millis().to_string(),
                    );
                    if elapsed > self.soft_deadline {
                        warn!(
                            "request exceeded soft deadline: {:?} > {:?}",
                            elapsed, self.soft_deadline
                        );
                    }
                }
            }
        }
        response
    }
}
