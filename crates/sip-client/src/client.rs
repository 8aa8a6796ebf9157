//! The high-level SIP user-agent client.
//!
//! One [`Client`] owns one transport, one transaction manager, and one
//! event-loop task; everything the loop touches (calls, dialogs, pending
//! operations) is mutated only from that task or behind short-lived locks.
//! Public operations build a request, park a waiter keyed by the new
//! transaction, and let the loop resolve it when the final response (or a
//! timeout) lands.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use voxsip_dialog_core::auth::{retry_request, NonceCounter};
use voxsip_dialog_core::dialog::requests::make_cancel;
use voxsip_dialog_core::{
    generate_branch, Dialog, TransactionEvent, TransactionKey, TransactionManager,
};
use voxsip_sip_core::prelude::*;
use voxsip_sip_transport::resolve::SourceAddrCache;
use voxsip_sip_transport::{Transport, TransportEvent, TransportKind};

use crate::call::{CallData, CallState, TerminatedBy};
use crate::config::{ClientConfig, Protocol};
use crate::error::{Error, Result};
use crate::events::{Event, EventKind, EventRegistry};
use crate::handlers::{HandlerChain, HandlerContext, SipHandler};
use crate::media;

const DEFAULT_OPTIONS_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_REGISTER_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_MESSAGE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_INVITE_TIMEOUT: Duration = Duration::from_secs(10);

const ALLOW_METHODS: &str = "INVITE, ACK, CANCEL, OPTIONS, BYE, INFO, MESSAGE";
const ACCEPT_TYPES: &str = "application/sdp, application/dtmf-relay, text/plain";

/// Extra options for [`Client::options`] and [`Client::register`]
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Overall deadline for the operation
    pub timeout: Option<Duration>,
    /// Extra headers set on the request
    pub headers: Vec<(HeaderName, String)>,
}

/// Extra options for [`Client::message`]
#[derive(Debug, Clone)]
pub struct MessageOptions {
    /// Content-Type of the payload
    pub content_type: String,
    /// Wait for the peer's final response
    pub wait_response: bool,
    /// Overall deadline when waiting
    pub timeout: Option<Duration>,
    /// Extra headers set on the request
    pub headers: Vec<(HeaderName, String)>,
}

impl Default for MessageOptions {
    fn default() -> Self {
        MessageOptions {
            content_type: "text/plain".to_string(),
            wait_response: false,
            timeout: None,
            headers: Vec::new(),
        }
    }
}

/// The SDP offer carried by an INVITE
#[derive(Debug, Clone, Default)]
pub enum SdpOffer {
    /// No body
    #[default]
    None,
    /// A generated default audio offer
    Default,
    /// A caller-supplied body, passed through byte-exact
    Custom(String),
}

/// Extra options for [`Client::invite`]
#[derive(Debug, Clone, Default)]
pub struct InviteOptions {
    /// Deadline for the final response
    pub timeout: Option<Duration>,
    /// SDP offer to carry
    pub sdp: SdpOffer,
    /// Extra headers set on the INVITE
    pub headers: Vec<(HeaderName, String)>,
}

/// Registration status after a successful REGISTER
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationStatus {
    /// True after a 200 OK (and no unregistration since)
    pub registered: bool,
    /// Expires value granted by the registrar
    pub expires: u32,
}

enum OpOutcome {
    Final(Response),
    Timeout,
    Transport(String),
    AuthFailed(String),
    Closed,
}

struct PendingOp {
    tx: oneshot::Sender<OpOutcome>,
    request: Request,
    attempted_auth: bool,
}

struct ClientInner {
    config: ClientConfig,
    server_addr: SocketAddr,
    transport: Arc<dyn Transport>,
    manager: TransactionManager,
    local_uri: String,
    via_sent_by: String,
    calls: Mutex<HashMap<String, CallData>>,
    dialogs: Mutex<HashMap<String, Dialog>>,
    pending: Mutex<HashMap<TransactionKey, PendingOp>>,
    nonce_counts: Mutex<NonceCounter>,
    registration: Mutex<Option<RegistrationStatus>>,
    handlers: HandlerChain,
    events: EventRegistry,
    cseq: AtomicU32,
    closed: AtomicBool,
    loop_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// A SIP user-agent client: UAC operations (OPTIONS, REGISTER, MESSAGE,
/// INVITE) plus the minimal UAS surface (OPTIONS/BYE/CANCEL auto-answers).
///
/// ```rust,no_run
/// use voxsip_sip_client::{Client, ClientConfig};
///
/// # async fn example() -> voxsip_sip_client::Result<()> {
/// let client = Client::connect(ClientConfig::new("sip.example.com", 5060)
///     .identity("alice")
///     .credentials("alice", "secret"))
///     .await?;
///
/// let response = client.options(None, Default::default()).await?;
/// println!("peer says {}", response.status);
/// client.close().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

/// Public handle to one call, cheap to clone. The client owns the call
/// record; the handle reaches it by Call-ID.
#[derive(Clone)]
pub struct Call {
    call_id: String,
    client: Client,
}

impl Client {
    /// Binds the configured transport and starts the event loop.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let resolver = SourceAddrCache::new();
        let kind = match config.protocol {
            Protocol::Udp => TransportKind::Udp,
            Protocol::Tcp => TransportKind::Tcp,
        };
        let server_addr = resolver
            .resolve(&config.server_host, config.server_port, kind)
            .await
            .map_err(Error::from)?;
        let local_addr = config
            .local_addr
            .unwrap_or_else(|| "0.0.0.0:0".parse().expect("static addr"));

        let (transport, transport_rx): (
            Arc<dyn Transport>,
            mpsc::Receiver<TransportEvent>,
        ) = match config.protocol {
            Protocol::Udp => {
                let (t, rx) = voxsip_sip_transport::UdpTransport::bind(local_addr, None).await?;
                (Arc::new(t), rx)
            }
            Protocol::Tcp => {
                let (t, rx) = voxsip_sip_transport::TcpTransport::bind(local_addr, None).await?;
                (Arc::new(t), rx)
            }
        };

        Self::with_transport(config, transport, transport_rx, server_addr, &resolver).await
    }

    /// Starts a client over an already-bound transport (swapped transports,
    /// TLS with a custom config, tests).
    pub async fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        transport_rx: mpsc::Receiver<TransportEvent>,
        server_addr: SocketAddr,
        resolver: &SourceAddrCache,
    ) -> Result<Self> {
        let local_addr = transport.local_addr().map_err(Error::from)?;
        // the IP we advertise must be routable from the peer
        let advertised_ip = if local_addr.ip().is_unspecified() {
            resolver
                .source_ip_for(server_addr)
                .await
                .unwrap_or_else(|_| local_addr.ip())
        } else {
            local_addr.ip()
        };
        let via_sent_by = format!("{}:{}", advertised_ip, local_addr.port());
        let local_uri = format!("sip:{}@{}", config.identity, via_sent_by);

        let (manager, manager_rx) = TransactionManager::new(transport.clone(), config.timers.clone());

        let inner = Arc::new(ClientInner {
            config,
            server_addr,
            transport,
            manager,
            local_uri,
            via_sent_by,
            calls: Mutex::new(HashMap::new()),
            dialogs: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            nonce_counts: Mutex::new(NonceCounter::new()),
            registration: Mutex::new(None),
            handlers: HandlerChain::new(),
            events: EventRegistry::new(),
            cseq: AtomicU32::new(1),
            closed: AtomicBool::new(false),
            loop_handle: Mutex::new(None),
        });

        let handle = tokio::spawn(event_loop(inner.clone(), transport_rx, manager_rx));
        *inner.loop_handle.lock().expect("loop handle lock poisoned") = Some(handle);

        info!(local_uri = %inner.local_uri, server = %inner.server_addr, "client started");
        Ok(Client { inner })
    }

    /// Our advertised URI (`sip:identity@ip:port`)
    pub fn local_uri(&self) -> &str {
        &self.inner.local_uri
    }

    /// The resolved peer address everything is sent to
    pub fn server_addr(&self) -> SocketAddr {
        self.inner.server_addr
    }

    /// Subscribes a handler to an event kind
    pub fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(kind, Arc::new(handler));
    }

    /// Appends a message-interception handler to the chain
    pub fn add_handler(&self, handler: Arc<dyn SipHandler>) {
        self.inner.handlers.add(handler);
    }

    /// Registration status from the last REGISTER exchange
    pub fn registration(&self) -> Option<RegistrationStatus> {
        *self
            .inner
            .registration
            .lock()
            .expect("registration lock poisoned")
    }

    /// Handle to a call by Call-ID, if the client knows it
    pub fn call(&self, call_id: &str) -> Option<Call> {
        let calls = self.inner.calls.lock().expect("call table lock poisoned");
        calls.contains_key(call_id).then(|| Call {
            call_id: call_id.to_string(),
            client: self.clone(),
        })
    }

    /// Call-IDs of every call the client currently tracks
    pub fn call_ids(&self) -> Vec<String> {
        self.inner
            .calls
            .lock()
            .expect("call table lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Shuts the client down: closes the socket, fails outstanding
    /// operations with `Closed`, and drops calls and dialogs.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.manager.shutdown();
        let _ = self.inner.transport.close().await;

        let pending: Vec<PendingOp> = {
            let mut table = self.inner.pending.lock().expect("pending lock poisoned");
            table.drain().map(|(_, op)| op).collect()
        };
        for op in pending {
            let _ = op.tx.send(OpOutcome::Closed);
        }
        self.inner.calls.lock().expect("call table lock poisoned").clear();
        self.inner
            .dialogs
            .lock()
            .expect("dialog table lock poisoned")
            .clear();
        if let Some(handle) = self
            .inner
            .loop_handle
            .lock()
            .expect("loop handle lock poisoned")
            .take()
        {
            handle.abort();
        }
        info!("client closed");
    }

    /// Sends an OPTIONS probe and returns the final response.
    pub async fn options(&self, uri: Option<&str>, opts: RequestOptions) -> Result<Response> {
        self.ensure_open()?;
        let target = uri
            .map(str::to_string)
            .unwrap_or_else(|| self.inner.config.default_remote_uri());
        let mut request = self.base_request(
            Method::Options,
            &target,
            &self.generate_call_id(),
            &generate_tag(),
            None,
        )?;
        for (name, value) in &opts.headers {
            request.headers.set(name.clone(), value.clone());
        }

        let response = self
            .run_transaction(request, opts.timeout.unwrap_or(DEFAULT_OPTIONS_TIMEOUT))
            .await?;
        Ok(response)
    }

    /// Registers with the configured (or given) registrar; digest
    /// challenges are answered transparently when credentials are set.
    pub async fn register(
        &self,
        username: Option<&str>,
        domain: Option<&str>,
        expires: u32,
        opts: RequestOptions,
    ) -> Result<Response> {
        self.ensure_open()?;
        let user = username
            .map(str::to_string)
            .or_else(|| {
                self.inner
                    .config
                    .credentials
                    .as_ref()
                    .map(|c| c.username.clone())
            })
            .unwrap_or_else(|| self.inner.config.identity.clone());
        let host = domain
            .map(str::to_string)
            .unwrap_or_else(|| self.inner.config.server_host.clone());
        let request_uri = format!("sip:{}", host);
        let to_value = format!("<sip:{}@{}>", user, host);

        let mut request = self.base_request(
            Method::Register,
            &request_uri,
            &self.generate_call_id(),
            &generate_tag(),
            Some(to_value),
        )?;
        request.headers.set(
            HeaderName::Contact,
            format!("<sip:{}@{}>", user, self.inner.via_sent_by),
        );
        request
            .headers
            .set(HeaderName::Expires, expires.to_string());
        for (name, value) in &opts.headers {
            request.headers.set(name.clone(), value.clone());
        }

        let response = self
            .run_transaction(request, opts.timeout.unwrap_or(DEFAULT_REGISTER_TIMEOUT))
            .await?;

        if response.status.is_success() {
            let granted = response
                .header(&HeaderName::Expires)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(expires);
            *self
                .inner
                .registration
                .lock()
                .expect("registration lock poisoned") = Some(RegistrationStatus {
                registered: granted > 0,
                expires: granted,
            });
        }
        Ok(response)
    }

    /// Sends a MESSAGE. Returns `None` without waiting unless
    /// `opts.wait_response` is set.
    pub async fn message(
        &self,
        content: &str,
        uri: Option<&str>,
        opts: MessageOptions,
    ) -> Result<Option<Response>> {
        self.ensure_open()?;
        let target = uri
            .map(str::to_string)
            .unwrap_or_else(|| self.inner.config.default_remote_uri());
        let mut request = self.base_request(
            Method::Message,
            &target,
            &self.generate_call_id(),
            &generate_tag(),
            None,
        )?;
        request
            .headers
            .set(HeaderName::ContentType, opts.content_type.clone());
        for (name, value) in &opts.headers {
            request.headers.set(name.clone(), value.clone());
        }
        request.body = Bytes::copy_from_slice(content.as_bytes());

        if opts.wait_response {
            let response = self
                .run_transaction(request, opts.timeout.unwrap_or(DEFAULT_MESSAGE_TIMEOUT))
                .await?;
            Ok(Some(response))
        } else {
            // fire and forget: the transaction still handles retransmission
            let request = self.dispatch_request(request);
            self.inner
                .manager
                .send_request(request, self.inner.server_addr)
                .await?;
            Ok(None)
        }
    }

    /// Places a call. Returns once a final response arrives: a connected
    /// call on 2xx, a failed one on non-2xx. Use [`Client::call`] to reach
    /// the in-flight call (e.g. to CANCEL after a provisional).
    pub async fn invite(&self, uri: &str, opts: InviteOptions) -> Result<Call> {
        self.ensure_open()?;
        let call_id = self.generate_call_id();
        let from_tag = generate_tag();
        let cseq = self.next_cseq();

        let mut request = self.base_request_with(
            Method::Invite,
            uri,
            &call_id,
            &from_tag,
            None,
            cseq,
            &generate_branch(),
        )?;

        match &opts.sdp {
            SdpOffer::None => {}
            SdpOffer::Default => {
                let host = self
                    .inner
                    .via_sent_by
                    .split(':')
                    .next()
                    .unwrap_or("127.0.0.1")
                    .to_string();
                let port = self
                    .inner
                    .transport
                    .local_addr()
                    .map(|a| a.port())
                    .unwrap_or(5060)
                    .saturating_add(10_000);
                let offer = media::audio_offer(&host, port);
                request
                    .headers
                    .set(HeaderName::ContentType, "application/sdp");
                request.body = Bytes::from(offer);
            }
            SdpOffer::Custom(offer) => {
                request
                    .headers
                    .set(HeaderName::ContentType, "application/sdp");
                request.body = Bytes::from(offer.clone());
            }
        }
        for (name, value) in &opts.headers {
            request.headers.set(name.clone(), value.clone());
        }

        let request = self.dispatch_request(request);
        let branch = request.via_branch().unwrap_or_default();
        {
            let mut calls = self.inner.calls.lock().expect("call table lock poisoned");
            calls.insert(
                call_id.clone(),
                CallData::new(
                    call_id.clone(),
                    uri.to_string(),
                    from_tag,
                    branch,
                    cseq,
                    request.clone(),
                ),
            );
        }

        let outcome = self
            .run_prepared_transaction(request, opts.timeout.unwrap_or(DEFAULT_INVITE_TIMEOUT))
            .await;
        match outcome {
            Ok(_response) => Ok(Call {
                call_id,
                client: self.clone(),
            }),
            Err(e) => {
                self.fail_call(&call_id);
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn next_cseq(&self) -> u32 {
        self.inner.cseq.fetch_add(1, Ordering::SeqCst)
    }

    fn generate_call_id(&self) -> String {
        let host = self
            .inner
            .via_sent_by
            .split(':')
            .next()
            .unwrap_or("localhost");
        format!("{}@{}", Uuid::new_v4().simple(), host)
    }

    fn base_request(
        &self,
        method: Method,
        uri: &str,
        call_id: &str,
        from_tag: &str,
        to_override: Option<String>,
    ) -> Result<Request> {
        let cseq = self.next_cseq();
        self.base_request_with(
            method,
            uri,
            call_id,
            from_tag,
            to_override,
            cseq,
            &generate_branch(),
        )
    }

    fn base_request_with(
        &self,
        method: Method,
        uri: &str,
        call_id: &str,
        from_tag: &str,
        to_override: Option<String>,
        cseq: u32,
        branch: &str,
    ) -> Result<Request> {
        let config = &self.inner.config;
        let builder = RequestBuilder::new(method, uri)?
            .via(
                &self.inner.via_sent_by,
                config.protocol.as_str(),
                Some(branch),
            )
            .max_forwards(70)
            .from(
                config.display_name.as_deref().unwrap_or(""),
                &self.inner.local_uri,
                Some(from_tag),
            )
            .call_id(call_id)
            .cseq(cseq)
            .contact(&self.inner.local_uri, None)
            .user_agent(&config.user_agent);

        let builder = match to_override {
            Some(value) => builder.to_raw(value),
            None => builder.to("", uri, None),
        };
        Ok(builder.build())
    }

    /// Runs the handler chain's request hook
    fn dispatch_request(&self, request: Request) -> Request {
        let mut context = HandlerContext {
            request: Some(request.clone()),
            destination: Some(self.inner.server_addr),
            ..HandlerContext::default()
        };
        self.inner.handlers.on_request(request, &mut context)
    }

    /// Chain hook + transaction + wait for the final response
    async fn run_transaction(&self, request: Request, timeout: Duration) -> Result<Response> {
        let request = self.dispatch_request(request);
        self.run_prepared_transaction(request, timeout).await
    }

    /// Transaction + wait, for requests that already went through the chain
    async fn run_prepared_transaction(
        &self,
        request: Request,
        timeout: Duration,
    ) -> Result<Response> {
        let key = TransactionKey::from_client_request(&request)
            .ok_or_else(|| Error::Protocol("request lacks Via branch or Call-ID".to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.inner
            .pending
            .lock()
            .expect("pending lock poisoned")
            .insert(
                key.clone(),
                PendingOp {
                    tx,
                    request: request.clone(),
                    attempted_auth: false,
                },
            );

        if let Err(e) = self
            .inner
            .manager
            .send_request(request, self.inner.server_addr)
            .await
        {
            self.inner
                .pending
                .lock()
                .expect("pending lock poisoned")
                .remove(&key);
            return Err(e.into());
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(OpOutcome::Final(response))) => Ok(response),
            Ok(Ok(OpOutcome::Timeout)) => Err(Error::Timeout),
            Ok(Ok(OpOutcome::Transport(error))) => Err(Error::Transport(error)),
            Ok(Ok(OpOutcome::AuthFailed(realm))) => Err(Error::AuthFailed(realm)),
            Ok(Ok(OpOutcome::Closed)) | Ok(Err(_)) => Err(Error::Closed),
            Err(_) => {
                // caller deadline: drop the waiter, the transaction keeps
                // its RFC timers
                self.inner
                    .pending
                    .lock()
                    .expect("pending lock poisoned")
                    .remove(&key);
                Err(Error::Timeout)
            }
        }
    }

    fn fail_call(&self, call_id: &str) {
        let mut calls = self.inner.calls.lock().expect("call table lock poisoned");
        if let Some(call) = calls.get_mut(call_id) {
            call.advance(CallState::Failed);
            call.terminated_by = call.terminated_by.or(Some(TerminatedBy::Local));
        }
    }
}

impl Call {
    /// The Call-ID identifying this call
    pub fn id(&self) -> &str {
        &self.call_id
    }

    /// The URI the INVITE was addressed to
    pub fn target_uri(&self) -> Result<String> {
        let calls = self
            .client
            .inner
            .calls
            .lock()
            .expect("call table lock poisoned");
        calls
            .get(&self.call_id)
            .map(|call| call.target_uri.clone())
            .ok_or_else(|| Error::UnknownCall(self.call_id.clone()))
    }

    /// Our From tag (the local half of the dialog identity)
    pub fn local_tag(&self) -> Result<String> {
        let calls = self
            .client
            .inner
            .calls
            .lock()
            .expect("call table lock poisoned");
        calls
            .get(&self.call_id)
            .map(|call| call.from_tag.clone())
            .ok_or_else(|| Error::UnknownCall(self.call_id.clone()))
    }

    /// The peer's To tag, once a tagged response has arrived
    pub fn remote_tag(&self) -> Result<Option<String>> {
        let calls = self
            .client
            .inner
            .calls
            .lock()
            .expect("call table lock poisoned");
        calls
            .get(&self.call_id)
            .map(|call| call.remote_tag.clone())
            .ok_or_else(|| Error::UnknownCall(self.call_id.clone()))
    }

    /// Branch of the (most recent) INVITE transaction
    pub fn invite_branch(&self) -> Result<String> {
        let calls = self
            .client
            .inner
            .calls
            .lock()
            .expect("call table lock poisoned");
        calls
            .get(&self.call_id)
            .map(|call| call.invite_branch.clone())
            .ok_or_else(|| Error::UnknownCall(self.call_id.clone()))
    }

    /// Current call state
    pub fn state(&self) -> Result<CallState> {
        let calls = self
            .client
            .inner
            .calls
            .lock()
            .expect("call table lock poisoned");
        calls
            .get(&self.call_id)
            .map(|call| call.state)
            .ok_or_else(|| Error::UnknownCall(self.call_id.clone()))
    }

    /// The negotiated SDP answer, once present
    pub fn sdp(&self) -> Result<Option<String>> {
        let calls = self
            .client
            .inner
            .calls
            .lock()
            .expect("call table lock poisoned");
        calls
            .get(&self.call_id)
            .map(|call| call.sdp.clone())
            .ok_or_else(|| Error::UnknownCall(self.call_id.clone()))
    }

    /// Status code of the last response seen for this call
    pub fn last_status(&self) -> Result<Option<StatusCode>> {
        let calls = self
            .client
            .inner
            .calls
            .lock()
            .expect("call table lock poisoned");
        calls
            .get(&self.call_id)
            .map(|call| call.last_response.as_ref().map(|r| r.status))
            .ok_or_else(|| Error::UnknownCall(self.call_id.clone()))
    }

    /// How long the call has been (or was) connected
    pub fn duration(&self) -> Result<Duration> {
        let calls = self
            .client
            .inner
            .calls
            .lock()
            .expect("call table lock poisoned");
        calls
            .get(&self.call_id)
            .map(|call| call.duration())
            .ok_or_else(|| Error::UnknownCall(self.call_id.clone()))
    }

    /// Hangs up: sends BYE in the call's dialog and waits for the 200.
    pub async fn bye(&self, timeout: Option<Duration>) -> Result<Response> {
        self.client.ensure_open()?;
        let inner = &self.client.inner;

        let request = {
            let mut dialogs = inner.dialogs.lock().expect("dialog table lock poisoned");
            let dialog = dialogs
                .get_mut(&self.call_id)
                .ok_or_else(|| Error::Protocol("no confirmed dialog to hang up".to_string()))?;
            dialog.make_request(
                Method::Bye,
                &inner.via_sent_by,
                inner.config.protocol.as_str(),
            )
        };

        self.client
            .run_transaction(request, timeout.unwrap_or(DEFAULT_MESSAGE_TIMEOUT))
            .await
    }

    /// Cancels a pending INVITE. Valid only after a provisional response
    /// has arrived (RFC 3261 §9.1); earlier calls are an error.
    pub async fn cancel(&self, timeout: Option<Duration>) -> Result<Response> {
        self.client.ensure_open()?;
        let invite = {
            let calls = self
                .client
                .inner
                .calls
                .lock()
                .expect("call table lock poisoned");
            let call = calls
                .get(&self.call_id)
                .ok_or_else(|| Error::UnknownCall(self.call_id.clone()))?;
            if call.state != CallState::Proceeding {
                return Err(Error::Protocol(
                    "CANCEL requires a provisional response first".to_string(),
                ));
            }
            call.invite_request.clone()
        };

        let cancel = make_cancel(&invite);
        self.client
            .run_transaction(cancel, timeout.unwrap_or(DEFAULT_OPTIONS_TIMEOUT))
            .await
    }
}

fn generate_tag() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

// ----------------------------------------------------------------------
// Event loop
// ----------------------------------------------------------------------

async fn event_loop(
    inner: Arc<ClientInner>,
    mut transport_rx: mpsc::Receiver<TransportEvent>,
    mut manager_rx: mpsc::Receiver<TransactionEvent>,
) {
    loop {
        tokio::select! {
            transport_event = transport_rx.recv() => match transport_event {
                Some(TransportEvent::MessageReceived { bytes, source, kind }) => {
                    inner.manager.handle_frame(&bytes, source, kind).await;
                }
                Some(TransportEvent::Error { error }) => {
                    warn!("transport error: {}", error);
                }
                Some(TransportEvent::Closed) | None => {
                    debug!("transport channel closed; stopping event loop");
                    break;
                }
            },
            manager_event = manager_rx.recv() => match manager_event {
                Some(event) => on_transaction_event(&inner, event).await,
                None => break,
            },
        }
    }
}

fn run_response_chain(
    inner: &Arc<ClientInner>,
    key: Option<&TransactionKey>,
    response: Response,
) -> Response {
    let mut context = HandlerContext {
        response: Some(response.clone()),
        source: Some(inner.server_addr),
        transaction_id: key.map(|k| k.to_string()),
        ..HandlerContext::default()
    };
    inner.handlers.on_response(response, &mut context)
}

async fn on_transaction_event(inner: &Arc<ClientInner>, event: TransactionEvent) {
    match event {
        TransactionEvent::Provisional { key, response } => {
            let response = run_response_chain(inner, Some(&key), response);
            on_provisional(inner, response).await;
        }
        TransactionEvent::Success { key, response } => {
            let response = run_response_chain(inner, Some(&key), response);
            on_final_response(inner, &key, response).await;
        }
        TransactionEvent::Failure { key, response } => {
            let response = run_response_chain(inner, Some(&key), response);
            on_final_response(inner, &key, response).await;
        }
        TransactionEvent::AuthChallenge {
            key,
            response,
            challenge,
        } => {
            on_auth_challenge(inner, key, response, challenge).await;
        }
        TransactionEvent::TimedOut { key } => {
            if key.method == Method::Invite && !key.is_server {
                fail_call_by_id(inner, &key.call_id);
            }
            resolve_pending(inner, &key, OpOutcome::Timeout);
        }
        TransactionEvent::TransportError { key, error } => {
            if key.method == Method::Invite && !key.is_server {
                fail_call_by_id(inner, &key.call_id);
            }
            resolve_pending(inner, &key, OpOutcome::Transport(error));
        }
        TransactionEvent::NewRequest {
            key,
            request,
            source,
        } => {
            on_uas_request(inner, key, request, source).await;
        }
        TransactionEvent::AckReceived { key, .. } => {
            debug!(%key, "ACK consumed by server transaction");
        }
        TransactionEvent::StrayRequest { request, source } => {
            on_stray_request(inner, request, source).await;
        }
        TransactionEvent::StrayResponse { response, .. } => {
            debug!(
                status = response.status.as_u16(),
                "stray response discarded"
            );
        }
        TransactionEvent::Terminated { key } => {
            // a transaction that dies without a final response fails its op
            resolve_pending(inner, &key, OpOutcome::Timeout);
        }
    }
}

async fn on_provisional(inner: &Arc<ClientInner>, response: Response) {
    let Some(cseq) = response.cseq() else { return };
    if cseq.method != Method::Invite {
        return;
    }
    let Some(call_id) = response.call_id().map(str::to_string) else {
        return;
    };

    let invite_request = {
        let mut calls = inner.calls.lock().expect("call table lock poisoned");
        let Some(call) = calls.get_mut(&call_id) else {
            return;
        };
        call.advance(CallState::Proceeding);
        call.last_response = Some(response.clone());
        if let Some(tag) = response.to_tag() {
            call.remote_tag.get_or_insert(tag);
        }
        call.invite_request.clone()
    };

    // reliable provisional (RFC 3262): PRACK it once per RSeq
    let reliable = response.header(&HeaderName::RSeq).is_some()
        && response
            .headers
            .get_all(&HeaderName::Require)
            .chain(response.headers.get_all(&HeaderName::Supported))
            .any(|v| v.to_ascii_lowercase().contains("100rel"));
    if reliable {
        let prack = {
            let mut dialogs = inner.dialogs.lock().expect("dialog table lock poisoned");
            if !dialogs.contains_key(&call_id) {
                match Dialog::from_uac_response(&invite_request, &response) {
                    Some(dialog) => {
                        dialogs.insert(call_id.clone(), dialog);
                    }
                    None => return,
                }
            }
            dialogs.get_mut(&call_id).and_then(|dialog| {
                dialog.make_prack(
                    &response,
                    &inner.via_sent_by,
                    inner.config.protocol.as_str(),
                )
            })
        };
        if let Some(prack) = prack {
            debug!(%call_id, "sending PRACK for reliable provisional");
            if let Err(e) = inner.manager.send_request(prack, inner.server_addr).await {
                warn!("failed to send PRACK: {}", e);
            }
        }
    }
}

async fn on_final_response(inner: &Arc<ClientInner>, key: &TransactionKey, response: Response) {
    match response.cseq().map(|cseq| cseq.method) {
        Some(Method::Invite) => on_invite_final(inner, response.clone()).await,
        Some(Method::Bye) => on_bye_final(inner, &response),
        Some(Method::Register) => {}
        Some(Method::Options) => {
            inner.events.emit(&Event::OptionsResponse {
                response: response.clone(),
            });
        }
        _ => {}
    }
    resolve_pending(inner, key, OpOutcome::Final(response));
}

async fn on_invite_final(inner: &Arc<ClientInner>, response: Response) {
    let Some(call_id) = response.call_id().map(str::to_string) else {
        return;
    };

    if response.status.is_success() {
        let (invite_request, invite_cseq, changed_sdp) = {
            let mut calls = inner.calls.lock().expect("call table lock poisoned");
            let Some(call) = calls.get_mut(&call_id) else {
                return;
            };
            call.last_response = Some(response.clone());
            if let Some(tag) = response.to_tag() {
                call.remote_tag = Some(tag);
            }
            call.advance(CallState::Connected);
            let body = response.body_str().trim().to_string();
            let changed = !body.is_empty() && call.sdp.as_deref() != Some(body.as_str());
            if changed {
                call.sdp = Some(body.clone());
            }
            (
                call.invite_request.clone(),
                call.invite_cseq,
                changed.then_some(body),
            )
        };

        // dialog: create (or confirm the early one), then ACK out of
        // transaction with a fresh branch
        let ack = {
            let mut dialogs = inner.dialogs.lock().expect("dialog table lock poisoned");
            if let Some(existing) = dialogs.get_mut(&call_id) {
                existing.confirm(&response);
                existing.make_ack(
                    invite_cseq,
                    &inner.via_sent_by,
                    inner.config.protocol.as_str(),
                )
            } else {
                match Dialog::from_uac_response(&invite_request, &response) {
                    Some(dialog) => {
                        let ack = dialog.make_ack(
                            invite_cseq,
                            &inner.via_sent_by,
                            inner.config.protocol.as_str(),
                        );
                        dialogs.insert(call_id.clone(), dialog);
                        ack
                    }
                    None => {
                        warn!(%call_id, "2xx without To-tag; no dialog created");
                        return;
                    }
                }
            }
        };
        if let Err(e) = inner
            .manager
            .send_outside_transaction(Message::Request(ack), inner.server_addr)
            .await
        {
            warn!("failed to send ACK: {}", e);
        }

        if let Some(sdp) = changed_sdp {
            inner.events.emit(&Event::SdpNegotiated {
                call_id: call_id.clone(),
                sdp,
            });
        }
    } else {
        // final failure: the transaction has already ACKed it
        let newly_failed = {
            let mut calls = inner.calls.lock().expect("call table lock poisoned");
            match calls.get_mut(&call_id) {
                Some(call) => {
                    call.last_response = Some(response.clone());
                    let advanced = call.advance(CallState::Failed);
                    if advanced {
                        call.terminated_by = call.terminated_by.or(Some(TerminatedBy::Local));
                    }
                    advanced
                }
                None => false,
            }
        };
        if newly_failed {
            if let Some(dialog) = inner
                .dialogs
                .lock()
                .expect("dialog table lock poisoned")
                .get_mut(&call_id)
            {
                dialog.terminate();
            }
            inner.events.emit(&Event::CallHangup {
                call_id,
                by_remote: false,
            });
        }
    }
}

fn on_bye_final(inner: &Arc<ClientInner>, response: &Response) {
    if !response.status.is_success() {
        return;
    }
    let Some(call_id) = response.call_id().map(str::to_string) else {
        return;
    };

    let newly_terminated = {
        let mut calls = inner.calls.lock().expect("call table lock poisoned");
        match calls.get_mut(&call_id) {
            Some(call) => {
                let advanced = call.advance(CallState::Terminated);
                if advanced {
                    call.terminated_by = call.terminated_by.or(Some(TerminatedBy::Local));
                }
                advanced
            }
            None => false,
        }
    };
    if let Some(dialog) = inner
        .dialogs
        .lock()
        .expect("dialog table lock poisoned")
        .get_mut(&call_id)
    {
        dialog.terminate();
    }
    if newly_terminated {
        inner.events.emit(&Event::CallHangup {
            call_id,
            by_remote: false,
        });
    }
}

async fn on_auth_challenge(
    inner: &Arc<ClientInner>,
    key: TransactionKey,
    response: Response,
    challenge: voxsip_sip_core::auth::DigestChallenge,
) {
    let pending = inner
        .pending
        .lock()
        .expect("pending lock poisoned")
        .remove(&key);
    let Some(op) = pending else {
        debug!(%key, "challenge for an operation nobody is waiting on");
        return;
    };

    let Some(credentials) = inner.config.credentials.clone() else {
        // no credentials: the 401/407 is the caller's final answer
        let _ = op.tx.send(OpOutcome::Final(response));
        return;
    };

    if op.attempted_auth && !challenge.stale {
        let _ = op.tx.send(OpOutcome::AuthFailed(challenge.realm.clone()));
        return;
    }

    let call_id = op.request.call_id().unwrap_or_default().to_string();
    let method = op.request.method.as_str().to_string();
    let nonce_count = {
        let mut counts = inner.nonce_counts.lock().expect("nonce lock poisoned");
        if challenge.stale {
            counts.reset(&call_id, &method);
        }
        counts.next(&call_id, &method)
    };

    let retry = match retry_request(
        &op.request,
        &challenge,
        &credentials,
        nonce_count,
        response.status,
    ) {
        Ok(retry) => retry,
        Err(e) => {
            let _ = op.tx.send(OpOutcome::AuthFailed(e.to_string()));
            return;
        }
    };

    // an INVITE retry changes the call's transaction identity
    if retry.method == Method::Invite {
        let mut calls = inner.calls.lock().expect("call table lock poisoned");
        if let Some(call) = calls.get_mut(&call_id) {
            call.invite_branch = retry.via_branch().unwrap_or_default();
            call.invite_cseq = retry.cseq().map(|c| c.seq).unwrap_or(call.invite_cseq);
            call.invite_request = retry.clone();
        }
    }

    let retry = {
        let mut context = HandlerContext {
            request: Some(retry.clone()),
            destination: Some(inner.server_addr),
            ..HandlerContext::default()
        };
        inner.handlers.on_request(retry, &mut context)
    };

    let Some(new_key) = TransactionKey::from_client_request(&retry) else {
        let _ = op.tx.send(OpOutcome::AuthFailed(challenge.realm.clone()));
        return;
    };
    inner.pending.lock().expect("pending lock poisoned").insert(
        new_key,
        PendingOp {
            tx: op.tx,
            request: retry.clone(),
            attempted_auth: true,
        },
    );
    debug!(%call_id, %method, nonce_count, "retrying with credentials");
    if let Err(e) = inner.manager.send_request(retry, inner.server_addr).await {
        warn!("credentialed retry failed to send: {}", e);
    }
}

async fn on_uas_request(
    inner: &Arc<ClientInner>,
    key: TransactionKey,
    request: Request,
    source: SocketAddr,
) {
    let user_agent = inner.config.user_agent.clone();
    match request.method {
        Method::Options => {
            let response = ResponseBuilder::from_request(&request, StatusCode::Ok, None)
                .header(HeaderName::Allow, ALLOW_METHODS)
                .header(HeaderName::Accept, ACCEPT_TYPES)
                .server(user_agent)
                .build();
            respond_logged(inner, &key, response).await;
        }
        Method::Bye => {
            on_remote_bye(inner, key, request).await;
        }
        Method::Cancel => {
            let response = ResponseBuilder::from_request(&request, StatusCode::Ok, None)
                .server(user_agent)
                .build();
            respond_logged(inner, &key, response).await;

            // the cancelled INVITE answers 487 (RFC 3261 §9.2)
            let invite_key = TransactionKey::new(
                key.branch.clone(),
                key.call_id.clone(),
                Method::Invite,
                true,
            );
            if let Some(invite) = inner.manager.original_request(&invite_key) {
                let terminated =
                    ResponseBuilder::from_request(&invite, StatusCode::RequestTerminated, None)
                        .to_tag(&generate_tag())
                        .build();
                respond_logged(inner, &invite_key, terminated).await;
            }
        }
        _ => {
            debug!(%source, method = %request.method, "unsupported inbound method");
            let response =
                ResponseBuilder::from_request(&request, StatusCode::NotImplemented, None)
                    .server(user_agent)
                    .build();
            respond_logged(inner, &key, response).await;
        }
    }
}

async fn on_remote_bye(inner: &Arc<ClientInner>, key: TransactionKey, request: Request) {
    let call_id = request.call_id().unwrap_or_default().to_string();

    // CSeq discipline on the dialog, when we know it
    let rejected_response = if let Some(cseq) = request.cseq() {
        let mut dialogs = inner.dialogs.lock().expect("dialog table lock poisoned");
        if let Some(dialog) = dialogs.get_mut(&call_id) {
            if let Err(e) = dialog.check_remote_cseq(cseq.seq) {
                warn!(%call_id, "BYE rejected: {}", e);
                Some(
                    ResponseBuilder::from_request(&request, StatusCode::ServerInternalError, None)
                        .build(),
                )
            } else {
                dialog.terminate();
                None
            }
        } else {
            None
        }
    } else {
        None
    };

    if let Some(response) = rejected_response {
        respond_logged(inner, &key, response).await;
        return;
    }

    let known_call = {
        let mut calls = inner.calls.lock().expect("call table lock poisoned");
        match calls.get_mut(&call_id) {
            Some(call) => {
                let advanced = call.advance(CallState::Terminated);
                let first_remote = call.terminated_by != Some(TerminatedBy::Remote);
                call.terminated_by = Some(TerminatedBy::Remote);
                Some(advanced && first_remote)
            }
            None => None,
        }
    };

    match known_call {
        Some(newly_terminated) => {
            let response = ResponseBuilder::from_request(&request, StatusCode::Ok, None)
                .server(inner.config.user_agent.clone())
                .build();
            respond_logged(inner, &key, response).await;
            if newly_terminated {
                inner.events.emit(&Event::CallHangup {
                    call_id,
                    by_remote: true,
                });
            }
        }
        None => {
            // no such dialog here
            let response = ResponseBuilder::from_request(
                &request,
                StatusCode::CallOrTransactionDoesNotExist,
                None,
            )
            .build();
            respond_logged(inner, &key, response).await;
        }
    }
}

async fn on_stray_request(inner: &Arc<ClientInner>, request: Request, source: SocketAddr) {
    if request.method == Method::Ack {
        // the peer ACKing our 200; answer per the minimal-UAS contract
        let response = ResponseBuilder::from_request(&request, StatusCode::Ok, None).build();
        if let Err(e) = inner
            .manager
            .send_outside_transaction(Message::Response(response), source)
            .await
        {
            debug!("could not answer stray ACK: {}", e);
        }
    } else {
        debug!(%source, method = %request.method, "stray request ignored");
    }
}

async fn respond_logged(inner: &Arc<ClientInner>, key: &TransactionKey, response: Response) {
    if let Err(e) = inner.manager.respond(key, response).await {
        warn!(%key, "failed to respond: {}", e);
    }
}

fn fail_call_by_id(inner: &Arc<ClientInner>, call_id: &str) {
    let mut calls = inner.calls.lock().expect("call table lock poisoned");
    if let Some(call) = calls.get_mut(call_id) {
        call.advance(CallState::Failed);
        call.terminated_by = call.terminated_by.or(Some(TerminatedBy::Local));
    }
}

fn resolve_pending(inner: &Arc<ClientInner>, key: &TransactionKey, outcome: OpOutcome) {
    let op = inner
        .pending
        .lock()
        .expect("pending lock poisoned")
        .remove(key);
    if let Some(op) = op {
        let _ = op.tx.send(outcome);
    }
}
