//! Client configuration.

use std::net::SocketAddr;

use voxsip_dialog_core::TimerSettings;
use voxsip_sip_core::auth::DigestCredentials;

/// Which transport the client binds by default
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// UDP (the SIP default)
    Udp,
    /// TCP with Content-Length framing
    Tcp,
}

impl Protocol {
    /// Token used in Via headers
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Udp => "UDP",
            Protocol::Tcp => "TCP",
        }
    }
}

/// Configuration for [`Client`](crate::Client), built fluently:
///
/// ```rust
/// use voxsip_sip_client::{ClientConfig, Protocol};
///
/// let config = ClientConfig::new("sip.example.com", 5060)
///     .protocol(Protocol::Udp)
///     .identity("alice")
///     .display_name("Alice")
///     .user_agent("voxsip/0.1")
///     .credentials("alice", "secret");
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server / peer host (name or IP literal)
    pub server_host: String,
    /// Server / peer port
    pub server_port: u16,
    /// Transport to bind
    pub protocol: Protocol,
    /// Local address to bind; `None` binds `0.0.0.0:0`
    pub local_addr: Option<SocketAddr>,
    /// User part of our local URI
    pub identity: String,
    /// Display name used in From headers
    pub display_name: Option<String>,
    /// Default request target when an operation gets no URI;
    /// defaults to `sip:<server_host>:<server_port>`
    pub remote_uri: Option<String>,
    /// User-Agent / Server header value
    pub user_agent: String,
    /// Digest credentials for 401/407 retries
    pub credentials: Option<DigestCredentials>,
    /// Transaction timer settings (tests shrink these)
    pub timers: TimerSettings,
}

impl ClientConfig {
    /// Starts a configuration for a peer at `host:port`
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        ClientConfig {
            server_host: host.into(),
            server_port: port,
            protocol: Protocol::Udp,
            local_addr: None,
            identity: "voxsip".to_string(),
            display_name: None,
            remote_uri: None,
            user_agent: "voxsip/0.1".to_string(),
            credentials: None,
            timers: TimerSettings::default(),
        }
    }

    /// Sets the transport protocol
    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Binds to a specific local address instead of `0.0.0.0:0`
    pub fn local_addr(mut self, addr: SocketAddr) -> Self {
        self.local_addr = Some(addr);
        self
    }

    /// Sets the user part of the local URI
    pub fn identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    /// Sets the From display name
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Sets the default request target
    pub fn remote_uri(mut self, uri: impl Into<String>) -> Self {
        self.remote_uri = Some(uri.into());
        self
    }

    /// Sets the User-Agent header value
    pub fn user_agent(mut self, value: impl Into<String>) -> Self {
        self.user_agent = value.into();
        self
    }

    /// Sets digest credentials for transparent 401/407 retries
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(DigestCredentials::new(username, password));
        self
    }

    /// Overrides the transaction timer settings
    pub fn timers(mut self, timers: TimerSettings) -> Self {
        self.timers = timers;
        self
    }

    /// The default request target
    pub fn default_remote_uri(&self) -> String {
        self.remote_uri
            .clone()
            .unwrap_or_else(|| format!("sip:{}:{}", self.server_host, self.server_port))
    }
}
