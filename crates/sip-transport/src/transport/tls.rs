//! TLS transport: SIP over rustls, framed like TCP.
//!
//! Certificate policy is the embedder's business: the client side takes a
//! ready-made `rustls::ClientConfig`, the server side an optional
//! `TlsAcceptor`. A transport built without an acceptor is outbound-only.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rustls::{ClientConfig, ServerName};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::transport::stream::{spawn_reader, StreamConnections};
use crate::transport::{Transport, TransportEvent, TransportKind};
use crate::waiters::ResponseWaiters;

const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// TLS transport for SIP messages
#[derive(Clone)]
pub struct TlsTransport {
    inner: Arc<TlsTransportInner>,
}

struct TlsTransportInner {
    local_addr: SocketAddr,
    connector: TlsConnector,
    connections: Arc<StreamConnections>,
    waiters: Arc<ResponseWaiters>,
    events_tx: mpsc::Sender<TransportEvent>,
    closed: Arc<AtomicBool>,
    // SNI names to present per destination; falls back to the IP literal
    server_names: Mutex<std::collections::HashMap<SocketAddr, String>>,
}

impl TlsTransport {
    /// Binds a TLS transport.
    ///
    /// `client_config` drives outbound handshakes (and with it, whatever
    /// verification policy the embedder chose). With `acceptor = None` the
    /// listener port still binds but inbound handshakes are refused.
    pub async fn bind(
        addr: SocketAddr,
        client_config: Arc<ClientConfig>,
        acceptor: Option<TlsAcceptor>,
        channel_capacity: Option<usize>,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let capacity = channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(capacity);

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| Error::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;
        info!("SIP TLS transport bound to {}", local_addr);

        let transport = TlsTransport {
            inner: Arc::new(TlsTransportInner {
                local_addr,
                connector: TlsConnector::from(client_config),
                connections: Arc::new(StreamConnections::new()),
                waiters: Arc::new(ResponseWaiters::new()),
                events_tx,
                closed: Arc::new(AtomicBool::new(false)),
                server_names: Mutex::new(std::collections::HashMap::new()),
            }),
        };

        transport.spawn_accept_loop(listener, acceptor);

        Ok((transport, events_rx))
    }

    /// Pins the SNI name presented when connecting to `peer`.
    ///
    /// Without a pin the peer's IP literal is used, which most certificate
    /// policies will refuse.
    pub async fn set_server_name(&self, peer: SocketAddr, name: impl Into<String>) {
        self.inner.server_names.lock().await.insert(peer, name.into());
    }

    fn spawn_accept_loop(&self, listener: TcpListener, acceptor: Option<TlsAcceptor>) {
        let inner = self.inner.clone();

        tokio::spawn(async move {
            while !inner.closed.load(Ordering::Relaxed) {
                let (stream, peer) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        if inner.closed.load(Ordering::Relaxed) {
                            break;
                        }
                        warn!("TLS accept failed: {}", e);
                        continue;
                    }
                };
                let Some(acceptor) = acceptor.clone() else {
                    debug!(%peer, "no TLS acceptor configured; dropping inbound connection");
                    continue;
                };
                let inner = inner.clone();
                tokio::spawn(async move {
                    let tls_stream = match acceptor.accept(stream).await {
                        Ok(tls) => tls,
                        Err(e) => {
                            warn!(%peer, "TLS handshake failed: {}", e);
                            return;
                        }
                    };
                    debug!(%peer, "accepted TLS connection");
                    let (read_half, write_half) = tokio::io::split(tls_stream);
                    inner.connections.insert(peer, Box::new(write_half)).await;
                    spawn_reader(
                        read_half,
                        peer,
                        TransportKind::Tls,
                        inner.events_tx.clone(),
                        inner.waiters.clone(),
                        inner.connections.clone(),
                        inner.closed.clone(),
                    );
                });
            }
            let _ = inner.events_tx.send(TransportEvent::Closed).await;
            info!("TLS accept loop terminated");
        });
    }

    async fn ensure_connection(
        &self,
        peer: SocketAddr,
    ) -> Result<Arc<Mutex<super::stream::BoxedWriter>>> {
        if let Some(writer) = self.inner.connections.get(&peer).await {
            return Ok(writer);
        }

        let name = {
            let names = self.inner.server_names.lock().await;
            names
                .get(&peer)
                .cloned()
                .unwrap_or_else(|| peer.ip().to_string())
        };
        let server_name = ServerName::try_from(name.as_str())
            .map_err(|_| Error::Resolve(format!("bad TLS server name: {}", name)))?;

        debug!(%peer, sni = %name, "establishing TLS connection");
        let tcp = TcpStream::connect(peer)
            .await
            .map_err(|source| Error::Connect { addr: peer, source })?;
        let tls_stream = self
            .inner
            .connector
            .connect(server_name, tcp)
            .await
            .map_err(|source| Error::Connect {
                addr: peer,
                source,
            })?;

        let (read_half, write_half) = tokio::io::split(tls_stream);
        let writer = self.inner.connections.insert(peer, Box::new(write_half)).await;
        spawn_reader(
            read_half,
            peer,
            TransportKind::Tls,
            self.inner.events_tx.clone(),
            self.inner.waiters.clone(),
            self.inner.connections.clone(),
            self.inner.closed.clone(),
        );
        Ok(writer)
    }
}

#[async_trait::async_trait]
impl Transport for TlsTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Tls
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr)
    }

    async fn send(&self, bytes: Bytes, destination: SocketAddr) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let writer = self.ensure_connection(destination).await?;
        let mut writer = writer.lock().await;
        debug!(%destination, bytes = bytes.len(), "sending on TLS connection");
        writer
            .write_all(&bytes)
            .await
            .map_err(|source| Error::Write {
                addr: destination,
                source,
            })?;
        Ok(())
    }

    async fn send_and_wait(
        &self,
        bytes: Bytes,
        destination: SocketAddr,
        timeout: Duration,
    ) -> Result<Bytes> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let waiter = self.inner.waiters.register(destination);
        if let Err(e) = self.send(bytes, destination).await {
            return Err(e);
        }
        match tokio::time::timeout(timeout, waiter).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(_)) => Err(Error::Closed),
            Err(_) => Err(Error::Timeout(destination)),
        }
    }

    async fn close(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::Relaxed);
        self.inner.connections.clear().await;
        self.inner.waiters.fail_all();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for TlsTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TlsTransport({})", self.inner.local_addr)
    }
}
