//! TCP transport: Content-Length framed SIP over a stream.
//!
//! Inbound connections come from an accept loop on the bound listener;
//! outbound connections are established lazily on first send to a peer and
//! cached. A dead connection is dropped on read error and re-established by
//! the next send.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::transport::stream::{spawn_reader, StreamConnections};
use crate::transport::{Transport, TransportEvent, TransportKind};
use crate::waiters::ResponseWaiters;

const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// TCP transport for SIP messages
#[derive(Clone)]
pub struct TcpTransport {
    inner: Arc<TcpTransportInner>,
}

struct TcpTransportInner {
    local_addr: SocketAddr,
    connections: Arc<StreamConnections>,
    waiters: Arc<ResponseWaiters>,
    events_tx: mpsc::Sender<TransportEvent>,
    closed: Arc<AtomicBool>,
}

impl TcpTransport {
    /// Binds a listener and starts accepting inbound connections.
    pub async fn bind(
        addr: SocketAddr,
        channel_capacity: Option<usize>,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let capacity = channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(capacity);

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| Error::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;
        info!("SIP TCP transport bound to {}", local_addr);

        let transport = TcpTransport {
            inner: Arc::new(TcpTransportInner {
                local_addr,
                connections: Arc::new(StreamConnections::new()),
                waiters: Arc::new(ResponseWaiters::new()),
                events_tx,
                closed: Arc::new(AtomicBool::new(false)),
            }),
        };

        transport.spawn_accept_loop(listener);

        Ok((transport, events_rx))
    }

    fn spawn_accept_loop(&self, listener: TcpListener) {
        let inner = self.inner.clone();

        tokio::spawn(async move {
            while !inner.closed.load(Ordering::Relaxed) {
                let (stream, peer) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        if inner.closed.load(Ordering::Relaxed) {
                            break;
                        }
                        warn!("TCP accept failed: {}", e);
                        continue;
                    }
                };
                debug!(%peer, "accepted TCP connection");
                let (read_half, write_half) = stream.into_split();
                inner.connections.insert(peer, Box::new(write_half)).await;
                spawn_reader(
                    read_half,
                    peer,
                    TransportKind::Tcp,
                    inner.events_tx.clone(),
                    inner.waiters.clone(),
                    inner.connections.clone(),
                    inner.closed.clone(),
                );
            }
            let _ = inner.events_tx.send(TransportEvent::Closed).await;
            info!("TCP accept loop terminated");
        });
    }

    /// Returns the write handle for `peer`, connecting if necessary
    async fn ensure_connection(
        &self,
        peer: SocketAddr,
    ) -> Result<Arc<tokio::sync::Mutex<super::stream::BoxedWriter>>> {
        if let Some(writer) = self.inner.connections.get(&peer).await {
            return Ok(writer);
        }

        debug!(%peer, "establishing TCP connection");
        let stream = TcpStream::connect(peer)
            .await
            .map_err(|source| Error::Connect { addr: peer, source })?;
        let (read_half, write_half) = stream.into_split();
        let writer = self.inner.connections.insert(peer, Box::new(write_half)).await;
        spawn_reader(
            read_half,
            peer,
            TransportKind::Tcp,
            self.inner.events_tx.clone(),
            self.inner.waiters.clone(),
            self.inner.connections.clone(),
            self.inner.closed.clone(),
        );
        Ok(writer)
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
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
        debug!(%destination, bytes = bytes.len(), "sending on TCP connection");
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

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TcpTransport({})", self.inner.local_addr)
    }
}
