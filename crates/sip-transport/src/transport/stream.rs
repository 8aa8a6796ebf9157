//! Shared plumbing for stream transports (TCP and TLS).
//!
//! Both transports keep a registry of live connections keyed by peer
//! address, write through a locked write half, and run one reader task per
//! connection that feeds a [`SipFramer`] and fans complete frames out to
//! waiters and the event channel.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::framing::SipFramer;
use crate::transport::{looks_like_response, TransportEvent, TransportKind};
use crate::waiters::ResponseWaiters;

/// Type-erased write half of a stream connection
pub(crate) type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Registry of live stream connections keyed by peer address
#[derive(Default)]
pub(crate) struct StreamConnections {
    writers: Mutex<HashMap<SocketAddr, Arc<Mutex<BoxedWriter>>>>,
}

impl StreamConnections {
    pub(crate) fn new() -> Self {
        StreamConnections::default()
    }

    pub(crate) async fn get(&self, peer: &SocketAddr) -> Option<Arc<Mutex<BoxedWriter>>> {
        self.writers.lock().await.get(peer).cloned()
    }

    pub(crate) async fn insert(&self, peer: SocketAddr, writer: BoxedWriter) -> Arc<Mutex<BoxedWriter>> {
        let writer = Arc::new(Mutex::new(writer));
        self.writers.lock().await.insert(peer, writer.clone());
        info!(%peer, "registered stream connection");
        writer
    }

    pub(crate) async fn remove(&self, peer: &SocketAddr) {
        if self.writers.lock().await.remove(peer).is_some() {
            info!(%peer, "unregistered stream connection");
        }
    }

    pub(crate) async fn clear(&self) {
        self.writers.lock().await.clear();
    }
}

/// Spawns the read loop for one stream connection.
///
/// Frames are delivered to waiters (responses only) and the event channel.
/// EOF or a read error tears the connection down: the writer is dropped from
/// the registry and the peer's waiters are failed.
pub(crate) fn spawn_reader<R>(
    mut reader: R,
    peer: SocketAddr,
    kind: TransportKind,
    events_tx: mpsc::Sender<TransportEvent>,
    waiters: Arc<ResponseWaiters>,
    connections: Arc<StreamConnections>,
    closed: Arc<AtomicBool>,
) where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut framer = SipFramer::new();
        let mut buf = vec![0u8; 8192];

        loop {
            if closed.load(Ordering::Relaxed) {
                break;
            }
            let len = match reader.read(&mut buf).await {
                Ok(0) => {
                    debug!(%peer, "stream closed by peer");
                    break;
                }
                Ok(len) => len,
                Err(e) => {
                    if !closed.load(Ordering::Relaxed) {
                        warn!(%peer, "stream read failed: {}", e);
                        let _ = events_tx
                            .send(TransportEvent::Error {
                                error: format!("read from {} failed: {}", peer, e),
                            })
                            .await;
                    }
                    break;
                }
            };

            framer.push(&buf[..len]);
            while let Some(frame) = framer.next_frame() {
                deliver_frame(frame, peer, kind, &events_tx, &waiters).await;
            }
        }

        connections.remove(&peer).await;
        waiters.fail_peer(peer);
    });
}

async fn deliver_frame(
    frame: Bytes,
    peer: SocketAddr,
    kind: TransportKind,
    events_tx: &mpsc::Sender<TransportEvent>,
    waiters: &ResponseWaiters,
) {
    debug!(%peer, bytes = frame.len(), "received {} frame", kind);
    if looks_like_response(&frame) {
        waiters.deliver(peer, frame.clone());
    }
    let _ = events_tx
        .send(TransportEvent::MessageReceived {
            bytes: frame,
            source: peer,
            kind,
        })
        .await;
}
