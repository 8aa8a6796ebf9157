//! UDP transport: one datagram, one SIP message.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::transport::{looks_like_response, Transport, TransportEvent, TransportKind};
use crate::waiters::ResponseWaiters;

// Default channel capacity
const DEFAULT_CHANNEL_CAPACITY: usize = 100;

// Largest datagram we accept; SIP over UDP should stay under the MTU but
// fragmented jumbo datagrams exist in the wild.
const MAX_DATAGRAM: usize = 65_535;

/// UDP transport for SIP messages
#[derive(Clone)]
pub struct UdpTransport {
    inner: Arc<UdpTransportInner>,
}

struct UdpTransportInner {
    socket: Arc<UdpSocket>,
    closed: AtomicBool,
    events_tx: mpsc::Sender<TransportEvent>,
    waiters: ResponseWaiters,
}

impl UdpTransport {
    /// Binds a UDP transport and starts its receive loop.
    ///
    /// Returns the transport plus the receiver for inbound frames.
    pub async fn bind(
        addr: SocketAddr,
        channel_capacity: Option<usize>,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let capacity = channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(capacity);

        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| Error::Bind { addr, source })?;
        let local_addr = socket.local_addr()?;
        info!("SIP UDP transport bound to {}", local_addr);

        let transport = UdpTransport {
            inner: Arc::new(UdpTransportInner {
                socket: Arc::new(socket),
                closed: AtomicBool::new(false),
                events_tx,
                waiters: ResponseWaiters::new(),
            }),
        };

        transport.spawn_receive_loop();

        Ok((transport, events_rx))
    }

    // Receives datagrams and fans them out to waiters and the event channel
    fn spawn_receive_loop(&self) {
        let transport = self.clone();

        tokio::spawn(async move {
            let inner = &transport.inner;
            let mut buf = vec![0u8; MAX_DATAGRAM];

            while !inner.closed.load(Ordering::Relaxed) {
                let (len, source) = match inner.socket.recv_from(&mut buf).await {
                    Ok(received) => received,
                    Err(e) => {
                        if inner.closed.load(Ordering::Relaxed) {
                            break;
                        }
                        error!("Error receiving UDP datagram: {}", e);
                        let _ = inner
                            .events_tx
                            .send(TransportEvent::Error {
                                error: format!("recv failed: {}", e),
                            })
                            .await;
                        continue;
                    }
                };

                if len == 0 {
                    continue;
                }
                let frame = Bytes::copy_from_slice(&buf[..len]);
                debug!(%source, bytes = len, "received UDP datagram");

                if looks_like_response(&frame) {
                    inner.waiters.deliver(source, frame.clone());
                }

                let event = TransportEvent::MessageReceived {
                    bytes: frame,
                    source,
                    kind: TransportKind::Udp,
                };
                if inner.events_tx.send(event).await.is_err() {
                    warn!("transport event receiver dropped; stopping UDP loop");
                    break;
                }
            }

            let _ = inner.events_tx.send(TransportEvent::Closed).await;
            info!("UDP receive loop terminated");
        });
    }
}

#[async_trait::async_trait]
impl Transport for UdpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Udp
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.socket.local_addr()?)
    }

    async fn send(&self, bytes: Bytes, destination: SocketAddr) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        debug!(%destination, bytes = bytes.len(), "sending UDP datagram");
        self.inner
            .socket
            .send_to(&bytes, destination)
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
            // waiter is dropped here, so delivery will skip it
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
        self.inner.waiters.fail_all();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.socket.local_addr() {
            Ok(addr) => write!(f, "UdpTransport({})", addr),
            Err(_) => write!(f, "UdpTransport(<unbound>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn bind_pair() -> (
        UdpTransport,
        mpsc::Receiver<TransportEvent>,
        UdpTransport,
        mpsc::Receiver<TransportEvent>,
    ) {
        let (a, a_rx) = UdpTransport::bind("127.0.0.1:0".parse().unwrap(), None)
            .await
            .unwrap();
        let (b, b_rx) = UdpTransport::bind("127.0.0.1:0".parse().unwrap(), None)
            .await
            .unwrap();
        (a, a_rx, b, b_rx)
    }

    #[tokio::test]
    async fn datagram_round_trip() {
        let (a, _a_rx, b, mut b_rx) = bind_pair().await;
        let payload = Bytes::from_static(b"OPTIONS sip:x@y SIP/2.0\r\nContent-Length: 0\r\n\r\n");
        a.send(payload.clone(), b.local_addr().unwrap())
            .await
            .unwrap();

        match b_rx.recv().await.unwrap() {
            TransportEvent::MessageReceived { bytes, kind, .. } => {
                assert_eq!(bytes, payload);
                assert_eq!(kind, TransportKind::Udp);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn send_and_wait_gets_response_and_event() {
        let (a, mut a_rx, b, mut b_rx) = bind_pair().await;
        let b_addr = b.local_addr().unwrap();

        let request = Bytes::from_static(b"OPTIONS sip:x@y SIP/2.0\r\nContent-Length: 0\r\n\r\n");
        let response = Bytes::from_static(b"SIP/2.0 200 OK\r\nContent-Length: 0\r\n\r\n");

        let responder = tokio::spawn({
            let b = b.clone();
            let response = response.clone();
            async move {
                let event = b_rx.recv().await.unwrap();
                let source = match event {
                    TransportEvent::MessageReceived { source, .. } => source,
                    other => panic!("unexpected event: {:?}", other),
                };
                b.send(response, source).await.unwrap();
            }
        });

        let got = a
            .send_and_wait(request, b_addr, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(got, response);
        responder.await.unwrap();

        // the response still reaches the event channel
        match a_rx.recv().await.unwrap() {
            TransportEvent::MessageReceived { bytes, .. } => assert_eq!(bytes, response),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn send_and_wait_times_out() {
        let (a, _a_rx, b, _b_rx) = bind_pair().await;
        let err = a
            .send_and_wait(
                Bytes::from_static(b"OPTIONS sip:x@y SIP/2.0\r\n\r\n"),
                b.local_addr().unwrap(),
                Duration::from_millis(50),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[tokio::test]
    async fn closed_transport_rejects_sends() {
        let (a, _a_rx, b, _b_rx) = bind_pair().await;
        a.close().await.unwrap();
        let err = a
            .send(Bytes::from_static(b"x"), b.local_addr().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Closed));
    }
}
