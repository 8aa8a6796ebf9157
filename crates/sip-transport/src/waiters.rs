//! Pending-response waiters.
//!
//! A caller that sends a request and wants the next response from that peer
//! registers a waiter before sending. Waiters are FIFO per peer address;
//! delivery hands the frame to the first live waiter and leaves the event
//! channel delivery untouched, so the transaction layer always sees the
//! message too.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Mutex;

use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::debug;

/// FIFO response waiters keyed by peer address
#[derive(Debug, Default)]
pub struct ResponseWaiters {
    pending: Mutex<HashMap<SocketAddr, VecDeque<oneshot::Sender<Bytes>>>>,
}

impl ResponseWaiters {
    /// Creates an empty waiter table
    pub fn new() -> Self {
        ResponseWaiters {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a waiter for the next response from `peer`.
    ///
    /// Dropping the returned receiver (e.g. on timeout) cancels the waiter;
    /// delivery skips dead senders.
    pub fn register(&self, peer: SocketAddr) -> oneshot::Receiver<Bytes> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("waiter lock poisoned")
            .entry(peer)
            .or_default()
            .push_back(tx);
        rx
    }

    /// Delivers a frame to the first live waiter for `peer`.
    ///
    /// Returns true when a waiter consumed it.
    pub fn deliver(&self, peer: SocketAddr, frame: Bytes) -> bool {
        let mut pending = self.pending.lock().expect("waiter lock poisoned");
        let Some(queue) = pending.get_mut(&peer) else {
            return false;
        };
        let mut delivered = false;
        while let Some(waiter) = queue.pop_front() {
            match waiter.send(frame.clone()) {
                Ok(()) => {
                    delivered = true;
                    break;
                }
                // receiver already dropped (timed out); try the next one
                Err(_) => continue,
            }
        }
        if queue.is_empty() {
            pending.remove(&peer);
        }
        if delivered {
            debug!(%peer, "delivered response to waiter");
        }
        delivered
    }

    /// Drops every waiter for `peer`; their receivers observe a closed
    /// channel. Used when a connection dies.
    pub fn fail_peer(&self, peer: SocketAddr) {
        if let Some(queue) = self
            .pending
            .lock()
            .expect("waiter lock poisoned")
            .remove(&peer)
        {
            debug!(%peer, waiters = queue.len(), "failing waiters for dead peer");
        }
    }

    /// Drops every waiter on the transport (shutdown path)
    pub fn fail_all(&self) {
        self.pending.lock().expect("waiter lock poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[tokio::test]
    async fn fifo_delivery_per_peer() {
        let waiters = ResponseWaiters::new();
        let first = waiters.register(addr(5060));
        let second = waiters.register(addr(5060));

        assert!(waiters.deliver(addr(5060), Bytes::from_static(b"one")));
        assert!(waiters.deliver(addr(5060), Bytes::from_static(b"two")));

        assert_eq!(first.await.unwrap(), Bytes::from_static(b"one"));
        assert_eq!(second.await.unwrap(), Bytes::from_static(b"two"));
    }

    #[tokio::test]
    async fn no_waiter_means_not_consumed() {
        let waiters = ResponseWaiters::new();
        assert!(!waiters.deliver(addr(5060), Bytes::from_static(b"x")));
    }

    #[tokio::test]
    async fn dead_waiters_skipped() {
        let waiters = ResponseWaiters::new();
        let dead = waiters.register(addr(5060));
        drop(dead);
        let live = waiters.register(addr(5060));

        assert!(waiters.deliver(addr(5060), Bytes::from_static(b"frame")));
        assert_eq!(live.await.unwrap(), Bytes::from_static(b"frame"));
    }

    #[tokio::test]
    async fn fail_peer_closes_receivers() {
        let waiters = ResponseWaiters::new();
        let rx = waiters.register(addr(5060));
        waiters.fail_peer(addr(5060));
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn peers_are_independent() {
        let waiters = ResponseWaiters::new();
        let a = waiters.register(addr(5060));
        let _b = waiters.register(addr(5062));

        assert!(waiters.deliver(addr(5060), Bytes::from_static(b"for-a")));
        assert!(!waiters.deliver(addr(5064), Bytes::from_static(b"nobody")));
        assert_eq!(a.await.unwrap(), Bytes::from_static(b"for-a"));
    }
}
