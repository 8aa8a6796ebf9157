//! Manager-level transaction tests over a mock transport: timer-driven
//! retransmission, timeouts, ACK generation, branch matching, and the
//! digest-challenge path.

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::Mutex;

use voxsip_dialog_core::{TimerSettings, TransactionEvent, TransactionManager};
use voxsip_sip_core::prelude::*;
use voxsip_sip_transport::{Transport, TransportKind};

/// Records outbound frames instead of writing to a socket
#[derive(Debug, Clone)]
struct MockTransport {
    local_addr: SocketAddr,
    sent: Arc<Mutex<Vec<(Bytes, SocketAddr)>>>,
}

impl MockTransport {
    fn new(addr: &str) -> Self {
        MockTransport {
            local_addr: SocketAddr::from_str(addr).unwrap(),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    async fn sent_messages(&self) -> Vec<Message> {
        self.sent
            .lock()
            .await
            .iter()
            .map(|(bytes, _)| parse_message(bytes).unwrap())
            .collect()
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Udp
    }

    fn local_addr(&self) -> voxsip_sip_transport::Result<SocketAddr> {
        Ok(self.local_addr)
    }

    async fn send(&self, bytes: Bytes, destination: SocketAddr) -> voxsip_sip_transport::Result<()> {
        self.sent.lock().await.push((bytes, destination));
        Ok(())
    }

    async fn send_and_wait(
        &self,
        bytes: Bytes,
        destination: SocketAddr,
        _timeout: Duration,
    ) -> voxsip_sip_transport::Result<Bytes> {
        self.sent.lock().await.push((bytes, destination));
        Err(voxsip_sip_transport::Error::Timeout(destination))
    }

    async fn close(&self) -> voxsip_sip_transport::Result<()> {
        Ok(())
    }

    fn is_closed(&self) -> bool {
        false
    }
}

fn peer() -> SocketAddr {
    "192.0.2.9:5060".parse().unwrap()
}

fn test_invite(branch: &str) -> Request {
    RequestBuilder::new(Method::Invite, "sip:bob@192.0.2.9")
        .unwrap()
        .via("10.0.0.1:5060", "UDP", Some(branch))
        .from("Alice", "sip:alice@10.0.0.1", Some("alice-tag"))
        .to("Bob", "sip:bob@192.0.2.9", None)
        .call_id("mgr-test-call")
        .cseq(101)
        .max_forwards(70)
        .build()
}

fn setup() -> (
    Arc<MockTransport>,
    TransactionManager,
    mpsc::Receiver<TransactionEvent>,
) {
    let transport = Arc::new(MockTransport::new("10.0.0.1:5060"));
    let (manager, events) = TransactionManager::new(transport.clone(), TimerSettings::fast());
    (transport, manager, events)
}

async fn next_event(events: &mut mpsc::Receiver<TransactionEvent>) -> TransactionEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for transaction event")
        .expect("event channel closed")
}

#[tokio::test]
async fn invite_retransmits_until_provisional() {
    let (transport, manager, mut events) = setup();
    let key = manager.send_request(test_invite("z9hG4bKrtx"), peer()).await.unwrap();

    // fast timers: allow a few Timer A firings
    tokio::time::sleep(Duration::from_millis(120)).await;
    let before = transport.sent_messages().await.len();
    assert!(before >= 2, "expected retransmissions, saw {}", before);

    // a 180 stops retransmission
    let request = test_invite("z9hG4bKrtx");
    let ringing = ResponseBuilder::from_request(&request, StatusCode::Ringing, None)
        .to_tag("bob-1")
        .build();
    manager
        .handle_frame(&ringing.to_bytes(), peer(), TransportKind::Udp)
        .await;

    match next_event(&mut events).await {
        TransactionEvent::Provisional { key: event_key, response } => {
            assert_eq!(event_key, key);
            assert_eq!(response.status, StatusCode::Ringing);
        }
        other => panic!("unexpected event: {:?}", other),
    }

    tokio::time::sleep(Duration::from_millis(150)).await;
    let after_stop = transport.sent_messages().await.len();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(after_stop, transport.sent_messages().await.len());
}

#[tokio::test]
async fn invite_timer_b_times_out_and_cleans_table() {
    let (_transport, manager, mut events) = setup();
    let key = manager
        .send_request(test_invite("z9hG4bKtmo"), peer())
        .await
        .unwrap();
    assert_eq!(manager.active_transactions(), 1);

    // 64 * 20ms = 1.28s
    loop {
        match next_event(&mut events).await {
            TransactionEvent::TimedOut { key: event_key } => {
                assert_eq!(event_key, key);
                break;
            }
            TransactionEvent::Terminated { .. } => continue,
            other => panic!("unexpected event: {:?}", other),
        }
    }

    // Terminated + destroyed
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(manager.active_transactions(), 0);
}

#[tokio::test]
async fn non_2xx_final_is_acked_in_transaction() {
    let (transport, manager, mut events) = setup();
    manager
        .send_request(test_invite("z9hG4bK487"), peer())
        .await
        .unwrap();

    let request = test_invite("z9hG4bK487");
    let terminated = ResponseBuilder::from_request(&request, StatusCode::RequestTerminated, None)
        .to_tag("bob-2")
        .build();
    manager
        .handle_frame(&terminated.to_bytes(), peer(), TransportKind::Udp)
        .await;

    loop {
        match next_event(&mut events).await {
            TransactionEvent::Failure { response, .. } => {
                assert_eq!(response.status, StatusCode::RequestTerminated);
                break;
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    let sent = transport.sent_messages().await;
    let ack = sent
        .iter()
        .filter_map(|m| m.as_request())
        .find(|r| r.method == Method::Ack)
        .expect("no ACK sent");
    // in-transaction ACK: same branch as the INVITE, CSeq number reused
    assert_eq!(ack.via_branch().as_deref(), Some("z9hG4bK487"));
    assert_eq!(ack.cseq().unwrap().seq, 101);
    assert_eq!(ack.to_tag().as_deref(), Some("bob-2"));
}

#[tokio::test]
async fn response_with_unknown_branch_is_stray() {
    let (_transport, manager, mut events) = setup();
    manager
        .send_request(test_invite("z9hG4bKreal"), peer())
        .await
        .unwrap();

    let impostor = test_invite("z9hG4bKother");
    let ok = ResponseBuilder::from_request(&impostor, StatusCode::Ok, None)
        .to_tag("x")
        .build();
    manager
        .handle_frame(&ok.to_bytes(), peer(), TransportKind::Udp)
        .await;

    match next_event(&mut events).await {
        TransactionEvent::StrayResponse { response, .. } => {
            assert_eq!(response.status, StatusCode::Ok);
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn malformed_frame_leaves_table_untouched() {
    let (_transport, manager, _events) = setup();
    manager
        .send_request(test_invite("z9hG4bKmal"), peer())
        .await
        .unwrap();
    assert_eq!(manager.active_transactions(), 1);

    // Content-Length lies: 10 declared, 4 present
    let bogus = b"SIP/2.0 200 OK\r\nVia: SIP/2.0/UDP h;branch=z9hG4bKmal\r\nCall-ID: mgr-test-call\r\nCSeq: 101 INVITE\r\nContent-Length: 10\r\n\r\nabcd";
    manager
        .handle_frame(bogus, peer(), TransportKind::Udp)
        .await;

    assert_eq!(manager.active_transactions(), 1);
}

#[tokio::test]
async fn challenge_surfaces_as_auth_event() {
    let (_transport, manager, mut events) = setup();
    let register = RequestBuilder::new(Method::Register, "sip:192.0.2.9")
        .unwrap()
        .via("10.0.0.1:5060", "UDP", Some("z9hG4bKreg"))
        .from("", "sip:user@192.0.2.9", Some("ft"))
        .to("", "sip:user@192.0.2.9", None)
        .call_id("reg-call")
        .cseq(1)
        .build();
    let key = manager.send_request(register.clone(), peer()).await.unwrap();

    let mut challenge = ResponseBuilder::from_request(&register, StatusCode::Unauthorized, None)
        .to_tag("t")
        .build();
    challenge.headers.push(
        HeaderName::WwwAuthenticate,
        "Digest realm=\"test\", nonce=\"abc\", qop=\"auth\", algorithm=MD5",
    );
    manager
        .handle_frame(&challenge.to_bytes(), peer(), TransportKind::Udp)
        .await;

    match next_event(&mut events).await {
        TransactionEvent::AuthChallenge {
            key: event_key,
            challenge,
            ..
        } => {
            assert_eq!(event_key, key);
            assert_eq!(challenge.realm, "test");
            assert_eq!(challenge.nonce, "abc");
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn inbound_invite_creates_server_transaction_and_replays_response() {
    let (transport, manager, mut events) = setup();

    let invite = test_invite("z9hG4bKsrv");
    manager
        .handle_frame(&invite.to_bytes(), peer(), TransportKind::Udp)
        .await;

    let key = match next_event(&mut events).await {
        TransactionEvent::NewRequest { key, request, .. } => {
            assert_eq!(request.method, Method::Invite);
            key
        }
        other => panic!("unexpected event: {:?}", other),
    };

    let ringing = ResponseBuilder::from_request(&invite, StatusCode::Ringing, None)
        .to_tag("uas-tag")
        .build();
    manager.respond(&key, ringing).await.unwrap();
    assert_eq!(transport.sent_messages().await.len(), 1);

    // retransmitted INVITE -> the 180 is replayed, no new transaction
    manager
        .handle_frame(&invite.to_bytes(), peer(), TransportKind::Udp)
        .await;
    assert_eq!(manager.active_transactions(), 1);
    assert_eq!(transport.sent_messages().await.len(), 2);
}

#[tokio::test]
async fn ack_to_2xx_is_stray_for_the_dialog_layer() {
    let (_transport, manager, mut events) = setup();

    let mut ack = test_invite("z9hG4bKnewbranch");
    ack.method = Method::Ack;
    ack.headers.set(HeaderName::CSeq, "101 ACK");
    manager
        .handle_frame(&ack.to_bytes(), peer(), TransportKind::Udp)
        .await;

    match next_event(&mut events).await {
        TransactionEvent::StrayRequest { request, .. } => {
            assert_eq!(request.method, Method::Ack);
        }
        other => panic!("unexpected event: {:?}", other),
    }
}
