//! Parser integration tests: round-trips, folding, compact forms, and
//! adversarial inputs that must fail cleanly.

use voxsip_sip_core::prelude::*;

const RFC_INVITE: &[u8] = b"INVITE sip:bob@biloxi.com SIP/2.0\r\n\
Via: SIP/2.0/UDP pc33.atlanta.com;branch=z9hG4bK776asdhds\r\n\
Max-Forwards: 70\r\n\
To: Bob <sip:bob@biloxi.com>\r\n\
From: Alice <sip:alice@atlanta.com>;tag=1928301774\r\n\
Call-ID: a84b4c76e66710@pc33.atlanta.com\r\n\
CSeq: 314159 INVITE\r\n\
Contact: <sip:alice@pc33.atlanta.com>\r\n\
Content-Type: application/sdp\r\n\
Content-Length: 16\r\n\
\r\n\
v=0\r\no=alice 0 0";

#[test]
fn parse_rfc_invite() {
    let message = parse_message(RFC_INVITE).unwrap();
    let request = message.as_request().unwrap();

    assert_eq!(request.method, Method::Invite);
    assert_eq!(request.uri.to_string(), "sip:bob@biloxi.com");
    assert_eq!(request.call_id(), Some("a84b4c76e66710@pc33.atlanta.com"));
    assert_eq!(request.cseq(), Some(CSeq::new(314159, Method::Invite)));
    assert_eq!(request.from_tag().as_deref(), Some("1928301774"));
    assert_eq!(request.via_branch().as_deref(), Some("z9hG4bK776asdhds"));
    assert_eq!(&request.body[..], b"v=0\r\no=alice 0 0");
}

#[test]
fn round_trip_preserves_structure() {
    let message = parse_message(RFC_INVITE).unwrap();
    let rendered = message.to_bytes();
    let reparsed = parse_message(&rendered).unwrap();
    assert_eq!(message, reparsed);
}

#[test]
fn compact_headers_expand() {
    let data = b"MESSAGE sip:bob@example.com SIP/2.0\r\n\
v: SIP/2.0/UDP host;branch=z9hG4bKa\r\n\
f: <sip:alice@example.com>;tag=x\r\n\
t: <sip:bob@example.com>\r\n\
i: compact@host\r\n\
CSeq: 1 MESSAGE\r\n\
m: <sip:alice@host>\r\n\
c: text/plain\r\n\
l: 5\r\n\
\r\n\
hello";
    let message = parse_message(data).unwrap();
    let request = message.as_request().unwrap();

    assert_eq!(request.call_id(), Some("compact@host"));
    assert_eq!(request.content_type(), Some("text/plain"));
    assert_eq!(request.contact(), Some("<sip:alice@host>"));
    assert_eq!(&request.body[..], b"hello");

    // canonical names on output
    let text = String::from_utf8(request.to_bytes().to_vec()).unwrap();
    assert!(text.contains("Call-ID: compact@host\r\n"));
    assert!(text.contains("Content-Type: text/plain\r\n"));
    assert!(!text.contains("\ni:"));
}

#[test]
fn folded_headers_join_with_single_space() {
    let data = b"OPTIONS sip:a@b SIP/2.0\r\n\
Subject: first line\r\n\
 continued here\r\n\
\tand here\r\n\
Call-ID: folded@host\r\n\
Content-Length: 0\r\n\
\r\n";
    let message = parse_message(data).unwrap();
    let request = message.as_request().unwrap();
    assert_eq!(
        request.header(&HeaderName::Subject),
        Some("first line continued here and here")
    );
    assert_eq!(request.call_id(), Some("folded@host"));
}

#[test]
fn lenient_line_endings() {
    let data = b"SIP/2.0 180 Ringing\nVia: SIP/2.0/UDP h;branch=z9hG4bKx\nCall-ID: lf@host\nContent-Length: 0\n\n";
    let message = parse_message(data).unwrap();
    let response = message.as_response().unwrap();
    assert_eq!(response.status, StatusCode::Ringing);
    assert_eq!(response.call_id(), Some("lf@host"));
}

#[test]
fn response_reason_with_spaces() {
    let data = b"SIP/2.0 487 Request Terminated\r\nContent-Length: 0\r\n\r\n";
    let response = parse_message(data).unwrap().into_response().unwrap();
    assert_eq!(response.status.as_u16(), 487);
    assert_eq!(response.reason, "Request Terminated");
}

#[test]
fn body_without_content_length_takes_rest() {
    let data = b"MESSAGE sip:a@b SIP/2.0\r\nCSeq: 1 MESSAGE\r\n\r\npayload bytes";
    let request = parse_message(data).unwrap().into_request().unwrap();
    assert_eq!(&request.body[..], b"payload bytes");
}

#[test]
fn adversarial_inputs_fail_without_panic() {
    let cases: &[&[u8]] = &[
        b"",
        b"\r\n\r\n",
        b"SIP/2.0\r\n\r\n",
        b"SIP/2.0 99 Low\r\n\r\n",
        b"SIP/2.0 700 High\r\n\r\n",
        b"SIP/2.0 abc Bad\r\n\r\n",
        b"INVITE\r\n\r\n",
        b"INVITE sip:a@b\r\n\r\n",
        b"INVITE sip:a@b HTTP/1.1\r\n\r\n",
        b"INV ITE sip:a@b SIP/2.0 extra\r\n\r\n",
        b"OPTIONS sip:a@b SIP/2.0\r\nNoColonHere\r\n\r\n",
        b"OPTIONS sip:a@b SIP/2.0\r\nContent-Length: banana\r\n\r\n",
        b"OPTIONS sip:a@b SIP/2.0\r\nContent-Length: 10\r\n\r\nshort",
        b"\xff\xfe\xfd\xfc",
    ];
    for case in cases {
        assert!(parse_message(case).is_err(), "should fail: {:?}", case);
    }
}

#[test]
fn content_length_is_truth_on_render() {
    let request = RequestBuilder::new(Method::Message, "sip:bob@example.com")
        .unwrap()
        .call_id("cl@host")
        .cseq(1)
        .content_type("text/plain")
        .body(&b"four"[..])
        .build();
    let text = String::from_utf8(request.to_bytes().to_vec()).unwrap();
    assert!(text.contains("Content-Length: 4\r\n"));

    // and a response with an empty body
    let response = ResponseBuilder::new(StatusCode::Ok, None).build();
    let text = String::from_utf8(response.to_bytes().to_vec()).unwrap();
    assert!(text.contains("Content-Length: 0\r\n"));
}
