//! SDP passthrough helpers.
//!
//! The stack treats SDP bodies as opaque bytes; the one concession is a
//! default audio offer for `invite` callers that ask for media without
//! supplying their own body.

/// Builds a minimal audio offer: PCMU, PCMA, and telephone-event over
/// RTP/AVP at `host:port`.
pub fn audio_offer(host: &str, port: u16) -> String {
    let payloads = [0u8, 8, 101];
    let mut body = vec![
        "v=0".to_string(),
        format!("o=- 0 0 IN IP4 {}", host),
        "s=voxsip-session".to_string(),
        format!("c=IN IP4 {}", host),
        "t=0 0".to_string(),
        format!(
            "m=audio {} RTP/AVP {}",
            port,
            payloads
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(" ")
        ),
    ];
    for payload in payloads {
        let codec = match payload {
            0 => "PCMU/8000",
            8 => "PCMA/8000",
            101 => "telephone-event/8000",
            _ => continue,
        };
        body.push(format!("a=rtpmap:{} {}", payload, codec));
    }
    body.push("a=sendrecv".to_string());
    body.join("\r\n") + "\r\n"
}
