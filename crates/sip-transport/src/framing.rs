//! Stream framing for SIP over TCP/TLS.
//!
//! A stream carries back-to-back messages with no length prefix; the frame
//! boundary is `CRLFCRLF` plus the body length declared in `Content-Length`.
//! RFC 5626 keep-alive pings (`CRLFCRLF`) and pongs (`CRLF`) may appear
//! between messages and are discarded.

use bytes::{Bytes, BytesMut};

/// Incremental frame splitter for one stream connection
#[derive(Debug, Default)]
pub struct SipFramer {
    buffer: BytesMut,
}

const CRLF: &[u8] = b"\r\n";
const CRLFCRLF: &[u8] = b"\r\n\r\n";

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Scans a header block for `Content-Length` (or compact `l`),
/// case-insensitively. Missing or unparsable means zero on a stream.
fn content_length(head: &[u8]) -> usize {
    for line in head.split(|&b| b == b'\n') {
        let line = match line.last() {
            Some(b'\r') => &line[..line.len() - 1],
            _ => line,
        };
        let Some(colon) = line.iter().position(|&b| b == b':') else {
            continue;
        };
        let name = String::from_utf8_lossy(&line[..colon]);
        let name = name.trim();
        if name.eq_ignore_ascii_case("content-length") || name.eq_ignore_ascii_case("l") {
            let value = String::from_utf8_lossy(&line[colon + 1..]);
            return value.trim().parse().unwrap_or(0);
        }
    }
    0
}

impl SipFramer {
    /// Creates an empty framer
    pub fn new() -> Self {
        SipFramer {
            buffer: BytesMut::new(),
        }
    }

    /// Appends bytes read from the stream
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Extracts the next complete message, if one is buffered.
    ///
    /// Call repeatedly until `None`: a single read may complete several
    /// messages.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        loop {
            // keep-alive handling (RFC 5626): ping then pong
            if self.buffer.starts_with(CRLFCRLF) {
                let _ = self.buffer.split_to(4);
                continue;
            }
            if self.buffer.starts_with(CRLF) {
                let _ = self.buffer.split_to(2);
                continue;
            }

            let header_end = find(&self.buffer, CRLFCRLF)?;
            let body_len = content_length(&self.buffer[..header_end]);
            let total = header_end + 4 + body_len;
            if self.buffer.len() < total {
                return None;
            }
            return Some(self.buffer.split_to(total).freeze());
        }
    }

    /// Bytes currently buffered but not yet framed
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPTIONS: &[u8] =
        b"OPTIONS sip:a@b SIP/2.0\r\nCSeq: 1 OPTIONS\r\nContent-Length: 0\r\n\r\n";

    #[test]
    fn single_complete_frame() {
        let mut framer = SipFramer::new();
        framer.push(OPTIONS);
        assert_eq!(framer.next_frame().as_deref(), Some(OPTIONS));
        assert_eq!(framer.next_frame(), None);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn frame_split_across_reads() {
        let mut framer = SipFramer::new();
        let (first, second) = OPTIONS.split_at(20);
        framer.push(first);
        assert_eq!(framer.next_frame(), None);
        framer.push(second);
        assert_eq!(framer.next_frame().as_deref(), Some(OPTIONS));
    }

    #[test]
    fn two_frames_in_one_read() {
        let mut framer = SipFramer::new();
        let mut data = OPTIONS.to_vec();
        data.extend_from_slice(OPTIONS);
        framer.push(&data);
        assert!(framer.next_frame().is_some());
        assert!(framer.next_frame().is_some());
        assert_eq!(framer.next_frame(), None);
    }

    #[test]
    fn body_bytes_counted() {
        let msg = b"MESSAGE sip:a@b SIP/2.0\r\nContent-Length: 5\r\n\r\nhello";
        let mut framer = SipFramer::new();
        framer.push(msg);
        // body not yet complete
        let mut partial = SipFramer::new();
        partial.push(&msg[..msg.len() - 2]);
        assert_eq!(partial.next_frame(), None);

        let frame = framer.next_frame().unwrap();
        assert!(frame.ends_with(b"hello"));
    }

    #[test]
    fn keepalives_discarded() {
        let mut framer = SipFramer::new();
        framer.push(b"\r\n\r\n\r\n");
        framer.push(OPTIONS);
        assert_eq!(framer.next_frame().as_deref(), Some(OPTIONS));
    }

    #[test]
    fn compact_content_length_honoured() {
        let msg = b"MESSAGE sip:a@b SIP/2.0\r\nl: 3\r\n\r\nabcXXX";
        let mut framer = SipFramer::new();
        framer.push(msg);
        let frame = framer.next_frame().unwrap();
        assert!(frame.ends_with(b"abc"));
        // trailing garbage stays buffered for the next pass
        assert_eq!(framer.pending(), 3);
    }
}
