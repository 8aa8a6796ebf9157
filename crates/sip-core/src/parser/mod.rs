//! SIP message parsing.
//!
//! [`parse_message`] expects exactly one complete message (the transport
//! layer frames streams before handing bytes up). Parsing is total: any
//! input produces either a message or an [`Error`], never a panic.

use std::str::FromStr;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::types::header_name::HeaderName;
use crate::types::headers::Headers;
use crate::types::message::{Message, Request, Response, SIP_VERSION};
use crate::types::method::Method;
use crate::types::status::StatusCode;
use crate::types::uri::Uri;

/// Locates the blank line separating headers from body.
///
/// Returns `(head_end, body_start)`. Producers that emit bare `\n` line
/// endings are tolerated.
fn split_head_body(data: &[u8]) -> (usize, usize) {
    if let Some(pos) = find(data, b"\r\n\r\n") {
        return (pos, pos + 4);
    }
    if let Some(pos) = find(data, b"\n\n") {
        return (pos, pos + 2);
    }
    (data.len(), data.len())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Parses one complete SIP message from a byte buffer.
///
/// The body is taken per `Content-Length`: surplus bytes beyond the declared
/// length are dropped (datagram padding), a shortfall is a
/// [`Error::ContentLengthMismatch`]. Without the header, all remaining bytes
/// form the body.
pub fn parse_message(data: &[u8]) -> Result<Message> {
    let (head_end, body_start) = split_head_body(data);
    let head = std::str::from_utf8(&data[..head_end])
        .map_err(|_| Error::Malformed("header section is not valid UTF-8".to_string()))?;

    let mut lines = head.split("\r\n").flat_map(|chunk| chunk.split('\n'));

    let start_line = lines
        .next()
        .filter(|line| !line.trim().is_empty())
        .ok_or_else(|| Error::Malformed("missing start line".to_string()))?;

    // Fold continuation lines into the previous header value
    let mut header_lines: Vec<String> = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            match header_lines.last_mut() {
                Some(previous) => {
                    previous.push(' ');
                    previous.push_str(line.trim());
                }
                None => {
                    return Err(Error::Malformed(
                        "continuation line before any header".to_string(),
                    ))
                }
            }
        } else {
            header_lines.push(line.to_string());
        }
    }

    let mut headers = Headers::new();
    for line in &header_lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::InvalidHeader(format!("not a name:value line: {:?}", line)))?;
        headers.push_raw(name.trim(), value.trim())?;
    }

    let body = extract_body(&headers, &data[body_start.min(data.len())..])?;

    if let Some(rest) = start_line.strip_prefix(SIP_VERSION) {
        // Response: SIP/2.0 <code> <reason>
        let rest = rest
            .strip_prefix(' ')
            .ok_or_else(|| Error::Malformed(format!("bad response line: {:?}", start_line)))?;
        let (code_str, reason) = match rest.split_once(' ') {
            Some((code, reason)) => (code, reason),
            None => (rest, ""),
        };
        if code_str.len() != 3 {
            return Err(Error::Malformed(format!(
                "status code is not three digits: {:?}",
                code_str
            )));
        }
        let code: u16 = code_str
            .parse()
            .map_err(|_| Error::Malformed(format!("bad status code: {:?}", code_str)))?;
        let status = StatusCode::from_u16(code)?;
        Ok(Message::Response(Response {
            status,
            reason: reason.to_string(),
            headers,
            body,
        }))
    } else {
        // Request: <method> <request-uri> SIP/2.0
        let mut parts = start_line.split(' ').filter(|part| !part.is_empty());
        let method_str = parts
            .next()
            .ok_or_else(|| Error::Malformed("empty request line".to_string()))?;
        let uri_str = parts
            .next()
            .ok_or_else(|| Error::Malformed(format!("request line missing URI: {:?}", start_line)))?;
        let version = parts
            .next()
            .ok_or_else(|| Error::Malformed(format!("request line missing version: {:?}", start_line)))?;
        if version != SIP_VERSION {
            return Err(Error::InvalidVersion(version.to_string()));
        }

        let method = Method::from_str(method_str)?;
        let uri = Uri::from_str(uri_str)?;
        Ok(Message::Request(Request {
            method,
            uri,
            headers,
            body,
        }))
    }
}

fn extract_body(headers: &Headers, remaining: &[u8]) -> Result<Bytes> {
    match headers.get(&HeaderName::ContentLength) {
        Some(value) => {
            let expected: usize = value.trim().parse().map_err(|_| {
                Error::InvalidHeader(format!("bad Content-Length: {:?}", value))
            })?;
            if remaining.len() < expected {
                return Err(Error::ContentLengthMismatch {
                    expected,
                    actual: remaining.len(),
                });
            }
            Ok(Bytes::copy_from_slice(&remaining[..expected]))
        }
        None => Ok(Bytes::copy_from_slice(remaining)),
    }
}
