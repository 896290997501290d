// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Minimal HTTP/1.x envelope for XML-RPC.
//!
//! Writers emit `POST /RPC2` requests and `200 OK` responses with a
//! `Content-Length`. The reader is incremental: it is called again on the
//! whole accumulated buffer after every read and reports
//! [`Parse::Incomplete`] until the header terminator and the declared
//! body have both arrived.

use std::fmt::Write as _;

use super::Parse;
use crate::buffer::DynBuffer;

/// Parsed envelope borrowing from the receive buffer.
#[derive(Debug, PartialEq, Eq)]
pub struct Envelope<'a> {
    /// Request line or status line
    pub start_line: &'a str,
    pub body: &'a [u8],
}

/// Append a `POST /RPC2` request carrying `body`.
pub fn write_request(host: &str, body: &str, out: &mut DynBuffer) {
    let mut head = String::with_capacity(128);
    let _ = write!(
        head,
        "POST /RPC2 HTTP/1.1\r\n\
         Host: {}\r\n\
         User-Agent: roslink\r\n\
         Content-Type: text/xml\r\n\
         Content-Length: {}\r\n\r\n",
        host,
        body.len()
    );
    out.push_str(&head);
    out.push_str(body);
}

/// Append a `200 OK` response carrying `body`.
pub fn write_response(body: &str, out: &mut DynBuffer) {
    let mut head = String::with_capacity(128);
    let _ = write!(
        head,
        "HTTP/1.1 200 OK\r\n\
         Server: roslink\r\n\
         Content-Type: text/xml\r\n\
         Content-Length: {}\r\n\r\n",
        body.len()
    );
    out.push_str(&head);
    out.push_str(body);
}

/// Locate the end of the header block: (header length, terminator length).
fn find_header_end(bytes: &[u8]) -> Option<(usize, usize)> {
    if let Some(pos) = bytes.windows(4).position(|w| w == b"\r\n\r\n") {
        return Some((pos, 4));
    }
    bytes
        .windows(2)
        .position(|w| w == b"\n\n")
        .map(|pos| (pos, 2))
}

/// Try to read one envelope from `bytes`.
///
/// `closed` tells the reader the peer has finished sending: an envelope
/// without `Content-Length` then ends at the end of the buffer.
pub fn read_envelope(bytes: &[u8], closed: bool) -> Parse<Envelope<'_>> {
    let Some((head_len, term_len)) = find_header_end(bytes) else {
        return if closed {
            Parse::Error("connection closed inside HTTP header".to_string())
        } else {
            Parse::Incomplete
        };
    };
    let Ok(head) = std::str::from_utf8(&bytes[..head_len]) else {
        return Parse::Error("HTTP header is not UTF-8".to_string());
    };

    let mut lines = head.lines();
    let start_line = lines.next().unwrap_or("").trim();
    if start_line.is_empty() {
        return Parse::Error("empty HTTP start line".to_string());
    }

    let mut content_length = None;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("content-length") {
            match value.trim().parse::<usize>() {
                Ok(len) => content_length = Some(len),
                Err(_) => return Parse::Error(format!("bad Content-Length {:?}", value.trim())),
            }
        }
    }

    let body_start = head_len + term_len;
    let available = &bytes[body_start..];
    match content_length {
        Some(len) if available.len() >= len => Parse::Done(Envelope {
            start_line,
            body: &available[..len],
        }),
        Some(_) if closed => Parse::Error("connection closed inside HTTP body".to_string()),
        Some(_) => Parse::Incomplete,
        None if closed => Parse::Done(Envelope {
            start_line,
            body: available,
        }),
        None => Parse::Incomplete,
    }
}

/// Status code of a response start line (`HTTP/1.1 200 OK`).
pub fn status_code(start_line: &str) -> Option<u16> {
    let mut parts = start_line.split_whitespace();
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_has_length() {
        let mut out = DynBuffer::new();
        write_request("127.0.0.1:11311", "<x/>", &mut out);
        let text = std::str::from_utf8(out.as_slice()).unwrap();
        assert!(text.starts_with("POST /RPC2 HTTP/1.1\r\n"));
        assert!(text.contains("Content-Length: 4\r\n"));
        assert!(text.ends_with("\r\n\r\n<x/>"));
    }

    #[test]
    fn test_incremental_read() {
        let mut out = DynBuffer::new();
        write_response("<methodResponse/>", &mut out);
        let full = out.as_slice();

        for cut in 0..full.len() {
            assert_eq!(read_envelope(&full[..cut], false), Parse::Incomplete, "cut {}", cut);
        }
        match read_envelope(full, false) {
            Parse::Done(env) => {
                assert_eq!(env.start_line, "HTTP/1.1 200 OK");
                assert_eq!(env.body, b"<methodResponse/>");
                assert_eq!(status_code(env.start_line), Some(200));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_body_until_close() {
        let raw = b"HTTP/1.0 200 OK\r\nContent-Type: text/xml\r\n\r\n<a/>";
        assert_eq!(read_envelope(raw, false), Parse::Incomplete);
        match read_envelope(raw, true) {
            Parse::Done(env) => assert_eq!(env.body, b"<a/>"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_truncated_on_close() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\n<a/>";
        assert!(matches!(read_envelope(raw, true), Parse::Error(_)));
        assert!(matches!(read_envelope(b"HTTP/1.1 2", true), Parse::Error(_)));
    }

    #[test]
    fn test_bad_length() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: many\r\n\r\n";
        assert!(matches!(read_envelope(raw, false), Parse::Error(_)));
    }

    #[test]
    fn test_status_code() {
        assert_eq!(status_code("HTTP/1.1 500 Internal"), Some(500));
        assert_eq!(status_code("POST /RPC2 HTTP/1.1"), None);
    }
}
