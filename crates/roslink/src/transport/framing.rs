// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Length-prefix framing shared by the streaming and service transports.
//!
//! ```text
//! +----------------+-------------------+
//! | Length (4B LE) | Payload           |
//! +----------------+-------------------+
//! ```
//!
//! Every unit (connection header, message, request, response body) uses
//! this framing. Reception is two-phase: read exactly 4 bytes, decode the
//! length, then read exactly that many bytes. `left_to_recv` carries the
//! remaining count across non-blocking wakeups, so arbitrary fragmentation
//! by the transport is invisible to the caller.

use super::socket::SocketState;
use super::stream::StreamIo;
use crate::buffer::DynBuffer;

/// Length prefix size.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Result of one bounded read toward a fixed-length unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadStep {
    /// `left_to_recv` reached zero
    Complete,
    /// Some bytes arrived, more are needed
    Progress,
    /// Nothing available right now
    Blocked,
    /// Peer closed or reset
    Closed,
    /// Hard failure
    Failed,
}

/// Append `[len u32 LE][payload]` to `out`.
pub fn encode_frame(payload: &[u8], out: &mut DynBuffer) {
    out.push_u32_le(payload.len() as u32);
    out.push_back(payload);
}

/// Decode a 4-byte little-endian length. `None` if fewer than 4 bytes.
pub fn decode_len(bytes: &[u8]) -> Option<u32> {
    let prefix: [u8; FRAME_HEADER_SIZE] = bytes.get(..FRAME_HEADER_SIZE)?.try_into().ok()?;
    Some(u32::from_le_bytes(prefix))
}

/// One read toward completing a unit of `*left_to_recv` bytes.
///
/// Never reads past the unit boundary, so the next frame's bytes stay in
/// the kernel buffer for the next phase.
pub fn read_exact_step<S: StreamIo>(
    stream: &mut S,
    buf: &mut DynBuffer,
    left_to_recv: &mut usize,
) -> ReadStep {
    if *left_to_recv == 0 {
        return ReadStep::Complete;
    }
    let (state, n) = stream.read_buffer_ex(buf, *left_to_recv);
    match state {
        SocketState::Done => {
            *left_to_recv -= n.min(*left_to_recv);
            if *left_to_recv == 0 {
                ReadStep::Complete
            } else if n > 0 {
                ReadStep::Progress
            } else {
                ReadStep::Blocked
            }
        }
        SocketState::InProgress => ReadStep::Blocked,
        SocketState::Disconnected => ReadStep::Closed,
        SocketState::Failed | SocketState::Refused => ReadStep::Failed,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::stream::mock::MockStream;

    /// Drive the two-phase read to completion, returning the payload.
    fn reassemble(stream: &mut MockStream) -> Option<Vec<u8>> {
        let mut buf = DynBuffer::new();
        let mut left = FRAME_HEADER_SIZE;
        let mut reading_body = false;
        for _ in 0..10_000 {
            match read_exact_step(stream, &mut buf, &mut left) {
                ReadStep::Complete if !reading_body => {
                    left = decode_len(buf.data())? as usize;
                    buf.clear();
                    reading_body = true;
                    if left == 0 {
                        return Some(Vec::new());
                    }
                }
                ReadStep::Complete => return Some(buf.as_slice().to_vec()),
                ReadStep::Closed | ReadStep::Failed => return None,
                ReadStep::Progress | ReadStep::Blocked => {}
            }
        }
        None
    }

    #[test]
    fn test_encode_frame() {
        let mut out = DynBuffer::new();
        encode_frame(b"abc", &mut out);
        assert_eq!(out.as_slice(), &[3, 0, 0, 0, b'a', b'b', b'c']);
        assert_eq!(decode_len(out.as_slice()), Some(3));
        assert_eq!(decode_len(&[1, 2]), None);
    }

    #[test]
    fn test_decode_uses_all_four_bytes() {
        assert_eq!(decode_len(&[0x00, 0x01, 0x00, 0x00]), Some(256));
        assert_eq!(decode_len(&[0xff, 0xff, 0xff, 0x7f]), Some(0x7fff_ffff));
    }

    #[test]
    fn test_single_read_frame() {
        let mut frame = DynBuffer::new();
        encode_frame(b"payload", &mut frame);
        let mut stream = MockStream::connected();
        stream.feed(frame.as_slice());
        assert_eq!(reassemble(&mut stream).unwrap(), b"payload");
    }

    #[test]
    fn test_chunking_is_transparent() {
        let mut rng = fastrand::Rng::with_seed(7);
        for round in 0..200 {
            let len = rng.usize(0..600);
            let payload: Vec<u8> = (0..len).map(|_| rng.u8(..)).collect();
            let mut frame = DynBuffer::new();
            encode_frame(&payload, &mut frame);

            let total = frame.len();
            let mut sizes = Vec::new();
            let mut covered = 0;
            while covered < total {
                let n = rng.usize(1..=9);
                sizes.push(n);
                covered += n;
            }

            let mut stream = MockStream::connected();
            stream.feed_chunked(frame.as_slice(), &sizes);
            let got = reassemble(&mut stream).expect("frame");
            assert_eq!(got, payload, "round {}", round);
        }
    }

    #[test]
    fn test_reset_mid_body() {
        let mut stream = MockStream::connected();
        stream.feed(&[10, 0, 0, 0, 1, 2, 3]);
        stream.reset();
        assert!(reassemble(&mut stream).is_none());
    }

    #[test]
    fn test_does_not_overread() {
        let mut stream = MockStream::connected();
        stream.feed(&[1, 0, 0, 0, 42, 9, 9]);
        let mut buf = DynBuffer::new();
        let mut left = FRAME_HEADER_SIZE;
        assert_eq!(read_exact_step(&mut stream, &mut buf, &mut left), ReadStep::Complete);
        left = 1;
        buf.clear();
        assert_eq!(read_exact_step(&mut stream, &mut buf, &mut left), ReadStep::Complete);
        assert_eq!(buf.as_slice(), &[42]);
        assert_eq!(stream.pending_reads(), 1);
    }
}
