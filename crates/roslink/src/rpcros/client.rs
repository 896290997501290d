// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service caller (client role).
//!
//! ```text
//! Idle -arm-> Connecting -> WritingHeader -> ReadingHeaderSize -> ReadingHeader
//!                                                                     |
//!     +---------------------------------------------------------------+
//!     v
//! WaitForWriting -> StartWriting -> Writing -> ReadingOk -> ReadingSize -> Reading
//!     ^                                                                     |
//!     +------------------- persistent --------------------------------------+
//!                                        one-shot: Idle
//! ```

use crate::node::registry::{ServiceCaller, ServiceResult};
use crate::process::Flow;
use crate::tcpros::header::{md5_matches, ConnectionHeader};
use crate::tcpros::process::{TcprosProcess, TcprosState, Unit};
use crate::transport::{encode_frame, StreamIo, FRAME_HEADER_SIZE};

/// Header a caller opens the connection with.
pub fn request_header(caller_id: &str, caller: &ServiceCaller) -> ConnectionHeader {
    ConnectionHeader::new()
        .with("callerid", caller_id)
        .with("service", &caller.service)
        .with("md5sum", &caller.type_info.md5sum)
        .with("persistent", if caller.persistent { "1" } else { "0" })
}

/// Check the provider's reply header.
pub fn check_reply(header: &ConnectionHeader, caller: &ServiceCaller) -> Result<(), String> {
    if let Some(error) = header.get("error") {
        return Err(format!("provider refused {}: {}", caller.service, error));
    }
    let md5sum = header.get("md5sum").unwrap_or("*");
    if !md5_matches(&caller.type_info.md5sum, md5sum) {
        return Err(format!(
            "md5sum mismatch on {}: {} vs {}",
            caller.service, caller.type_info.md5sum, md5sum
        ));
    }
    Ok(())
}

/// Wait for the next request: now if one is queued, else one period.
fn wait_next<S: StreamIo>(process: &mut TcprosProcess<S>, caller: &ServiceCaller, now: u64) {
    process.wake_at = if caller.has_queued() {
        now
    } else if caller.request_callback.is_some() {
        now + caller.period_ms
    } else {
        u64::MAX
    };
    process.set_state(TcprosState::WaitForWriting, now);
}

fn finish<S: StreamIo>(
    process: &mut TcprosProcess<S>,
    caller: &mut ServiceCaller,
    body: &[u8],
    now: u64,
) -> Flow {
    let result: ServiceResult = if process.ok {
        Ok(body.to_vec())
    } else {
        Err(String::from_utf8_lossy(body).into_owned())
    };
    if let Err(text) = &result {
        log::warn!("[rpcros] {} returned an error: {}", caller.service, text);
    }
    caller.deliver(result);
    if caller.persistent {
        process.packet.clear();
        wait_next(process, caller, now);
        Flow::Continue
    } else {
        process.reset(now);
        Flow::Yield
    }
}

/// One transition of a caller slot.
pub fn step<S: StreamIo>(
    process: &mut TcprosProcess<S>,
    caller: &mut ServiceCaller,
    caller_id: &str,
    now: u64,
) -> Flow {
    match process.state() {
        TcprosState::Idle => Flow::Yield,

        TcprosState::Connecting => match process.connect(now) {
            Some(true) => {
                process.packet.clear();
                process.persistent = caller.persistent;
                request_header(caller_id, caller).encode(&mut process.packet);
                process.set_state(TcprosState::WritingHeader, now);
                Flow::Continue
            }
            Some(false) | None => Flow::Yield,
        },

        TcprosState::WritingHeader => match process.flush(now) {
            Some(true) => {
                process.expect(FRAME_HEADER_SIZE, TcprosState::ReadingHeaderSize, now);
                Flow::Continue
            }
            Some(false) | None => Flow::Yield,
        },

        TcprosState::ReadingHeaderSize => match process.read_unit(now) {
            Unit::Ready => match process.take_size(now) {
                Some(len) => {
                    process.expect(len, TcprosState::ReadingHeader, now);
                    Flow::Continue
                }
                None => Flow::Yield,
            },
            Unit::Pending | Unit::Lost => Flow::Yield,
        },

        TcprosState::ReadingHeader => {
            match process.read_unit(now) {
                Unit::Ready => {}
                Unit::Pending | Unit::Lost => return Flow::Yield,
            }
            let verdict = ConnectionHeader::decode(process.packet.data())
                .map_err(|e| e.to_string())
                .and_then(|header| {
                    check_reply(&header, caller)?;
                    Ok(header)
                });
            match verdict {
                Ok(header) => {
                    process.peer_id = header.get("callerid").unwrap_or("").to_string();
                    log::info!("[rpcros] connected to {} at {}", caller.service, process.peer_id);
                    process.packet.clear();
                    // First request goes out right away if there is one
                    process.wake_at = now;
                    process.set_state(TcprosState::WaitForWriting, now);
                    Flow::Continue
                }
                Err(e) => {
                    log::error!("[rpcros] {}", e);
                    process.fail(now);
                    Flow::Yield
                }
            }
        }

        TcprosState::WaitForWriting => {
            if now >= process.wake_at {
                process.set_state(TcprosState::StartWriting, now);
                Flow::Continue
            } else {
                Flow::Yield
            }
        }

        TcprosState::StartWriting => match caller.next_request() {
            Some(request) => {
                process.packet.clear();
                encode_frame(&request, &mut process.packet);
                if caller.request_callback.is_some() {
                    caller.next_call_at = now + caller.period_ms;
                }
                process.set_state(TcprosState::Writing, now);
                Flow::Continue
            }
            None => {
                wait_next(process, caller, now);
                Flow::Yield
            }
        },

        TcprosState::Writing => match process.flush(now) {
            Some(true) => {
                process.expect(1, TcprosState::ReadingOk, now);
                Flow::Continue
            }
            Some(false) | None => Flow::Yield,
        },

        TcprosState::ReadingOk => match process.read_unit(now) {
            Unit::Ready => {
                process.ok = process.packet.data().first() == Some(&1);
                process.expect(FRAME_HEADER_SIZE, TcprosState::ReadingSize, now);
                Flow::Continue
            }
            Unit::Pending | Unit::Lost => Flow::Yield,
        },

        TcprosState::ReadingSize => match process.read_unit(now) {
            Unit::Ready => match process.take_size(now) {
                Some(0) => finish(process, caller, &[], now),
                Some(len) => {
                    process.expect(len, TcprosState::Reading, now);
                    Flow::Continue
                }
                None => Flow::Yield,
            },
            Unit::Pending | Unit::Lost => Flow::Yield,
        },

        TcprosState::Reading => match process.read_unit(now) {
            Unit::Ready => {
                let body = process.packet.data().to_vec();
                finish(process, caller, &body, now)
            }
            Unit::Pending | Unit::Lost => Flow::Yield,
        },
    }
}

/// Bring forward the cycle of a waiting caller slot.
pub fn expedite<S: StreamIo>(process: &mut TcprosProcess<S>, now: u64) {
    if process.state() == TcprosState::WaitForWriting {
        process.wake_at = now;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::DynBuffer;
    use crate::node::registry::{ServiceCallerSpec, TypeInfo};
    use crate::process::MAX_STEPS_PER_DISPATCH;
    use crate::transport::stream::mock::MockStream;
    use crate::uri::Endpoint;

    fn caller(persistent: bool) -> ServiceCaller {
        let spec = ServiceCallerSpec::new("/add_two_ints", TypeInfo::new("T", "abc", ""))
            .with_persistent(persistent);
        ServiceCaller::from_spec(spec)
    }

    fn provider_reply() -> Vec<u8> {
        let mut out = DynBuffer::new();
        ConnectionHeader::new()
            .with("callerid", "/server")
            .with("md5sum", "abc")
            .with("type", "T")
            .encode(&mut out);
        out.as_slice().to_vec()
    }

    fn drive(process: &mut TcprosProcess<MockStream>, caller: &mut ServiceCaller, now: u64) {
        for _ in 0..MAX_STEPS_PER_DISPATCH {
            if step(process, caller, "/client", now) == Flow::Yield {
                break;
            }
        }
    }

    fn connected(caller: &mut ServiceCaller) -> TcprosProcess<MockStream> {
        let mut process = TcprosProcess::new(MockStream::new(), 1 << 20);
        process.start_client(Endpoint::new("rosrpc", "127.0.0.1", 6000), 0);
        drive(&mut process, caller, 0);
        process.socket.feed(&provider_reply());
        drive(&mut process, caller, 0);
        process
    }

    #[test]
    fn test_one_shot_call() {
        let mut caller = caller(false);
        caller.pending.push_back(b"req".to_vec());
        let mut process = connected(&mut caller);

        let sent = process.socket.take_written();
        let header = ConnectionHeader::decode(&sent[4..sent.len() - 7]).unwrap();
        assert_eq!(header.get("service"), Some("/add_two_ints"));
        assert_eq!(header.get("persistent"), Some("0"));
        assert!(sent.ends_with(b"\x03\0\0\0req"));
        assert_eq!(process.state(), TcprosState::ReadingOk);

        process.socket.feed(b"\x01\x02\0\0\0ok");
        drive(&mut process, &mut caller, 1);
        assert!(process.is_idle());
        assert!(!process.socket.is_open());
        assert_eq!(caller.responses.pop_front(), Some(Ok(b"ok".to_vec())));
    }

    #[test]
    fn test_persistent_waits_for_next_request() {
        let mut caller = caller(true);
        caller.pending.push_back(b"a".to_vec());
        let mut process = connected(&mut caller);
        process.socket.take_written();

        process.socket.feed(b"\x00\x04\0\0\0nope");
        drive(&mut process, &mut caller, 1);
        assert_eq!(process.state(), TcprosState::WaitForWriting);
        assert_eq!(process.wake_at, u64::MAX);
        assert_eq!(caller.responses.pop_front(), Some(Err("nope".to_string())));

        caller.pending.push_back(b"b".to_vec());
        expedite(&mut process, 2);
        drive(&mut process, &mut caller, 2);
        assert_eq!(process.socket.take_written(), b"\x01\0\0\0b");
        assert_eq!(process.state(), TcprosState::ReadingOk);
    }

    #[test]
    fn test_empty_response_body() {
        let mut caller = caller(false);
        caller.pending.push_back(Vec::new());
        let mut process = connected(&mut caller);
        process.socket.feed(&[1, 0, 0, 0, 0]);
        drive(&mut process, &mut caller, 1);
        assert_eq!(caller.responses.pop_front(), Some(Ok(Vec::new())));
    }

    #[test]
    fn test_periodic_request_callback() {
        let spec = ServiceCallerSpec::new("/srv", TypeInfo::any())
            .with_persistent(true)
            .with_period_ms(500)
            .with_request_callback(|| Some(b"tick".to_vec()));
        let mut caller = ServiceCaller::from_spec(spec);
        let mut process = connected(&mut caller);
        process.socket.take_written();
        assert_eq!(caller.next_call_at, 500);

        process.socket.feed(&[1, 0, 0, 0, 0]);
        drive(&mut process, &mut caller, 10);
        assert_eq!(process.state(), TcprosState::WaitForWriting);
        assert_eq!(process.wake_at, 510);
        drive(&mut process, &mut caller, 509);
        assert!(process.socket.written().is_empty());
        drive(&mut process, &mut caller, 510);
        assert_eq!(process.socket.take_written(), b"\x04\0\0\0tick");
    }

    #[test]
    fn test_provider_error_header() {
        let mut caller = caller(false);
        let mut process = TcprosProcess::new(MockStream::new(), 1 << 20);
        process.start_client(Endpoint::new("rosrpc", "h", 1), 0);
        drive(&mut process, &mut caller, 0);
        let mut out = DynBuffer::new();
        ConnectionHeader::new()
            .with("error", "no such service")
            .encode(&mut out);
        process.socket.feed(out.as_slice());
        drive(&mut process, &mut caller, 1);
        assert!(process.is_idle());
        assert!(process.take_failed());
    }
}
